// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the scan runner, driven by a scripted test engine.

mod basic;
mod fixtures;
mod parallel;
