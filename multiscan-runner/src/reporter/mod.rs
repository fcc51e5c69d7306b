// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the progress and results of a scan.
//!
//! The main type here is [`ScanReporter`], which renders [`ScanEvent`]s for humans.

mod displayer;
mod events;

pub use displayer::*;
pub use events::*;
