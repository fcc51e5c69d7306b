// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for multiscan: running a batched UI test suite through an external test
//! engine, re-running only the tests that failed, and optionally running batches in parallel on
//! separate devices.
//!
//! The main entry point is [`runner::ScanRunnerBuilder`]. The basic flow is:
//!
//! 1. A [`test_list::TestCollector`] partitions the suite into batches.
//! 2. Each batch is driven through a retry loop against a [`engine::TestEngine`]. Only the tests
//!    that failed on one try are run on the next.
//! 3. All per-try reports of a batch are merged by [`collate::ReportCollator`] into one final
//!    report.

pub mod collate;
pub mod config;
pub mod devices;
pub mod engine;
pub mod errors;
pub mod exit_codes;
pub mod helpers;
pub mod junit;
mod lifecycle;
pub mod report_name;
pub mod reporter;
pub mod runner;
pub mod test_list;
mod time;
