// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs UI test suites in batches, retrying only the tests that failed.
//!
//! The heavy lifting happens in `multiscan-runner`. This crate is the command-line front end:
//! argument parsing, logging setup, and mapping errors to exit codes.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
