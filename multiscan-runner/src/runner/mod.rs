// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The scan runner.
//!
//! The main structure in this module is [`ScanRunner`]. Batches run one after another by default.
//! In parallel mode, each batch is bound to its own device and runs in its own task.

mod imp;
mod parallel;
mod retry;

pub use imp::*;
pub use parallel::*;
pub use retry::*;
