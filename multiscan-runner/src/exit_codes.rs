// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Documented exit codes for `multiscan`.

/// Documented exit codes for `multiscan` failures.
///
/// `multiscan` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum MultiscanExitCode {}

impl MultiscanExitCode {
    /// No errors occurred and every batch passed.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more batches failed, after retries.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Reading or partitioning the test list produced an error.
    pub const TEST_LIST_CREATION_FAILED: i32 = 104;

    /// No device in the pool could be allocated to a batch.
    pub const DEVICE_ALLOCATION_FAILED: i32 = 105;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a multiscan invocation.
    pub const SETUP_ERROR: i32 = 96;
}
