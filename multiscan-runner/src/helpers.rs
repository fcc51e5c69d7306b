// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for multiscan-runner.

use std::{fmt, time::Duration};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "batch" if `count` is 1, otherwise "batches".
    pub fn batches_str(count: usize) -> &'static str {
        if count == 1 { "batch" } else { "batches" }
    }

    /// Returns "try" if `count` is 1, otherwise "tries".
    pub fn tries_str(count: usize) -> &'static str {
        if count == 1 { "try" } else { "tries" }
    }

    /// Returns "retry" if `count` is 1, otherwise "retries".
    pub fn retries_str(count: usize) -> &'static str {
        if count == 1 { "retry" } else { "retries" }
    }

    /// Returns "testable" if `count` is 1, otherwise "testables".
    pub fn testables_str(count: usize) -> &'static str {
        if count == 1 { "testable" } else { "testables" }
    }
}

/// Displays a duration as seconds with two decimal places, switching to minutes past a minute.
#[derive(Clone, Copy, Debug)]
pub struct FormattedDuration(pub Duration);

impl fmt::Display for FormattedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = self.0.as_secs_f64();
        if duration > 60.0 {
            write!(f, "{}m {:.2}s", duration as u32 / 60, duration % 60.0)
        } else {
            write!(f, "{duration:.2}s")
        }
    }
}
