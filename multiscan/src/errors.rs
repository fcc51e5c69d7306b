// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use multiscan_runner::{errors::*, exit_codes::MultiscanExitCode};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages: the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected failure of a multiscan invocation.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed { error: std::io::Error },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("test list error")]
    TestListError {
        #[from]
        err: TestListError,
    },
    #[error("scan runner build error")]
    ScanRunnerBuildError {
        #[from]
        err: ScanRunnerBuildError,
    },
    #[error("device allocation failed")]
    DeviceAllocationFailed {
        batch_index: usize,
        #[source]
        err: DeviceAllocationError,
    },
    #[error("scan setup failed")]
    ScanSetupFailed {
        #[source]
        err: ScanError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("no tests to run")]
    NoTestsRun { test_list: Option<Utf8PathBuf> },
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn scan_error(err: ScanError) -> Self {
        match err {
            ScanError::DeviceAllocation { batch_index, error } => Self::DeviceAllocationFailed {
                batch_index,
                err: error,
            },
            err => Self::ScanSetupFailed { err },
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ScanRunnerBuildError { .. }
            | Self::ScanSetupFailed { .. } => MultiscanExitCode::SETUP_ERROR,
            Self::TestListError { .. } => MultiscanExitCode::TEST_LIST_CREATION_FAILED,
            Self::DeviceAllocationFailed { .. } => MultiscanExitCode::DEVICE_ALLOCATION_FAILED,
            Self::WriteOutputError { .. } => MultiscanExitCode::WRITE_OUTPUT_ERROR,
            Self::NoTestsRun { .. } => MultiscanExitCode::NO_TESTS_RUN,
            Self::TestRunFailed => MultiscanExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse multiscan config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::TestListError { err } => {
                error!("failed to build the test list");
                Some(err as &dyn Error)
            }
            Self::ScanRunnerBuildError { err } => {
                error!("failed to build the scan runner");
                Some(err as &dyn Error)
            }
            Self::DeviceAllocationFailed { batch_index, err } => {
                error!(
                    "failed to allocate a device for batch {}",
                    batch_index.style(styles.count)
                );
                Some(err as &dyn Error)
            }
            Self::ScanSetupFailed { err } => {
                error!("failed to set up the scan");
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::NoTestsRun { test_list } => {
                match test_list {
                    Some(path) => error!("no tests found in `{}`", path.style(styles.bold)),
                    None => error!(
                        "no tests to run: pass `{}` or list tests in the config",
                        "--test-list".style(styles.bold)
                    ),
                }
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
