// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test engine: the external program that actually runs tests.
//!
//! multiscan never runs tests itself. For every try of every batch it builds an
//! [`EngineInvocation`] and hands it to a [`TestEngine`]. The engine's only job is to run the
//! requested tests, write the requested reports, and say whether tests failed.

use crate::{
    devices::Device, errors::EngineError, report_name::AttemptReports, test_list::TestIdentifier,
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::{FutureExt, future::BoxFuture};
use itertools::Itertools;
use std::{process::Stdio, sync::Arc};
use tracing::debug;

/// Options that differ between parallel batches.
///
/// Concurrent batches must not share a device or any on-disk build state, so each parallel
/// worker gets its own set. Only the fields listed here are ever overridden per batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchOverrides {
    /// The device to run on. `None` lets the engine pick.
    pub destination: Option<String>,

    /// A private derived data directory for the batch.
    pub derived_data_path: Option<Utf8PathBuf>,

    /// A private build log directory for the batch.
    pub buildlog_path: Option<Utf8PathBuf>,
}

impl BatchOverrides {
    /// The directory under the output root that per-batch build state is kept in.
    pub const STATE_DIR: &'static str = ".multiscan";

    /// Returns the overrides for a parallel batch bound to `device`.
    pub fn for_batch(output_root: &Utf8Path, batch_index: usize, device: &Device) -> Self {
        let batch_dir = output_root
            .join(Self::STATE_DIR)
            .join(format!("batch-{batch_index}"));
        Self {
            destination: Some(device.id.clone()),
            derived_data_path: Some(batch_dir.join("derived-data")),
            buildlog_path: Some(batch_dir.join("buildlogs")),
        }
    }
}

/// A request to run one try of a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineInvocation {
    /// The batch being run.
    pub batch_index: usize,

    /// The try number, starting from 1.
    pub try_number: usize,

    /// The tests to run, in order.
    pub tests: Vec<TestIdentifier>,

    /// The directory reports are written to.
    pub output_directory: Utf8PathBuf,

    /// The reports to write for this try, relative to [`Self::output_directory`].
    pub reports: AttemptReports,

    /// Whether to collect code coverage.
    pub code_coverage: bool,

    /// Batch-specific overrides.
    pub overrides: BatchOverrides,
}

/// Runs tests on behalf of multiscan.
pub trait TestEngine: Send + Sync {
    /// Runs the tests in `invocation`.
    ///
    /// Returns `Ok(())` if every test passed, [`EngineError::TestsFailed`] if the engine ran and
    /// some tests failed, and any other error if the engine itself failed.
    fn run<'a>(&'a self, invocation: &'a EngineInvocation) -> BoxFuture<'a, Result<(), EngineError>>;
}

/// A [`TestEngine`] that runs a program for every try.
#[derive(Clone, Debug)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    test_failure_exit_codes: Vec<i32>,
}

impl CommandEngine {
    /// Environment variable set to the batch index.
    pub const BATCH_INDEX_ENV: &'static str = "MULTISCAN_BATCH_INDEX";

    /// Environment variable set to the try number.
    pub const TRY_NUMBER_ENV: &'static str = "MULTISCAN_TRY_NUMBER";

    /// Creates a new engine.
    ///
    /// `test_failure_exit_codes` lists the exit codes that mean tests failed.
    pub fn new(program: String, args: Vec<String>, test_failure_exit_codes: Vec<i32>) -> Self {
        Self {
            program,
            args,
            test_failure_exit_codes,
        }
    }

    /// Returns the arguments passed to the program for `invocation`.
    pub fn command_args(&self, invocation: &EngineInvocation) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--output-directory".to_owned());
        args.push(invocation.output_directory.to_string());
        args.push("--output-types".to_owned());
        args.push(
            invocation
                .reports
                .reports
                .iter()
                .map(|(output_type, _)| output_type)
                .join(","),
        );
        args.push("--output-files".to_owned());
        args.push(
            invocation
                .reports
                .reports
                .iter()
                .map(|(_, name)| name)
                .join(","),
        );
        for test in &invocation.tests {
            args.push("--only-testing".to_owned());
            args.push(test.to_string());
        }

        let overrides = &invocation.overrides;
        if let Some(destination) = &overrides.destination {
            args.push("--destination".to_owned());
            args.push(destination.clone());
        }
        if let Some(path) = &overrides.derived_data_path {
            args.push("--derived-data-path".to_owned());
            args.push(path.to_string());
        }
        if let Some(path) = &overrides.buildlog_path {
            args.push("--buildlog-path".to_owned());
            args.push(path.to_string());
        }
        if invocation.code_coverage {
            args.push("--code-coverage".to_owned());
        }
        args
    }

    async fn run_impl(&self, invocation: &EngineInvocation) -> Result<(), EngineError> {
        let args = self.command_args(invocation);
        let command_str =
            shell_words::join(std::iter::once(self.program.as_str()).chain(args.iter().map(String::as_str)));

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .env(Self::BATCH_INDEX_ENV, invocation.batch_index.to_string())
            .env(Self::TRY_NUMBER_ENV, invocation.try_number.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(
            batch_index = invocation.batch_index,
            try_number = invocation.try_number,
            "running `{command_str}`"
        );
        let status = cmd.status().await.map_err(|error| EngineError::Spawn {
            command: command_str.clone(),
            error: Arc::new(error),
        })?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) if self.test_failure_exit_codes.contains(&code) => {
                Err(EngineError::TestsFailed)
            }
            Some(exit_code) => Err(EngineError::ExitCode {
                command: command_str,
                exit_code,
            }),
            None => Err(EngineError::Signaled {
                command: command_str,
            }),
        }
    }
}

impl TestEngine for CommandEngine {
    fn run<'a>(&'a self, invocation: &'a EngineInvocation) -> BoxFuture<'a, Result<(), EngineError>> {
        self.run_impl(invocation).boxed()
    }
}
