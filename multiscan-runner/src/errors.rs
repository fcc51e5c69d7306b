// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by multiscan.

use crate::{devices::DeviceConstraint, report_name::OutputType};
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error, fmt, sync::Arc};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse multiscan config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A value was syntactically valid but not acceptable.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// The config key.
        key: &'static str,

        /// Why the value is invalid.
        reason: String,
    },

    /// The output types and files could not be paired up.
    #[error(transparent)]
    ReportNamer(#[from] ReportNamerError),
}

/// An error returned while parsing an [`OutputType`] value from a string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "unrecognized output type: {input}\n(known values: {})",
    OutputType::variants().join(", "),
)]
pub struct OutputTypeParseError {
    input: String,
}

impl OutputTypeParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurs while pairing output types with output file names.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReportNamerError {
    /// An output type wasn't recognized.
    #[error(transparent)]
    OutputType(#[from] OutputTypeParseError),

    /// The number of output types doesn't match the number of output files.
    #[error(
        "count of output types ({}) does not match the output file names ({})",
        .output_types.join(", "),
        .output_files.join(", "),
    )]
    CountMismatch {
        /// The output types, after `junit` was added if necessary.
        output_types: Vec<String>,

        /// The output file names.
        output_files: Vec<String>,
    },
}

/// An error that occurred while reading or parsing a test list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestListError {
    /// The test list file couldn't be read.
    #[error("failed to read test list at `{path}`")]
    Read {
        /// The path to the test list.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A test identifier was malformed.
    #[error("invalid test identifier `{input}`: {reason}")]
    InvalidIdentifier {
        /// The input that failed to parse.
        input: String,

        /// Why it failed to parse.
        reason: &'static str,
    },

    /// The batch count was zero.
    #[error("batch count must be at least 1")]
    ZeroBatchCount,
}

/// An error that occurred while parsing a platform version.
#[derive(Clone, Debug, Error)]
#[error("invalid platform version `{input}`")]
pub struct PlatformVersionParseError {
    input: String,
    #[source]
    error: Arc<semver::Error>,
}

impl PlatformVersionParseError {
    pub(crate) fn new(input: impl Into<String>, error: semver::Error) -> Self {
        Self {
            input: input.into(),
            error: Arc::new(error),
        }
    }
}

/// An error that occurred while reading a test report.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ReportReadError {
    /// The report couldn't be read from disk.
    #[error("failed to read report at `{path}`")]
    Read {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Arc<std::io::Error>,
    },

    /// The report isn't well-formed XML.
    #[error("failed to parse report at `{path}`")]
    Parse {
        /// The path to the report.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Arc<quick_xml::Error>,
    },
}

/// An error that occurred while merging the per-try reports of a batch.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum CollateError {
    /// A per-try JUnit report couldn't be read.
    #[error("failed to read per-try report")]
    ReadReport(#[from] ReportReadError),

    /// The merged JUnit report couldn't be written out.
    #[error("failed to write collated JUnit report to `{path}`")]
    WriteJunit {
        /// The destination path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Arc<quick_junit::SerializeError>,
    },

    /// A filesystem operation failed.
    #[error("error performing filesystem operation on `{path}`")]
    Fs {
        /// The path the operation was performed on.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Arc<std::io::Error>,
    },
}

impl CollateError {
    pub(crate) fn fs(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self::Fs {
            path: path.into(),
            error: Arc::new(error),
        }
    }
}

/// No free device in the pool satisfied a batch's requirements.
#[derive(Clone, Debug, Error)]
#[error("no free device satisfies {constraint} ({free} of {total} devices free)")]
pub struct DeviceAllocationError {
    constraint: DeviceConstraint,
    free: usize,
    total: usize,
}

impl DeviceAllocationError {
    pub(crate) fn new(constraint: DeviceConstraint, free: usize, total: usize) -> Self {
        Self {
            constraint,
            free,
            total,
        }
    }

    /// Returns the constraint that couldn't be satisfied.
    pub fn constraint(&self) -> &DeviceConstraint {
        &self.constraint
    }
}

/// An error returned by a [`TestEngine`](crate::engine::TestEngine).
///
/// [`EngineError::TestsFailed`] is the only retryable variant. Every other variant is an
/// infrastructure failure.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The engine ran, and one or more tests failed.
    #[error("one or more tests failed")]
    TestsFailed,

    /// The engine process could not be started.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command line that was run.
        command: String,

        /// The underlying error.
        #[source]
        error: Arc<std::io::Error>,
    },

    /// The engine exited with a code that doesn't indicate test failures.
    #[error("`{command}` exited with code {exit_code}")]
    ExitCode {
        /// The command line that was run.
        command: String,

        /// The exit code.
        exit_code: i32,
    },

    /// The engine was terminated by a signal.
    #[error("`{command}` was terminated by a signal")]
    Signaled {
        /// The command line that was run.
        command: String,
    },

    /// Any other infrastructure failure reported by an engine implementation.
    #[error("{message}")]
    Infrastructure {
        /// A description of the failure.
        message: String,
    },
}

impl EngineError {
    /// Creates a new infrastructure failure with the given message.
    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates that tests failed, as opposed to the engine itself.
    pub fn is_test_failure(&self) -> bool {
        matches!(self, Self::TestsFailed)
    }
}

/// A non-retryable failure that ended a batch early.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum BatchFatalError {
    /// The batch output directory couldn't be prepared.
    #[error("failed to prepare output directory `{path}`")]
    Setup {
        /// The output directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: Arc<std::io::Error>,
    },

    /// The engine failed for reasons other than test failures.
    #[error("test engine failed on try {try_number}")]
    Engine {
        /// The try that failed.
        try_number: usize,

        /// The underlying error.
        #[source]
        error: EngineError,
    },

    /// Tests failed, but the failed tests couldn't be read back from the report.
    #[error("failed to determine failed tests after try {try_number}")]
    FailureReport {
        /// The try whose report couldn't be read.
        try_number: usize,

        /// The underlying error.
        #[source]
        error: ReportReadError,
    },
}

/// An error that aborted a whole scan before or while batches were being set up.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScanError {
    /// A device couldn't be allocated for a batch.
    #[error("failed to allocate a device for batch {batch_index}")]
    DeviceAllocation {
        /// The batch that couldn't be bound to a device.
        batch_index: usize,

        /// The underlying error.
        #[source]
        error: DeviceAllocationError,
    },

    /// The runner couldn't be built.
    #[error(transparent)]
    Build(#[from] ScanRunnerBuildError),
}

/// An error that occurred while building a [`ScanRunner`](crate::runner::ScanRunner).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScanRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// The retry policy allows no tries at all.
    #[error("try count must be at least 1")]
    ZeroTryCount,
}

/// Displays an error along with its chain of sources on a single line.
pub struct DisplayErrorChain<E>(E);

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
