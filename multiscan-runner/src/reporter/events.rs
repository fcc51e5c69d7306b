// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    collate::CollatedReports,
    devices::Device,
    errors::{BatchFatalError, CollateError},
    runner::RunStats,
    test_list::TestIdentifier,
    time::StopwatchStart,
};
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset, Local};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// A scan event.
///
/// Events are produced by a [`ScanRunner`](crate::runner::ScanRunner) and passed to the callback
/// given to [`ScanRunner::execute`](crate::runner::ScanRunner::execute).
#[derive(Clone, Debug)]
pub struct ScanEvent {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the scan.
    pub elapsed: Duration,

    /// The kind of scan event this is.
    pub kind: ScanEventKind,
}

/// The kind of scan event this is.
///
/// Forms part of [`ScanEvent`].
#[derive(Clone, Debug)]
pub enum ScanEventKind {
    /// The scan started.
    RunStarted {
        /// The number of batches that will run.
        batch_count: usize,

        /// The total number of tests across all batches.
        test_count: usize,

        /// The maximum number of tries per batch.
        max_tries: usize,

        /// Whether batches run in parallel.
        parallel: bool,
    },

    /// A batch started its first try.
    BatchStarted {
        /// The batch index.
        batch_index: usize,

        /// The testable the batch belongs to.
        testable: String,

        /// The number of tests in the batch.
        test_count: usize,

        /// The directory the batch writes its reports to.
        output_directory: Utf8PathBuf,

        /// The device the batch is bound to, in parallel mode.
        device: Option<Device>,
    },

    /// A try of a batch finished, and tests either passed or failed.
    TryFinished {
        /// The batch index.
        batch_index: usize,

        /// The maximum number of tries for the batch.
        max_tries: usize,

        /// What happened during the try.
        record: TryRecord,
    },

    /// A batch is about to be retried.
    BatchRetrying {
        /// The batch index.
        batch_index: usize,

        /// The try about to start.
        try_number: usize,

        /// The tests that will be re-run.
        test_count: usize,

        /// How long the runner will wait before starting the try.
        delay: Duration,
    },

    /// A batch finished, and its reports were collated.
    BatchFinished {
        /// A summary of the batch.
        summary: BatchRunSummary,
    },

    /// A parallel worker stopped without reporting a result.
    BatchCrashed {
        /// The batch index.
        batch_index: usize,
    },

    /// The scan finished.
    RunFinished {
        /// Statistics for the scan.
        stats: RunStats,
    },
}

/// The result of a single try, as classified by the retry loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TryResult {
    /// Every test passed.
    Passed,

    /// The engine reported test failures.
    TestsFailed {
        /// The failed tests read back from the try's JUnit report. Empty if the report named no
        /// failed tests or couldn't be read.
        failed: Vec<TestIdentifier>,
    },
}

impl TryResult {
    /// Returns true if the try passed.
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// A record of one try of a batch.
#[derive(Clone, Debug)]
pub struct TryRecord {
    /// The try number, starting from 1.
    pub try_number: usize,

    /// The tests this try ran.
    pub tests: Vec<TestIdentifier>,

    /// The outcome of the try.
    pub result: TryResult,

    /// The reports the try was asked to write.
    pub reports: Vec<Utf8PathBuf>,

    /// The time at which the try started.
    pub start_time: DateTime<Local>,

    /// How long the try took.
    pub time_taken: Duration,
}

/// The final verdict for a batch.
#[derive(Clone, Debug)]
pub enum BatchVerdict {
    /// Every test passed, possibly after retries.
    Passed,

    /// Tests were still failing when the batch stopped.
    Failed,

    /// The batch stopped because of an infrastructure failure.
    Fatal(BatchFatalError),
}

impl BatchVerdict {
    /// Returns true if the verdict is [`Self::Passed`].
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// A summary of a completed batch.
#[derive(Clone, Debug)]
pub struct BatchRunSummary {
    /// The batch index.
    pub batch_index: usize,

    /// The testable the batch belongs to.
    pub testable: String,

    /// The directory the batch wrote its reports to.
    pub output_directory: Utf8PathBuf,

    /// The device the batch ran on, in parallel mode.
    pub device: Option<Device>,

    /// Every try that ran to completion, in order.
    pub tries: Vec<TryRecord>,

    /// The final verdict of the retry loop.
    pub verdict: BatchVerdict,

    /// The number of retries this batch used.
    pub retries: usize,

    /// The collated reports, if collation succeeded.
    pub collated: Option<CollatedReports>,

    /// The collation error, if collation failed.
    pub collate_error: Option<CollateError>,

    /// The time at which the batch started.
    pub start_time: DateTime<Local>,

    /// How long the batch took, including collation.
    pub time_taken: Duration,
}

impl BatchRunSummary {
    /// Returns true if the batch passed and its reports were collated.
    pub fn passed(&self) -> bool {
        self.verdict.is_passed() && self.collate_error.is_none()
    }
}

/// Sends events from batches to the coordinator.
#[derive(Clone, Debug)]
pub(crate) struct EventSender {
    sender: UnboundedSender<ScanEvent>,
    run_stopwatch: StopwatchStart,
}

impl EventSender {
    pub(crate) fn new(sender: UnboundedSender<ScanEvent>, run_stopwatch: StopwatchStart) -> Self {
        Self {
            sender,
            run_stopwatch,
        }
    }

    pub(crate) fn send(&self, kind: ScanEventKind) {
        let event = ScanEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.run_stopwatch.snapshot().duration,
            kind,
        };
        // The receiver only goes away once the run is over.
        let _ = self.sender.send(event);
    }
}
