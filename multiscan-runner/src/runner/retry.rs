// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-batch retry loop.

use super::ScanOptions;
use crate::{
    devices::Device,
    engine::{BatchOverrides, EngineInvocation, TestEngine},
    errors::{BatchFatalError, DisplayErrorChain, EngineError},
    helpers::plural,
    junit::FailureExtractor,
    lifecycle::{FinishedLifecycle, TryLifecycle},
    reporter::{BatchVerdict, EventSender, ScanEventKind, TryResult},
    test_list::{TestBatch, TestIdentifier},
    time::stopwatch,
};
use camino::Utf8Path;
use debug_ignore::DebugIgnore;
use std::sync::Arc;
use tracing::{info, warn};

/// The cumulative number of retries across a whole scan.
///
/// Held by the coordinator. Batches report how many retries they used when they finish, and the
/// coordinator adds them up. The count never decreases.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryCounter {
    total: usize,
}

impl RetryCounter {
    /// Creates a new counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the retries used by one batch.
    pub fn record(&mut self, retries: usize) {
        self.total += retries;
    }

    /// Returns the total number of retries so far.
    pub fn total(&self) -> usize {
        self.total
    }
}

/// The classified result of one try.
#[derive(Clone, Debug)]
pub enum TryOutcome {
    /// Every test passed.
    Passed,

    /// Tests failed. Contains the failed tests read back from the try's JUnit report.
    TestsFailed(Vec<TestIdentifier>),

    /// The try failed in a way that retrying can't fix.
    Fatal(BatchFatalError),
}

/// What the retry loop of a batch produced.
#[derive(Debug)]
pub(crate) struct RetryLoopOutcome {
    pub(crate) verdict: BatchVerdict,
    pub(crate) retries: usize,
    // Includes a final try that failed fatally, so its reports (if any) are collated.
    pub(crate) tries_run: usize,
    pub(crate) lifecycle: FinishedLifecycle,
}

/// Drives one batch through up to the configured number of tries.
///
/// Cheap to clone: parallel workers each get their own copy.
#[derive(Clone, Debug)]
pub(crate) struct BatchRetrier {
    engine: DebugIgnore<Arc<dyn TestEngine>>,
    extractor: Arc<dyn FailureExtractor>,
    options: Arc<ScanOptions>,
    events: EventSender,
}

impl BatchRetrier {
    pub(crate) fn new(
        engine: Arc<dyn TestEngine>,
        extractor: Arc<dyn FailureExtractor>,
        options: Arc<ScanOptions>,
        events: EventSender,
    ) -> Self {
        Self {
            engine: DebugIgnore(engine),
            extractor,
            options,
            events,
        }
    }

    pub(crate) fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) async fn run(
        &self,
        batch: &TestBatch,
        output_directory: &Utf8Path,
        device: Option<&Device>,
        overrides: BatchOverrides,
    ) -> RetryLoopOutcome {
        let options = &*self.options;
        let max_tries = options.retry_policy.count();
        let mut lifecycle = TryLifecycle::new(
            batch,
            output_directory,
            &options.report_namer,
            max_tries,
            device,
            &self.events,
        );

        if let Err(error) = lifecycle.before_batch() {
            return RetryLoopOutcome {
                verdict: BatchVerdict::Fatal(error),
                retries: 0,
                tries_run: 0,
                lifecycle: lifecycle.finish(),
            };
        }

        let mut delays = options.retry_policy.delays();
        let mut tests = batch.tests.clone();
        let mut retries = 0;
        let mut try_number = 0;

        let verdict = loop {
            try_number += 1;
            let invocation = EngineInvocation {
                batch_index: batch.index,
                try_number,
                tests: tests.clone(),
                output_directory: output_directory.to_owned(),
                reports: options.report_namer.attempt_reports(try_number),
                // Coverage from partial re-runs can't be merged meaningfully.
                code_coverage: options.code_coverage && try_number == 1,
                overrides: overrides.clone(),
            };

            let start = stopwatch();
            let result = self.engine.run(&invocation).await;
            let timing = start.snapshot();

            match self.classify(&invocation, result, max_tries) {
                TryOutcome::Passed => {
                    lifecycle.after_attempt(try_number, &tests, TryResult::Passed, timing);
                    break BatchVerdict::Passed;
                }
                TryOutcome::TestsFailed(failed) => {
                    lifecycle.after_attempt(
                        try_number,
                        &tests,
                        TryResult::TestsFailed {
                            failed: failed.clone(),
                        },
                        timing,
                    );
                    if try_number >= max_tries {
                        break BatchVerdict::Failed;
                    }
                    if failed.is_empty() {
                        warn!(
                            batch_index = batch.index,
                            "tests failed on try {try_number}, but the report names no failed \
                             tests: not retrying"
                        );
                        break BatchVerdict::Failed;
                    }

                    retries += 1;
                    let delay = delays.next().unwrap_or_default();
                    info!(
                        batch_index = batch.index,
                        "retrying {} failed {} (try {} of {max_tries})",
                        failed.len(),
                        plural::tests_str(failed.len()),
                        try_number + 1,
                    );
                    self.events.send(ScanEventKind::BatchRetrying {
                        batch_index: batch.index,
                        try_number: try_number + 1,
                        test_count: failed.len(),
                        delay,
                    });
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    tests = failed;
                }
                TryOutcome::Fatal(error) => {
                    warn!(
                        batch_index = batch.index,
                        "batch stopped: {}",
                        DisplayErrorChain::new(&error),
                    );
                    break BatchVerdict::Fatal(error);
                }
            }
        };

        RetryLoopOutcome {
            verdict,
            retries,
            tries_run: try_number,
            lifecycle: lifecycle.finish(),
        }
    }

    /// Classifies the engine's result for a try.
    ///
    /// On test failures, the failed tests are read from the try's JUnit report. An unreadable
    /// report is fatal if the batch would otherwise be retried, since there's no way to know what
    /// to re-run. On the last try, it's only logged.
    fn classify(
        &self,
        invocation: &EngineInvocation,
        result: Result<(), EngineError>,
        max_tries: usize,
    ) -> TryOutcome {
        let try_number = invocation.try_number;
        match result {
            Ok(()) => TryOutcome::Passed,
            Err(EngineError::TestsFailed) => {
                let report = invocation.output_directory.join(invocation.reports.junit());
                match self.extractor.failed_tests(&report) {
                    Ok(failed) => TryOutcome::TestsFailed(failed),
                    Err(error) if try_number < max_tries => {
                        TryOutcome::Fatal(BatchFatalError::FailureReport { try_number, error })
                    }
                    Err(error) => {
                        warn!(
                            batch_index = invocation.batch_index,
                            "{}",
                            DisplayErrorChain::new(&error),
                        );
                        TryOutcome::TestsFailed(Vec::new())
                    }
                }
            }
            Err(error) => TryOutcome::Fatal(BatchFatalError::Engine { try_number, error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_counter_accumulates() {
        let mut counter = RetryCounter::new();
        counter.record(2);
        counter.record(0);
        counter.record(1);
        assert_eq!(counter.total(), 3);
    }
}
