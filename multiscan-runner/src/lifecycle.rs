// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hooks run around the tries of a batch.

use crate::{
    devices::Device,
    errors::BatchFatalError,
    report_name::ReportNamer,
    reporter::{EventSender, ScanEventKind, TryRecord, TryResult},
    test_list::{TestBatch, TestIdentifier},
    time::{StopwatchSnapshot, StopwatchStart, stopwatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-batch hooks invoked before the first try and after every try.
///
/// Owns the records of every try, which end up in the batch's summary.
#[derive(Debug)]
pub(crate) struct TryLifecycle<'a> {
    batch: &'a TestBatch,
    output_directory: &'a Utf8Path,
    namer: &'a ReportNamer,
    max_tries: usize,
    device: Option<&'a Device>,
    events: &'a EventSender,
    stopwatch: StopwatchStart,
    tries: Vec<TryRecord>,
}

impl<'a> TryLifecycle<'a> {
    pub(crate) fn new(
        batch: &'a TestBatch,
        output_directory: &'a Utf8Path,
        namer: &'a ReportNamer,
        max_tries: usize,
        device: Option<&'a Device>,
        events: &'a EventSender,
    ) -> Self {
        Self {
            batch,
            output_directory,
            namer,
            max_tries,
            device,
            events,
            stopwatch: stopwatch(),
            tries: Vec::new(),
        }
    }

    /// Prepares the batch's output directory and announces the batch.
    ///
    /// Reports left behind by an earlier run under any name this batch could produce are removed,
    /// so they can never be mistaken for this run's reports.
    pub(crate) fn before_batch(&mut self) -> Result<(), BatchFatalError> {
        let setup_error = |path: &Utf8Path, error| BatchFatalError::Setup {
            path: path.to_owned(),
            error: Arc::new(error),
        };

        std::fs::create_dir_all(self.output_directory)
            .map_err(|error| setup_error(self.output_directory, error))?;

        for attempt in self.namer.all_attempt_reports(self.max_tries) {
            for (_, name) in &attempt.reports {
                let path = self.output_directory.join(name);
                if path.exists() {
                    debug!("removing stale report `{path}`");
                    std::fs::remove_file(&path).map_err(|error| setup_error(&path, error))?;
                }
            }
        }

        self.stopwatch = stopwatch();
        info!(
            batch_index = self.batch.index,
            "starting batch of {} tests from {}",
            self.batch.tests.len(),
            self.batch.testable,
        );
        self.events.send(ScanEventKind::BatchStarted {
            batch_index: self.batch.index,
            testable: self.batch.testable.clone(),
            test_count: self.batch.tests.len(),
            output_directory: self.output_directory.to_owned(),
            device: self.device.cloned(),
        });
        Ok(())
    }

    /// Records a try that ran to completion, and announces it.
    pub(crate) fn after_attempt(
        &mut self,
        try_number: usize,
        tests: &[TestIdentifier],
        result: TryResult,
        timing: StopwatchSnapshot,
    ) {
        let reports = self
            .namer
            .attempt_reports(try_number)
            .reports
            .into_iter()
            .map(|(_, name)| self.output_directory.join(name))
            .collect();
        let record = TryRecord {
            try_number,
            tests: tests.to_vec(),
            result,
            reports,
            start_time: timing.start_time,
            time_taken: timing.duration,
        };
        debug!(
            batch_index = self.batch.index,
            try_number,
            passed = record.result.is_passed(),
            "try finished in {:?}",
            record.time_taken,
        );
        self.events.send(ScanEventKind::TryFinished {
            batch_index: self.batch.index,
            max_tries: self.max_tries,
            record: record.clone(),
        });
        self.tries.push(record);
    }

    /// Consumes the lifecycle, returning the try records and batch timing.
    pub(crate) fn finish(self) -> FinishedLifecycle {
        let snapshot = self.stopwatch.snapshot();
        FinishedLifecycle {
            output_directory: self.output_directory.to_owned(),
            tries: self.tries,
            start_time: snapshot.start_time,
            time_taken: snapshot.duration,
        }
    }
}

#[derive(Debug)]
pub(crate) struct FinishedLifecycle {
    pub(crate) output_directory: Utf8PathBuf,
    pub(crate) tries: Vec<TryRecord>,
    pub(crate) start_time: DateTime<Local>,
    pub(crate) time_taken: std::time::Duration,
}
