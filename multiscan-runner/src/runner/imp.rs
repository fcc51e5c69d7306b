// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    RetryCounter,
    parallel::{ParallelSupervisor, WorkerResult},
    retry::BatchRetrier,
};
use crate::{
    collate::ReportCollator,
    config::RetryPolicy,
    devices::{BatchMetadata, Device, DevicePool, ResourcePool, StaticMetadata},
    engine::{BatchOverrides, TestEngine},
    errors::{DisplayErrorChain, ScanError, ScanRunnerBuildError},
    junit::{FailureExtractor, JunitFailureExtractor},
    report_name::ReportNamer,
    reporter::{BatchRunSummary, BatchVerdict, EventSender, ScanEvent, ScanEventKind},
    test_list::{TestBatch, TestCollector},
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use std::{sync::Arc, time::Duration};
use tokio::{runtime::Runtime, sync::mpsc::unbounded_channel};
use tracing::{error, info};

/// Options for a scan, shared by every batch.
#[derive(Clone, Debug)]
pub struct ScanOptions {
    /// How many times each batch may be tried, and how long to wait between tries.
    pub retry_policy: RetryPolicy,

    /// Whether to run batches concurrently on separate devices.
    pub parallelize: bool,

    /// The root directory reports are written to.
    pub output_directory: Utf8PathBuf,

    /// Names the reports each try writes.
    pub report_namer: ReportNamer,

    /// Whether to collect code coverage (on the first try only).
    pub code_coverage: bool,

    /// How long a parallel worker waits after finishing so its device can detach.
    pub detach_grace_period: Duration,
}

impl ScanOptions {
    /// The default time given to a device to detach.
    pub const DEFAULT_DETACH_GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// Creates a new set of options that writes to `output_directory` with default settings:
    /// one try per batch, sequential, JUnit reports only.
    pub fn new(output_directory: impl Into<Utf8PathBuf>, report_namer: ReportNamer) -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            parallelize: false,
            output_directory: output_directory.into(),
            report_namer,
            code_coverage: false,
            detach_grace_period: Self::DEFAULT_DETACH_GRACE_PERIOD,
        }
    }
}

/// The external systems a scan talks to.
pub struct Collaborators {
    /// Runs tests.
    pub engine: Arc<dyn TestEngine>,

    /// Reads failed tests out of reports.
    pub failure_extractor: Arc<dyn FailureExtractor>,

    /// Provides per-testable device requirements (parallel mode only).
    pub metadata: Arc<dyn BatchMetadata>,

    /// Hands out devices (parallel mode only).
    pub resource_pool: Box<dyn ResourcePool>,
}

impl Collaborators {
    /// Creates a new set of collaborators around `engine`, reading JUnit reports and with no
    /// devices or testable metadata.
    pub fn new(engine: Arc<dyn TestEngine>) -> Self {
        Self {
            engine,
            failure_extractor: Arc::new(JunitFailureExtractor),
            metadata: Arc::new(StaticMetadata::default()),
            resource_pool: Box::new(DevicePool::default()),
        }
    }

    /// Sets the failure extractor.
    pub fn with_failure_extractor(mut self, extractor: Arc<dyn FailureExtractor>) -> Self {
        self.failure_extractor = extractor;
        self
    }

    /// Sets the batch metadata.
    pub fn with_metadata(mut self, metadata: Arc<dyn BatchMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the resource pool.
    pub fn with_resource_pool(mut self, pool: Box<dyn ResourcePool>) -> Self {
        self.resource_pool = pool;
        self
    }
}

/// Scan runner options.
#[derive(Debug, Default)]
pub struct ScanRunnerBuilder {
    retry_policy: Option<RetryPolicy>,
    parallelize: Option<bool>,
}

impl ScanRunnerBuilder {
    /// Overrides the retry policy from [`ScanOptions`].
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) -> &mut Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Overrides whether batches run in parallel.
    pub fn set_parallelize(&mut self, parallelize: bool) -> &mut Self {
        self.parallelize = Some(parallelize);
        self
    }

    /// Creates a new scan runner.
    pub fn build(
        self,
        collector: &TestCollector,
        mut options: ScanOptions,
        collaborators: Collaborators,
    ) -> Result<ScanRunner, ScanRunnerBuildError> {
        if let Some(retry_policy) = self.retry_policy {
            options.retry_policy = retry_policy;
        }
        if let Some(parallelize) = self.parallelize {
            options.parallelize = parallelize;
        }
        if options.retry_policy.count() == 0 {
            return Err(ScanRunnerBuildError::ZeroTryCount);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("multiscan-runner-worker")
            .build()
            .map_err(ScanRunnerBuildError::TokioRuntimeCreate)?;

        let batches = collector
            .batches()
            .iter()
            .map(|batch| PlannedBatch {
                output_directory: collector.output_directory(
                    &options.output_directory,
                    batch,
                    options.parallelize,
                ),
                batch: batch.clone(),
            })
            .collect();

        Ok(ScanRunner {
            inner: ScanRunnerInner {
                batches,
                test_count: collector.test_count(),
                options: Arc::new(options),
                collaborators: DebugIgnore(collaborators),
            },
            runtime,
        })
    }
}

/// Context for running a scan.
///
/// Created using [`ScanRunnerBuilder::build`].
#[derive(Debug)]
pub struct ScanRunner {
    inner: ScanRunnerInner,
    runtime: Runtime,
}

impl ScanRunner {
    /// Returns the options this runner was built with.
    pub fn options(&self) -> &ScanOptions {
        &self.inner.options
    }

    /// Runs every batch.
    ///
    /// The callback is called with every event, on the calling thread.
    ///
    /// Returns an error if the scan couldn't be set up. Test failures are reported through
    /// [`RunStats`], not as errors.
    pub fn execute<F>(self, mut callback: F) -> Result<RunStats, ScanError>
    where
        F: FnMut(ScanEvent) + Send,
    {
        let Self { mut inner, runtime } = self;
        let (sender, mut receiver) = unbounded_channel();
        let events = EventSender::new(sender, stopwatch());

        let res = runtime.block_on(async {
            let run_fut = inner.run(events);
            let report_fut = async {
                // Ends once every sender, including those held by workers, is gone.
                while let Some(event) = receiver.recv().await {
                    callback(event);
                }
            };
            let (res, ()) = tokio::join!(run_fut, report_fut);
            res
        });

        // Shut down without waiting for anything the engine may have left behind.
        runtime.shutdown_background();
        res
    }
}

/// Builds a runner and runs every batch.
///
/// This is a convenience wrapper around [`ScanRunnerBuilder`] and [`ScanRunner::execute`].
pub fn scan<F>(
    collector: &TestCollector,
    options: ScanOptions,
    collaborators: Collaborators,
    callback: F,
) -> Result<RunStats, ScanError>
where
    F: FnMut(ScanEvent) + Send,
{
    let runner = ScanRunnerBuilder::default().build(collector, options, collaborators)?;
    runner.execute(callback)
}

/// Statistics for a scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of batches that ran.
    pub batch_count: usize,

    /// The total number of tests across all batches.
    pub test_count: usize,

    /// The number of batches that passed.
    pub batches_passed: usize,

    /// The number of batches that failed, including fatal failures.
    pub batches_failed: usize,

    /// The number of parallel workers that crashed.
    pub batches_crashed: usize,

    /// The total number of retries across every batch.
    pub retry_total_count: usize,

    /// How long the scan took.
    pub elapsed: Duration,
}

impl RunStats {
    /// Returns true if every batch passed.
    pub fn passed(&self) -> bool {
        self.batches_failed == 0 && self.batches_crashed == 0
    }

    fn record(&mut self, passed: bool) {
        if passed {
            self.batches_passed += 1;
        } else {
            self.batches_failed += 1;
        }
    }
}

#[derive(Clone, Debug)]
struct PlannedBatch {
    batch: TestBatch,
    output_directory: Utf8PathBuf,
}

#[derive(Debug)]
struct ScanRunnerInner {
    batches: Vec<PlannedBatch>,
    test_count: usize,
    options: Arc<ScanOptions>,
    collaborators: DebugIgnore<Collaborators>,
}

impl ScanRunnerInner {
    async fn run(&mut self, events: EventSender) -> Result<RunStats, ScanError> {
        let run_stopwatch = stopwatch();
        let max_tries = self.options.retry_policy.count();
        events.send(ScanEventKind::RunStarted {
            batch_count: self.batches.len(),
            test_count: self.test_count,
            max_tries,
            parallel: self.options.parallelize,
        });
        info!(
            "running {} batches ({} tests, up to {max_tries} tries each)",
            self.batches.len(),
            self.test_count,
        );

        let retrier = BatchRetrier::new(
            self.collaborators.engine.clone(),
            self.collaborators.failure_extractor.clone(),
            self.options.clone(),
            events.clone(),
        );

        let mut stats = RunStats {
            batch_count: self.batches.len(),
            test_count: self.test_count,
            ..RunStats::default()
        };
        let mut counter = RetryCounter::new();

        if self.options.parallelize {
            self.run_parallel(&retrier, &events, &mut stats, &mut counter)
                .await?;
        } else {
            for planned in &self.batches {
                let summary = run_batch(
                    &retrier,
                    &planned.batch,
                    &planned.output_directory,
                    None,
                    BatchOverrides::default(),
                )
                .await;
                stats.record(summary.passed());
                counter.record(summary.retries);
            }
        }

        stats.retry_total_count = counter.total();
        stats.elapsed = run_stopwatch.snapshot().duration;
        events.send(ScanEventKind::RunFinished { stats });
        Ok(stats)
    }

    async fn run_parallel(
        &mut self,
        retrier: &BatchRetrier,
        events: &EventSender,
        stats: &mut RunStats,
        counter: &mut RetryCounter,
    ) -> Result<(), ScanError> {
        let batches: Vec<TestBatch> = self.batches.iter().map(|p| p.batch.clone()).collect();
        let output_dirs: Vec<Utf8PathBuf> = self
            .batches
            .iter()
            .map(|p| p.output_directory.clone())
            .collect();
        let output_root = self.options.output_directory.clone();

        let collaborators = &mut *self.collaborators;
        let mut supervisor = ParallelSupervisor::new(
            &mut *collaborators.resource_pool,
            &*collaborators.metadata,
            self.options.detach_grace_period,
            events.clone(),
        );

        let outcome = supervisor
            .run_all(&batches, |batch, allocation| {
                let retrier = retrier.clone();
                let batch = batch.clone();
                let device = allocation.device.clone();
                let output_directory = output_dirs[batch.index].clone();
                let overrides = BatchOverrides::for_batch(&output_root, batch.index, &device);
                async move {
                    let summary = run_batch(
                        &retrier,
                        &batch,
                        &output_directory,
                        Some(&device),
                        overrides,
                    )
                    .await;
                    WorkerResult {
                        passed: summary.passed(),
                        retries: summary.retries,
                    }
                }
            })
            .await?;

        for result in &outcome.results {
            if result.is_crashed() {
                stats.batches_crashed += 1;
            } else {
                stats.record(result.passed());
            }
            counter.record(result.retries());
        }
        Ok(())
    }
}

/// Runs a batch through its retry loop, then collates its reports.
///
/// Collation happens exactly once per batch, whatever state the retry loop ended in.
async fn run_batch(
    retrier: &BatchRetrier,
    batch: &TestBatch,
    output_directory: &Utf8Path,
    device: Option<&Device>,
    overrides: BatchOverrides,
) -> BatchRunSummary {
    let outcome = retrier
        .run(batch, output_directory, device, overrides)
        .await;

    // Collation reads, rewrites and deletes report files, so keep it off the async workers.
    let namer = retrier.options().report_namer.clone();
    let collate_dir = output_directory.to_owned();
    let tries_run = outcome.tries_run;
    let result = tokio::task::spawn_blocking(move || {
        ReportCollator::new(&namer).collate(&collate_dir, tries_run)
    })
    .await
    .unwrap_or_else(|join_error| std::panic::resume_unwind(join_error.into_panic()));
    let (collated, collate_error) = match result {
        Ok(collated) => (Some(collated), None),
        Err(error) => {
            error!(
                batch_index = batch.index,
                "failed to collate reports: {}",
                DisplayErrorChain::new(&error),
            );
            (None, Some(error))
        }
    };

    let lifecycle = outcome.lifecycle;
    let summary = BatchRunSummary {
        batch_index: batch.index,
        testable: batch.testable.clone(),
        output_directory: lifecycle.output_directory,
        device: device.cloned(),
        tries: lifecycle.tries,
        verdict: outcome.verdict,
        retries: outcome.retries,
        collated,
        collate_error,
        start_time: lifecycle.start_time,
        time_taken: lifecycle.time_taken,
    };

    match &summary.verdict {
        BatchVerdict::Passed => info!(batch_index = batch.index, "batch passed"),
        BatchVerdict::Failed => info!(batch_index = batch.index, "batch failed"),
        BatchVerdict::Fatal(_) => info!(batch_index = batch.index, "batch stopped early"),
    }
    retrier.events().send(ScanEventKind::BatchFinished {
        summary: summary.clone(),
    });
    summary
}
