// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use futures::{FutureExt, future::BoxFuture};
use multiscan_runner::{
    config::RetryPolicy,
    devices::{Device, DevicePool},
    engine::{EngineInvocation, TestEngine},
    errors::EngineError,
    report_name::{OutputType, ReportNamer},
    reporter::{BatchRunSummary, ScanEvent, ScanEventKind},
    runner::{Collaborators, RunStats, ScanOptions, scan},
    test_list::{TestCollector, TestIdentifier},
};
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::{
    collections::HashMap,
    fs::File,
    sync::{Arc, Mutex},
    time::Duration,
};

/// How a fixture test behaves when the engine runs it.
#[derive(Clone, Copy, Debug)]
pub(crate) enum FixtureStatus {
    Pass,
    Fail,
    /// Fails until the given try, then passes.
    Flaky { pass_attempt: usize },
    /// Takes the whole engine down with a panic.
    Crash,
    /// Makes the engine report an infrastructure failure.
    Infrastructure,
}

impl FixtureStatus {
    fn passes_on(self, try_number: usize) -> bool {
        match self {
            Self::Pass => true,
            Self::Fail | Self::Crash | Self::Infrastructure => false,
            Self::Flaky { pass_attempt } => try_number >= pass_attempt,
        }
    }
}

/// A test engine that writes JUnit reports according to a script.
///
/// Tests not named in the script pass.
#[derive(Debug, Default)]
pub(crate) struct FixtureEngine {
    statuses: HashMap<String, FixtureStatus>,
    unreported_failures: bool,
    invocations: Mutex<Vec<EngineInvocation>>,
}

impl FixtureEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_status(mut self, test: &str, status: FixtureStatus) -> Self {
        self.statuses.insert(test.to_owned(), status);
        self
    }

    /// Reports failures through the exit status only, leaving every test passing in the JUnit
    /// report.
    pub(crate) fn with_unreported_failures(mut self) -> Self {
        self.unreported_failures = true;
        self
    }

    /// Returns every invocation seen so far, ordered by batch then try.
    pub(crate) fn invocations(&self) -> Vec<EngineInvocation> {
        let mut invocations = self.invocations.lock().unwrap().clone();
        invocations.sort_by_key(|invocation| (invocation.batch_index, invocation.try_number));
        invocations
    }

    /// Returns the tests each try of a batch ran, in try order.
    pub(crate) fn tests_run(&self, batch_index: usize) -> Vec<Vec<String>> {
        self.invocations()
            .into_iter()
            .filter(|invocation| invocation.batch_index == batch_index)
            .map(|invocation| {
                invocation
                    .tests
                    .iter()
                    .map(|test| test.as_str().to_owned())
                    .collect()
            })
            .collect()
    }

    fn status(&self, test: &TestIdentifier) -> FixtureStatus {
        self.statuses
            .get(test.as_str())
            .copied()
            .unwrap_or(FixtureStatus::Pass)
    }

    fn run_sync(&self, invocation: &EngineInvocation) -> Result<(), EngineError> {
        self.invocations.lock().unwrap().push(invocation.clone());

        let statuses: Vec<_> = invocation
            .tests
            .iter()
            .map(|test| (test, self.status(test)))
            .collect();
        if statuses
            .iter()
            .any(|(_, status)| matches!(status, FixtureStatus::Crash))
        {
            panic!("fixture engine crashed on batch {}", invocation.batch_index);
        }
        if statuses
            .iter()
            .any(|(_, status)| matches!(status, FixtureStatus::Infrastructure))
        {
            return Err(EngineError::infrastructure("simulator failed to boot"));
        }

        let mut any_failed = false;
        let mut suites: Vec<TestSuite> = Vec::new();
        for (test, status) in &statuses {
            let (classname, name) = split_identifier(test);
            let passed = status.passes_on(invocation.try_number);
            any_failed |= !passed;
            let case_status = if passed || self.unreported_failures {
                TestCaseStatus::success()
            } else {
                let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                status.set_message(format!("{test} failed on try {}", invocation.try_number));
                status
            };
            let mut test_case = TestCase::new(name, case_status);
            test_case
                .set_classname(classname.clone())
                .set_time(Duration::from_millis(10));

            match suites.iter_mut().find(|suite| suite.name.as_str() == classname) {
                Some(suite) => {
                    suite.add_test_case(test_case);
                }
                None => {
                    let mut suite = TestSuite::new(classname);
                    suite.add_test_case(test_case);
                    suites.push(suite);
                }
            }
        }

        write_reports(invocation, suites);
        if any_failed {
            Err(EngineError::TestsFailed)
        } else {
            Ok(())
        }
    }
}

impl TestEngine for FixtureEngine {
    fn run<'a>(
        &'a self,
        invocation: &'a EngineInvocation,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move { self.run_sync(invocation) }.boxed()
    }
}

fn split_identifier(test: &TestIdentifier) -> (String, String) {
    let (class, name) = test
        .as_str()
        .rsplit_once('/')
        .expect("fixture identifiers have at least two components");
    (class.replace('/', "."), name.to_owned())
}

fn write_reports(invocation: &EngineInvocation, suites: Vec<TestSuite>) {
    std::fs::create_dir_all(&invocation.output_directory).unwrap();
    for (output_type, name) in &invocation.reports.reports {
        let path = invocation.output_directory.join(name);
        match output_type {
            OutputType::Junit => {
                let mut report = Report::new("fixture");
                report.add_test_suites(suites.clone());
                report.serialize(File::create(&path).unwrap()).unwrap();
            }
            other => {
                std::fs::write(&path, format!("{other} for try {}", invocation.try_number))
                    .unwrap();
            }
        }
    }
}

/// A scan under a temporary directory.
pub(crate) struct ScanFixture {
    _dir: Utf8TempDir,
    pub(crate) options: ScanOptions,
}

impl ScanFixture {
    pub(crate) fn new(max_tries: usize) -> Self {
        Self::with_namer(max_tries, ReportNamer::new(None, None, None).unwrap())
    }

    pub(crate) fn with_namer(max_tries: usize, namer: ReportNamer) -> Self {
        let dir = Utf8TempDir::new().unwrap();
        let mut options = ScanOptions::new(dir.path().join("test_results"), namer);
        options.retry_policy = RetryPolicy::new_without_delay(max_tries);
        options.detach_grace_period = Duration::ZERO;
        Self { _dir: dir, options }
    }

    pub(crate) fn output_root(&self) -> &Utf8Path {
        &self.options.output_directory
    }

    /// Runs a scan, returning its stats and every event it produced.
    pub(crate) fn run(
        &self,
        collector: &TestCollector,
        collaborators: Collaborators,
    ) -> (RunStats, Vec<ScanEvent>) {
        let mut events = Vec::new();
        let stats = scan(collector, self.options.clone(), collaborators, |event| {
            events.push(event)
        })
        .expect("scan set up successfully");
        (stats, events)
    }
}

pub(crate) fn collector(tests: &[&str], batch_count: usize) -> TestCollector {
    TestCollector::parse(&tests.join("\n"), batch_count).unwrap()
}

pub(crate) fn collaborators(engine: &Arc<FixtureEngine>) -> Collaborators {
    Collaborators::new(engine.clone())
}

pub(crate) fn device_pool(count: usize) -> DevicePool {
    DevicePool::new((0..count).map(|i| Device {
        id: format!("SIM-{i}"),
        name: format!("Simulator {i}"),
        platform_version: "16.4".parse().unwrap(),
    }))
}

/// Returns the batch summaries in the order batches finished.
pub(crate) fn finished_batches(events: &[ScanEvent]) -> Vec<&BatchRunSummary> {
    events
        .iter()
        .filter_map(|event| match &event.kind {
            ScanEventKind::BatchFinished { summary } => Some(summary),
            _ => None,
        })
        .collect()
}
