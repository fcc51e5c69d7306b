// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino::Utf8Path;
use color_eyre::eyre::{Result, ensure};
use multiscan_runner::{
    errors::{BatchFatalError, ReportReadError, ScanError, ScanRunnerBuildError},
    junit::FailureExtractor,
    report_name::ReportNamer,
    reporter::{BatchVerdict, ScanEventKind},
    runner::scan,
    test_list::TestIdentifier,
};
use pretty_assertions::assert_eq;
use std::{io, sync::Arc};
use test_case::test_case;

const TEST_A: &str = "App/Suite/testA";
const TEST_B: &str = "App/Suite/testB";
const TEST_C: &str = "App/Suite/testC";

#[test]
fn passing_batch_runs_once() -> Result<()> {
    let fixture = ScanFixture::new(3);
    let engine = Arc::new(FixtureEngine::new());
    let (stats, events) = fixture.run(&collector(&[TEST_A, TEST_B], 1), collaborators(&engine));

    ensure!(stats.passed(), "scan passed: {stats:?}");
    assert_eq!(stats.retry_total_count, 0);
    assert_eq!(engine.tests_run(0), vec![vec![TEST_A, TEST_B]]);

    // A single testable writes straight into the output directory.
    let mut entries: Vec<_> = std::fs::read_dir(fixture.output_root())?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    entries.sort();
    assert_eq!(entries, vec!["report.junit"]);

    assert!(matches!(
        events.first().map(|event| &event.kind),
        Some(ScanEventKind::RunStarted { batch_count: 1, test_count: 2, max_tries: 3, .. })
    ));
    assert!(matches!(
        events.last().map(|event| &event.kind),
        Some(ScanEventKind::RunFinished { .. })
    ));
    Ok(())
}

#[test]
fn retry_runs_exactly_the_failed_tests() -> Result<()> {
    let fixture = ScanFixture::new(3);
    let engine = Arc::new(
        FixtureEngine::new()
            .with_status(TEST_B, FixtureStatus::Flaky { pass_attempt: 2 })
            .with_status(TEST_C, FixtureStatus::Fail),
    );
    let (stats, events) = fixture.run(
        &collector(&[TEST_A, TEST_B, TEST_C], 1),
        collaborators(&engine),
    );

    assert_eq!(
        engine.tests_run(0),
        vec![
            vec![TEST_A, TEST_B, TEST_C],
            vec![TEST_B, TEST_C],
            vec![TEST_C],
        ]
    );
    ensure!(!stats.passed(), "a test never passed");
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.retry_total_count, 2);

    let finished = finished_batches(&events);
    assert_eq!(finished.len(), 1, "reports are collated exactly once");
    let summary = finished[0];
    assert!(matches!(summary.verdict, BatchVerdict::Failed));
    assert_eq!(summary.tries.len(), 3);
    assert_eq!(summary.retries, 2);

    let collated = summary.collated.as_ref().expect("collation succeeded");
    let failed: Vec<_> = collated.failed().map(|t| t.identifier.as_str()).collect();
    let flaky: Vec<_> = collated.flaky().map(|t| t.identifier.as_str()).collect();
    assert_eq!(failed, vec![TEST_C]);
    assert_eq!(flaky, vec![TEST_B]);

    let root = fixture.output_root();
    assert_eq!(collated.junit_path.as_deref(), Some(&*root.join("report.junit")));
    ensure!(!root.join("report-2.junit").exists(), "per-try reports removed");
    ensure!(!root.join("report-3.junit").exists(), "per-try reports removed");
    Ok(())
}

#[test_case(1 ; "single try")]
#[test_case(2 ; "two tries")]
#[test_case(4 ; "four tries")]
fn tries_never_exceed_max(max_tries: usize) {
    let fixture = ScanFixture::new(max_tries);
    let engine = Arc::new(FixtureEngine::new().with_status(TEST_A, FixtureStatus::Fail));
    let (stats, _) = fixture.run(&collector(&[TEST_A], 1), collaborators(&engine));

    assert_eq!(engine.invocations().len(), max_tries);
    assert_eq!(stats.retry_total_count, max_tries - 1);
    assert!(!stats.passed());
}

#[test]
fn retry_counter_sums_across_batches() -> Result<()> {
    let fixture = ScanFixture::new(3);
    let engine = Arc::new(
        FixtureEngine::new()
            .with_status("AppA/Suite/testFlaky", FixtureStatus::Flaky { pass_attempt: 3 }),
    );
    let (stats, events) = fixture.run(
        &collector(&["AppA/Suite/testFlaky", "AppB/Suite/testOk"], 1),
        collaborators(&engine),
    );

    ensure!(stats.passed(), "both batches pass eventually: {stats:?}");
    assert_eq!(stats.retry_total_count, 2);
    assert_eq!(stats.batches_passed, 2);
    assert_eq!(engine.tests_run(1), vec![vec!["AppB/Suite/testOk"]]);

    // Multiple testables get a directory per batch.
    let root = fixture.output_root();
    for dir in ["results-AppA-batch-0", "results-AppB-batch-1"] {
        let report = root.join(dir).join("report.junit");
        ensure!(report.exists(), "`{report}` exists");
    }
    let retries: Vec<_> = finished_batches(&events)
        .iter()
        .map(|summary| (summary.batch_index, summary.retries))
        .collect();
    assert_eq!(retries, vec![(0, 2), (1, 0)]);
    Ok(())
}

#[test]
fn infrastructure_failure_is_not_retried() {
    let fixture = ScanFixture::new(3);
    let engine = Arc::new(FixtureEngine::new().with_status(TEST_A, FixtureStatus::Infrastructure));
    let (stats, events) = fixture.run(&collector(&[TEST_A, TEST_B], 1), collaborators(&engine));

    assert_eq!(engine.invocations().len(), 1);
    assert_eq!(stats.retry_total_count, 0);
    assert_eq!(stats.batches_failed, 1);

    let finished = finished_batches(&events);
    assert_eq!(finished.len(), 1, "collation still runs after a fatal error");
    assert!(
        matches!(
            &finished[0].verdict,
            BatchVerdict::Fatal(BatchFatalError::Engine { try_number: 1, .. })
        ),
        "{:?}",
        finished[0].verdict
    );
    let collated = finished[0].collated.as_ref().expect("nothing to collate is fine");
    assert_eq!(collated.junit_path, None);
}

#[test]
fn coverage_only_on_first_try() {
    let mut fixture = ScanFixture::new(3);
    fixture.options.code_coverage = true;
    let engine = Arc::new(
        FixtureEngine::new().with_status(TEST_A, FixtureStatus::Flaky { pass_attempt: 2 }),
    );
    let (stats, _) = fixture.run(&collector(&[TEST_A], 1), collaborators(&engine));

    assert!(stats.passed());
    let coverage: Vec<_> = engine
        .invocations()
        .iter()
        .map(|invocation| invocation.code_coverage)
        .collect();
    assert_eq!(coverage, vec![true, false]);
}

#[test]
fn latest_html_report_is_promoted() -> Result<()> {
    let namer = ReportNamer::new(Some("junit,html"), None, None)?;
    let fixture = ScanFixture::with_namer(3, namer);
    let engine = Arc::new(
        FixtureEngine::new().with_status(TEST_A, FixtureStatus::Flaky { pass_attempt: 2 }),
    );
    let (stats, _) = fixture.run(&collector(&[TEST_A], 1), collaborators(&engine));
    ensure!(stats.passed(), "flaky test passes on retry");

    let root = fixture.output_root();
    let html = std::fs::read_to_string(root.join("report.html"))?;
    ensure!(html.ends_with("for try 2"), "html from the last try: {html}");
    ensure!(!root.join("report-2.html").exists(), "per-try html removed");
    Ok(())
}

#[test]
fn failure_without_failed_tests_is_not_retried() {
    let fixture = ScanFixture::new(3);
    let engine = Arc::new(
        FixtureEngine::new()
            .with_status(TEST_A, FixtureStatus::Fail)
            .with_unreported_failures(),
    );
    let (stats, events) = fixture.run(&collector(&[TEST_A, TEST_B], 1), collaborators(&engine));

    assert_eq!(engine.invocations().len(), 1, "nothing narrower to re-run");
    assert_eq!(stats.retry_total_count, 0);
    assert_eq!(stats.batches_failed, 1);

    let finished = finished_batches(&events);
    assert_eq!(finished.len(), 1);
    assert!(matches!(finished[0].verdict, BatchVerdict::Failed));
    assert_eq!(finished[0].tries.len(), 1);
    assert_eq!(finished[0].retries, 0);
}

/// A failure extractor that can never read a report.
#[derive(Debug)]
struct UnreadableReports;

impl FailureExtractor for UnreadableReports {
    fn failed_tests(&self, report: &Utf8Path) -> Result<Vec<TestIdentifier>, ReportReadError> {
        Err(ReportReadError::Read {
            path: report.to_owned(),
            error: Arc::new(io::Error::other("report truncated")),
        })
    }
}

#[test]
fn unreadable_failure_report_stops_batch() {
    let fixture = ScanFixture::new(3);
    let engine = Arc::new(FixtureEngine::new().with_status(TEST_A, FixtureStatus::Fail));
    let collaborators = collaborators(&engine).with_failure_extractor(Arc::new(UnreadableReports));
    let (stats, events) = fixture.run(&collector(&[TEST_A], 1), collaborators);

    assert_eq!(engine.invocations().len(), 1);
    assert_eq!(stats.retry_total_count, 0);
    assert_eq!(stats.batches_failed, 1);

    let finished = finished_batches(&events);
    assert!(
        matches!(
            &finished[0].verdict,
            BatchVerdict::Fatal(BatchFatalError::FailureReport { try_number: 1, .. })
        ),
        "{:?}",
        finished[0].verdict
    );
}

#[test]
fn unreadable_failure_report_on_last_try_fails_batch() {
    let fixture = ScanFixture::new(1);
    let engine = Arc::new(FixtureEngine::new().with_status(TEST_A, FixtureStatus::Fail));
    let collaborators = collaborators(&engine).with_failure_extractor(Arc::new(UnreadableReports));
    let (stats, events) = fixture.run(&collector(&[TEST_A], 1), collaborators);

    assert_eq!(engine.invocations().len(), 1);
    assert_eq!(stats.batches_failed, 1);
    assert!(matches!(finished_batches(&events)[0].verdict, BatchVerdict::Failed));
}

#[test]
fn zero_try_count_is_rejected() {
    let fixture = ScanFixture::new(0);
    let engine = Arc::new(FixtureEngine::new());
    let error = scan(
        &collector(&[TEST_A], 1),
        fixture.options.clone(),
        collaborators(&engine),
        |_| {},
    )
    .expect_err("a batch must be allowed at least one try");

    assert!(
        matches!(error, ScanError::Build(ScanRunnerBuildError::ZeroTryCount)),
        "{error:?}"
    );
    assert_eq!(engine.invocations().len(), 0);
}
