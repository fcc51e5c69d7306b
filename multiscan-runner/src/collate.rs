// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging the reports of every try of a batch into one final report.
//!
//! Each try writes its reports under its own names (see [`ReportNamer`]). Once a batch is done,
//! the collator:
//!
//! * merges every per-try JUnit report into one, where the latest try that ran a test decides
//!   its status and earlier failures are recorded as reruns;
//! * promotes the most recent report of every other output type;
//! * writes the results under the first try's names, and removes the per-try files of later
//!   tries.

use crate::{
    errors::CollateError,
    junit::{JunitReport, JunitStatus, JunitTestCase},
    report_name::{OutputType, ReportNamer},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use std::{fs::File, sync::Arc};
use tracing::{debug, warn};

/// The outcome of a single test across every try of a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CollatedTest {
    /// The test, as `Testable/Suite/name`.
    pub identifier: String,

    /// Whether the test passed (or was skipped) in the latest try that ran it.
    pub passed: bool,

    /// The number of tries that ran this test.
    pub attempts: usize,
}

impl CollatedTest {
    /// Returns true if the test passed, but only after failing at least once.
    pub fn is_flaky(&self) -> bool {
        self.passed && self.attempts > 1
    }
}

/// The result of collating a batch's reports.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CollatedReports {
    /// The path the merged JUnit report was written to, or `None` if no try produced one.
    pub junit_path: Option<Utf8PathBuf>,

    /// Every test seen in any try, in order of first appearance.
    pub tests: Vec<CollatedTest>,
}

impl CollatedReports {
    /// Returns the tests that ultimately failed.
    pub fn failed(&self) -> impl Iterator<Item = &CollatedTest> + '_ {
        self.tests.iter().filter(|test| !test.passed)
    }

    /// Returns the tests that passed after being retried.
    pub fn flaky(&self) -> impl Iterator<Item = &CollatedTest> + '_ {
        self.tests.iter().filter(|test| test.is_flaky())
    }
}

/// Merges per-try reports for a batch.
#[derive(Clone, Copy, Debug)]
pub struct ReportCollator<'a> {
    namer: &'a ReportNamer,
}

impl<'a> ReportCollator<'a> {
    /// Creates a new collator that finds reports through `namer`.
    pub fn new(namer: &'a ReportNamer) -> Self {
        Self { namer }
    }

    /// Collates the reports of tries `1..=tries_run` in `output_dir`.
    ///
    /// Missing per-try reports are skipped with a warning: a try that failed fatally may not have
    /// written any.
    pub fn collate(
        &self,
        output_dir: &Utf8Path,
        tries_run: usize,
    ) -> Result<CollatedReports, CollateError> {
        let attempts = self.namer.all_attempt_reports(tries_run);

        let mut merged = MergedJunit::default();
        for attempt in &attempts {
            let path = output_dir.join(attempt.junit());
            if !path.exists() {
                warn!("no JUnit report found for try {} at `{path}`", attempt.try_number);
                continue;
            }
            let report = JunitReport::from_path(&path)?;
            merged.add(attempt.try_number, report);
        }

        let junit_path = if merged.is_empty() {
            None
        } else {
            let path = output_dir.join(self.namer.junit_report_name(1));
            merged.write(&path)?;
            debug!("wrote collated JUnit report to `{path}`");
            Some(path)
        };

        for output_type in self.namer.output_types() {
            if output_type != OutputType::Junit {
                self.promote_latest(output_dir, output_type, tries_run)?;
            }
        }

        for attempt in attempts.iter().skip(1) {
            for (_, name) in &attempt.reports {
                let path = output_dir.join(name);
                if path.exists() {
                    std::fs::remove_file(&path).map_err(|error| CollateError::fs(&path, error))?;
                }
            }
        }

        Ok(CollatedReports {
            junit_path,
            tests: merged.collated_tests(),
        })
    }

    fn promote_latest(
        &self,
        output_dir: &Utf8Path,
        output_type: OutputType,
        tries_run: usize,
    ) -> Result<(), CollateError> {
        let latest = (1..=tries_run).rev().find_map(|try_number| {
            let name = self.namer.report_name(output_type, try_number)?;
            let path = output_dir.join(name);
            path.exists().then_some((try_number, path))
        });

        match latest {
            Some((try_number, path)) if try_number > 1 => {
                let Some(first) = self.namer.report_name(output_type, 1) else {
                    return Ok(());
                };
                let dest = output_dir.join(first);
                std::fs::rename(&path, &dest).map_err(|error| CollateError::fs(&dest, error))?;
                debug!("promoted {output_type} report from try {try_number} to `{dest}`");
            }
            Some(_) => {}
            None => warn!("no {output_type} report found in `{output_dir}`"),
        }
        Ok(())
    }
}

#[derive(Debug, Eq, Hash, PartialEq)]
struct CaseKey {
    suite: String,
    classname: String,
    name: String,
}

#[derive(Debug, Default)]
struct MergedJunit {
    name: Option<String>,
    reports_seen: usize,
    // Each entry holds every try that ran the test, oldest first.
    cases: IndexMap<CaseKey, Vec<(usize, JunitTestCase)>>,
}

impl MergedJunit {
    fn is_empty(&self) -> bool {
        self.reports_seen == 0
    }

    fn add(&mut self, try_number: usize, report: JunitReport) {
        self.reports_seen += 1;
        if self.name.is_none() {
            self.name = report.name;
        }
        for test_case in report.test_cases {
            let key = CaseKey {
                suite: test_case.suite.clone(),
                classname: test_case.classname.clone(),
                name: test_case.name.clone(),
            };
            self.cases
                .entry(key)
                .or_default()
                .push((try_number, test_case));
        }
    }

    fn collated_tests(&self) -> Vec<CollatedTest> {
        self.cases
            .values()
            .filter_map(|history| {
                let (_, latest) = history.last()?;
                let identifier = match latest.identifier() {
                    Ok(id) => id.to_string(),
                    Err(_) => format!("{}/{}", latest.classname, latest.name),
                };
                Some(CollatedTest {
                    identifier,
                    passed: !latest.status.is_failure(),
                    attempts: history.len(),
                })
            })
            .collect()
    }

    fn write(&self, path: &Utf8Path) -> Result<(), CollateError> {
        let mut suites: IndexMap<&str, TestSuite> = IndexMap::new();
        for (key, history) in &self.cases {
            let Some(((_, latest), earlier)) = history.split_last() else {
                continue;
            };

            let mut status = status_for(latest);
            for (try_number, earlier) in earlier {
                let Some(kind) = non_success_kind(earlier.status) else {
                    continue;
                };
                let mut rerun = TestRerun::new(kind);
                rerun.set_message(
                    earlier
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("failed on try {try_number}")),
                );
                if let Some(time) = earlier.time {
                    rerun.set_time(time);
                }
                status.add_rerun(rerun);
            }

            let mut test_case = TestCase::new(key.name.as_str(), status);
            test_case.set_classname(key.classname.as_str());
            if let Some(time) = latest.time {
                test_case.set_time(time);
            }

            suites
                .entry(key.suite.as_str())
                .or_insert_with(|| TestSuite::new(key.suite.as_str()))
                .add_test_case(test_case);
        }

        let mut report = Report::new(self.name.as_deref().unwrap_or("multiscan"));
        report.add_test_suites(suites.into_values());

        let f = File::create(path).map_err(|error| CollateError::fs(path, error))?;
        report
            .serialize(f)
            .map_err(|error| CollateError::WriteJunit {
                path: path.to_owned(),
                error: Arc::new(error),
            })
    }
}

fn non_success_kind(status: JunitStatus) -> Option<NonSuccessKind> {
    match status {
        JunitStatus::Failed => Some(NonSuccessKind::Failure),
        JunitStatus::Errored => Some(NonSuccessKind::Error),
        JunitStatus::Passed | JunitStatus::Skipped => None,
    }
}

fn status_for(test_case: &JunitTestCase) -> TestCaseStatus {
    let mut status = match test_case.status {
        JunitStatus::Passed => return TestCaseStatus::success(),
        JunitStatus::Skipped => TestCaseStatus::skipped(),
        JunitStatus::Failed => TestCaseStatus::non_success(NonSuccessKind::Failure),
        JunitStatus::Errored => TestCaseStatus::non_success(NonSuccessKind::Error),
    };
    if let Some(message) = &test_case.message {
        status.set_message(message.as_str());
    }
    status
}
