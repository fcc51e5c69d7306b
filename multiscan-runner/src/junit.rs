// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reading JUnit XML reports produced by the test engine.
//!
//! Only the subset of JUnit needed to merge reports and find failed tests is read: suite names,
//! test case class names and names, timings, and whether each test case failed, errored or was
//! skipped.

use crate::{
    errors::{ReportReadError, TestListError},
    test_list::TestIdentifier,
};
use camino::Utf8Path;
use indexmap::IndexSet;
use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use std::{fmt, sync::Arc, time::Duration};
use tracing::warn;

/// Reads the identifiers of failed tests out of a report.
pub trait FailureExtractor: fmt::Debug + Send + Sync {
    /// Returns the failed tests in the report at `report`, in order and without duplicates.
    fn failed_tests(&self, report: &Utf8Path) -> Result<Vec<TestIdentifier>, ReportReadError>;
}

/// A [`FailureExtractor`] for JUnit XML reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct JunitFailureExtractor;

impl FailureExtractor for JunitFailureExtractor {
    fn failed_tests(&self, report: &Utf8Path) -> Result<Vec<TestIdentifier>, ReportReadError> {
        Ok(JunitReport::from_path(report)?.failed_tests())
    }
}

/// The status of a single test case in a JUnit report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JunitStatus {
    /// The test passed.
    Passed,

    /// The test failed (`<failure>`).
    Failed,

    /// The test errored (`<error>`).
    Errored,

    /// The test was skipped (`<skipped>`).
    Skipped,
}

impl JunitStatus {
    /// Returns true if this status represents a failure or an error.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Errored)
    }
}

/// A test case read from a JUnit report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JunitTestCase {
    /// The name of the enclosing `<testsuite>`.
    pub suite: String,

    /// The `classname` attribute, typically `Testable.Suite`.
    pub classname: String,

    /// The `name` attribute.
    pub name: String,

    /// The test's status.
    pub status: JunitStatus,

    /// The `time` attribute, if present and valid.
    pub time: Option<Duration>,

    /// The `message` attribute of the failure, error or skipped element, if any.
    pub message: Option<String>,
}

impl JunitTestCase {
    /// Returns the fully-qualified identifier for this test, `Testable/Suite/name`.
    ///
    /// The testable is taken from the part of the class name before the first `.`. A trailing
    /// `()` on the name (as emitted for Swift tests) is removed.
    pub fn identifier(&self) -> Result<TestIdentifier, TestListError> {
        let name = self.name.strip_suffix("()").unwrap_or(&self.name);
        let class = if self.classname.is_empty() {
            &self.suite
        } else {
            &self.classname
        };
        let id = match class.split_once('.') {
            Some((testable, rest)) => format!("{testable}/{rest}/{name}"),
            None => format!("{class}/{name}"),
        };
        TestIdentifier::new(id)
    }

    fn from_start(start: &BytesStart<'_>, suite: Option<&String>) -> Result<Self, quick_xml::Error> {
        let time = attribute(start, b"time")?
            .and_then(|time| time.parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        Ok(Self {
            suite: suite.cloned().unwrap_or_default(),
            classname: attribute(start, b"classname")?.unwrap_or_default(),
            name: attribute(start, b"name")?.unwrap_or_default(),
            status: JunitStatus::Passed,
            time,
            message: None,
        })
    }

    fn mark(&mut self, element: &BytesStart<'_>) -> Result<(), quick_xml::Error> {
        let status = match element.name().as_ref() {
            b"failure" => JunitStatus::Failed,
            b"error" => JunitStatus::Errored,
            _ => JunitStatus::Skipped,
        };
        // A failure or error always wins over a skip.
        if !self.status.is_failure() {
            self.status = status;
            self.message = attribute(element, b"message")?;
        }
        Ok(())
    }
}

/// The contents of a JUnit report.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct JunitReport {
    /// The `name` attribute of `<testsuites>`, if any.
    pub name: Option<String>,

    /// Every test case in the report, in document order.
    pub test_cases: Vec<JunitTestCase>,
}

impl JunitReport {
    /// Parses a report from a string.
    pub fn parse(input: &str) -> Result<Self, quick_xml::Error> {
        let mut reader = Reader::from_str(input);
        let mut report = Self::default();
        let mut suites: Vec<String> = Vec::new();
        let mut current: Option<JunitTestCase> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => match start.name().as_ref() {
                    b"testsuites" => report.name = attribute(&start, b"name")?,
                    b"testsuite" => suites.push(attribute(&start, b"name")?.unwrap_or_default()),
                    b"testcase" => {
                        current = Some(JunitTestCase::from_start(&start, suites.last())?);
                    }
                    b"failure" | b"error" | b"skipped" => {
                        if let Some(test_case) = &mut current {
                            test_case.mark(&start)?;
                        }
                    }
                    _ => {}
                },
                Event::Empty(start) => match start.name().as_ref() {
                    b"testcase" => {
                        let test_case = JunitTestCase::from_start(&start, suites.last())?;
                        report.test_cases.push(test_case);
                    }
                    b"failure" | b"error" | b"skipped" => {
                        if let Some(test_case) = &mut current {
                            test_case.mark(&start)?;
                        }
                    }
                    _ => {}
                },
                Event::End(end) => match end.name().as_ref() {
                    b"testsuite" => {
                        suites.pop();
                    }
                    b"testcase" => {
                        if let Some(test_case) = current.take() {
                            report.test_cases.push(test_case);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(report)
    }

    /// Reads and parses a report from disk.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ReportReadError> {
        let input = std::fs::read_to_string(path).map_err(|error| ReportReadError::Read {
            path: path.to_owned(),
            error: Arc::new(error),
        })?;
        Self::parse(&input).map_err(|error| ReportReadError::Parse {
            path: path.to_owned(),
            error: Arc::new(error),
        })
    }

    /// Returns the identifiers of failed or errored tests, in order and without duplicates.
    pub fn failed_tests(&self) -> Vec<TestIdentifier> {
        let mut failed = IndexSet::new();
        for test_case in self.test_cases.iter().filter(|tc| tc.status.is_failure()) {
            match test_case.identifier() {
                Ok(id) => {
                    failed.insert(id);
                }
                Err(error) => {
                    warn!("ignoring failed test case with unusable name: {error}");
                }
            }
        }
        failed.into_iter().collect()
    }
}

fn attribute(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
