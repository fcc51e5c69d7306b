// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test identifiers, batches, and partitioning a suite into batches.

use crate::errors::TestListError;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use std::{fmt, num::NonZeroUsize, str::FromStr};

/// A fully-qualified test identifier, for example `MyAppUITests/LoginTests/testLogin`.
///
/// The first `/`-separated component is the testable (the build target the test belongs to).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestIdentifier(String);

impl TestIdentifier {
    /// Creates a new identifier, validating it.
    pub fn new(input: impl Into<String>) -> Result<Self, TestListError> {
        let input = input.into();
        if input.is_empty() {
            return Err(TestListError::InvalidIdentifier {
                input,
                reason: "identifier is empty",
            });
        }
        if input.chars().any(char::is_control) {
            return Err(TestListError::InvalidIdentifier {
                input,
                reason: "identifier contains control characters",
            });
        }
        if input.starts_with('/') {
            return Err(TestListError::InvalidIdentifier {
                input,
                reason: "identifier must start with a testable name",
            });
        }
        Ok(Self(input))
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name of the testable this test belongs to.
    ///
    /// Backslashes (used by some tools to escape identifiers for the shell) are removed.
    pub fn testable(&self) -> String {
        let first = self.0.split('/').next().unwrap_or(&self.0);
        first.replace('\\', "")
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TestIdentifier {
    type Err = TestListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An ordered set of tests scheduled to run together.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestBatch {
    /// The index of this batch across the whole run, starting from 0.
    pub index: usize,

    /// The testable every test in this batch belongs to.
    pub testable: String,

    /// The tests in this batch, in order.
    pub tests: Vec<TestIdentifier>,
}

/// Partitions a list of tests into batches.
///
/// Tests are grouped by testable (in order of first appearance), and each testable's tests are
/// split into up to `batch_count` contiguous batches of near-equal size.
#[derive(Clone, Debug)]
pub struct TestCollector {
    testables: Vec<String>,
    batches: Vec<TestBatch>,
}

impl TestCollector {
    /// Creates a new collector from a list of tests. Duplicate tests are dropped.
    pub fn new(tests: impl IntoIterator<Item = TestIdentifier>, batch_count: NonZeroUsize) -> Self {
        let mut by_testable: IndexMap<String, IndexSet<TestIdentifier>> = IndexMap::new();
        for test in tests {
            by_testable.entry(test.testable()).or_default().insert(test);
        }

        let mut batches = Vec::new();
        for (testable, tests) in &by_testable {
            let tests: Vec<_> = tests.iter().cloned().collect();
            for chunk in split_evenly(&tests, batch_count.get()) {
                batches.push(TestBatch {
                    index: batches.len(),
                    testable: testable.clone(),
                    tests: chunk.to_vec(),
                });
            }
        }

        Self {
            testables: by_testable.into_keys().collect(),
            batches,
        }
    }

    /// Parses a test list: one identifier per line. Blank lines and lines starting with `#` are
    /// ignored.
    pub fn parse(input: &str, batch_count: usize) -> Result<Self, TestListError> {
        let batch_count = NonZeroUsize::new(batch_count).ok_or(TestListError::ZeroBatchCount)?;
        let tests = input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(TestIdentifier::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(tests, batch_count))
    }

    /// Reads and parses a test list from a file.
    pub fn from_path(path: &Utf8Path, batch_count: usize) -> Result<Self, TestListError> {
        let input = std::fs::read_to_string(path).map_err(|error| TestListError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(&input, batch_count)
    }

    /// Returns the testables seen, in order of first appearance.
    pub fn testables(&self) -> &[String] {
        &self.testables
    }

    /// Returns the batches, in order.
    pub fn batches(&self) -> &[TestBatch] {
        &self.batches
    }

    /// Returns the total number of tests across all batches.
    pub fn test_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.tests.len()).sum()
    }

    /// Returns the output directory for a batch.
    ///
    /// A sequential run over a single testable writes to `output_root` directly. Otherwise, each
    /// batch gets its own `results-<testable>-batch-<index>` subdirectory, so parallel batches never
    /// share report files.
    pub fn output_directory(
        &self,
        output_root: &Utf8Path,
        batch: &TestBatch,
        parallelize: bool,
    ) -> Utf8PathBuf {
        let shared = self.testables.len() == 1 && (!parallelize || self.batches.len() == 1);
        if shared {
            output_root.to_owned()
        } else {
            output_root.join(format!(
                "results-{}-batch-{}",
                batch.testable, batch.index
            ))
        }
    }
}

fn split_evenly<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    let parts = parts.min(items.len());
    if parts == 0 {
        return Vec::new();
    }
    let base = items.len() / parts;
    let remainder = items.len() % parts;

    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < remainder);
        out.push(&items[start..start + len]);
        start += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn ids(tests: &[&str]) -> Vec<TestIdentifier> {
        tests
            .iter()
            .map(|t| TestIdentifier::new(*t).expect("valid identifier"))
            .collect()
    }

    #[test_case("App/Suite/testA", "App" ; "plain")]
    #[test_case("App\\ Tests/Suite/testA", "App Tests" ; "escaped")]
    #[test_case("App", "App" ; "testable only")]
    fn testable_name(input: &str, expected: &str) {
        let id = TestIdentifier::new(input).expect("valid identifier");
        assert_eq!(id.testable(), expected);
    }

    #[test]
    fn identifier_validation() {
        for input in ["", "App/Suite/test\tA", "/Suite/test"] {
            TestIdentifier::new(input).expect_err(&format!("expected `{input}` to be rejected"));
        }
    }

    #[test_case(7, 3, &[3, 2, 2] ; "uneven")]
    #[test_case(6, 3, &[2, 2, 2] ; "even")]
    #[test_case(2, 4, &[1, 1] ; "more parts than items")]
    #[test_case(0, 4, &[] ; "empty")]
    fn split_sizes(len: usize, parts: usize, expected: &[usize]) {
        let items: Vec<usize> = (0..len).collect();
        let sizes: Vec<usize> = split_evenly(&items, parts).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, expected);
    }

    #[test]
    fn collector_groups_by_testable() {
        let input = indoc! {"
            # UI tests
            AppUITests/Login/testLogin
            AppUITests/Login/testLogout

            AppTests/Model/testParse
            AppUITests/Feed/testScroll
            AppUITests/Login/testLogin
        "};
        let collector = TestCollector::parse(input, 2).expect("valid list");

        assert_eq!(collector.testables(), &["AppUITests", "AppTests"]);
        assert_eq!(collector.test_count(), 4, "duplicates are dropped");

        let batches = collector.batches();
        assert_eq!(
            batches,
            &[
                TestBatch {
                    index: 0,
                    testable: "AppUITests".to_owned(),
                    tests: ids(&["AppUITests/Login/testLogin", "AppUITests/Login/testLogout"]),
                },
                TestBatch {
                    index: 1,
                    testable: "AppUITests".to_owned(),
                    tests: ids(&["AppUITests/Feed/testScroll"]),
                },
                TestBatch {
                    index: 2,
                    testable: "AppTests".to_owned(),
                    tests: ids(&["AppTests/Model/testParse"]),
                },
            ]
        );
    }

    #[test]
    fn output_directories() {
        let root = Utf8Path::new("test_results");

        let single = TestCollector::parse("App/A/a\nApp/A/b\nApp/A/c\n", 2).unwrap();
        for batch in single.batches() {
            assert_eq!(single.output_directory(root, batch, false), root.to_owned());
        }
        let parallel: Vec<_> = single
            .batches()
            .iter()
            .map(|batch| single.output_directory(root, batch, true))
            .collect();
        assert_eq!(
            parallel,
            vec![
                Utf8PathBuf::from("test_results/results-App-batch-0"),
                Utf8PathBuf::from("test_results/results-App-batch-1"),
            ]
        );

        let one_batch = TestCollector::parse("App/A/a\nApp/A/b\n", 1).unwrap();
        assert_eq!(
            one_batch.output_directory(root, &one_batch.batches()[0], true),
            root.to_owned()
        );

        let multi = TestCollector::parse("App/A/a\nLib/B/b\n", 1).unwrap();
        let dirs: Vec<_> = multi
            .batches()
            .iter()
            .map(|batch| multi.output_directory(root, batch, false))
            .collect();
        assert_eq!(
            dirs,
            vec![
                Utf8PathBuf::from("test_results/results-App-batch-0"),
                Utf8PathBuf::from("test_results/results-Lib-batch-1"),
            ]
        );
    }

    #[test]
    fn zero_batch_count() {
        let error = TestCollector::parse("App/A/a", 0).unwrap_err();
        assert!(matches!(error, TestListError::ZeroBatchCount));
    }
}
