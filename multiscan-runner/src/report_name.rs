// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic naming of per-try report files.
//!
//! Every try of a batch writes its reports into the same output directory, so each try needs its
//! own file names. The first try uses the configured names as-is (`report.junit`); try `N` for
//! `N >= 2` inserts the try number before the extension (`report-N.junit`). After a batch
//! finishes, the collated report is written back under the first try's name.

use crate::errors::{OutputTypeParseError, ReportNamerError};
use camino::{Utf8Path, Utf8PathBuf};
use std::{fmt, str::FromStr};
use tracing::warn;

/// A kind of report produced by the test engine.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OutputType {
    /// A JUnit XML report. Always produced, since failed tests are read back from it.
    Junit,

    /// An HTML report.
    Html,

    /// A JSON report.
    Json,
}

impl OutputType {
    /// Returns the string forms of all known output types.
    pub fn variants() -> &'static [&'static str] {
        &["junit", "html", "json"]
    }

    /// Returns the string form of this output type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Junit => "junit",
            Self::Html => "html",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = OutputTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "junit" => Ok(Self::Junit),
            "html" => Ok(Self::Html),
            "json" => Ok(Self::Json),
            other => Err(OutputTypeParseError::new(other)),
        }
    }
}

/// The report file names a single try produces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttemptReports {
    /// The try these reports belong to, starting from 1.
    pub try_number: usize,

    /// The file name for every configured output type, relative to the batch output directory.
    pub reports: Vec<(OutputType, String)>,
}

impl AttemptReports {
    /// Returns the JUnit report name for this try.
    pub fn junit(&self) -> &str {
        self.reports
            .iter()
            .find_map(|(output_type, name)| (*output_type == OutputType::Junit).then_some(name))
            .expect("ReportNamer always includes a junit report")
    }
}

/// Generates report file names for each try of a batch.
///
/// The namer is a pure function of its configuration: calling [`Self::report_name`] twice with
/// the same inputs returns the same name, and different try numbers never collide.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportNamer {
    // Invariant: contains exactly one `OutputType::Junit` entry, and no output type appears twice.
    entries: Vec<(OutputType, String)>,
}

impl ReportNamer {
    /// The output types used if none are configured.
    pub const DEFAULT_OUTPUT_TYPES: &'static str = "junit";

    /// Creates a new namer from comma-separated output types and file names.
    ///
    /// * `output_types` defaults to `junit`.
    /// * `output_files` defaults to `custom_report_file_name`, or `report.<type>` for every type.
    /// * `junit` is always added if missing. If the file list is then exactly one short,
    ///   `report.junit` is appended to it.
    pub fn new(
        output_types: Option<&str>,
        output_files: Option<&str>,
        custom_report_file_name: Option<&str>,
    ) -> Result<Self, ReportNamerError> {
        let mut types: Vec<String> = split_list(output_types.unwrap_or(Self::DEFAULT_OUTPUT_TYPES));
        let mut files: Vec<String> = match output_files.or(custom_report_file_name) {
            Some(files) => split_list(files),
            None => types.iter().map(|ty| format!("report.{ty}")).collect(),
        };

        if !types.iter().any(|ty| ty == OutputType::Junit.as_str()) {
            warn!("output types are missing `junit`, adding it");
            types.push(OutputType::Junit.as_str().to_owned());
            if types.len() == files.len() + 1 {
                files.push("report.junit".to_owned());
            }
        }

        if types.len() != files.len() {
            return Err(ReportNamerError::CountMismatch {
                output_types: types,
                output_files: files,
            });
        }

        let mut entries: Vec<(OutputType, String)> = Vec::with_capacity(types.len());
        for (ty, file) in types.iter().zip(files) {
            let output_type: OutputType = ty.parse()?;
            if entries.iter().any(|(existing, _)| *existing == output_type) {
                warn!("output type `{output_type}` specified more than once, ignoring duplicate");
                continue;
            }
            entries.push((output_type, file));
        }

        Ok(Self { entries })
    }

    /// Returns the configured output types, in order.
    pub fn output_types(&self) -> impl Iterator<Item = OutputType> + '_ {
        self.entries.iter().map(|(output_type, _)| *output_type)
    }

    /// Returns the report name for the given output type and try, or `None` if the output type
    /// isn't configured.
    pub fn report_name(&self, output_type: OutputType, try_number: usize) -> Option<String> {
        self.entries
            .iter()
            .find(|(ty, _)| *ty == output_type)
            .map(|(_, file)| numbered_filename(file, try_number))
    }

    /// Returns the JUnit report name for the given try.
    pub fn junit_report_name(&self, try_number: usize) -> String {
        self.report_name(OutputType::Junit, try_number)
            .expect("junit is always configured")
    }

    /// Returns all report names for a single try.
    pub fn attempt_reports(&self, try_number: usize) -> AttemptReports {
        AttemptReports {
            try_number,
            reports: self
                .entries
                .iter()
                .map(|(ty, file)| (*ty, numbered_filename(file, try_number)))
                .collect(),
        }
    }

    /// Returns the report names for tries `1..=tries`, in order.
    pub fn all_attempt_reports(&self, tries: usize) -> Vec<AttemptReports> {
        (1..=tries).map(|n| self.attempt_reports(n)).collect()
    }
}

fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_owned())
        .collect()
}

fn numbered_filename(file: &str, try_number: usize) -> String {
    if try_number <= 1 {
        return file.to_owned();
    }

    let path = Utf8Path::new(file);
    let stem = path.file_stem().unwrap_or(file);
    let numbered = match path.extension() {
        Some(ext) => format!("{stem}-{try_number}.{ext}"),
        None => format!("{stem}-{try_number}"),
    };
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => {
            Utf8PathBuf::from(parent).join(numbered).into_string()
        }
        _ => numbered,
    }
}
