// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable output for scan events.

use super::events::{BatchRunSummary, BatchVerdict, ScanEvent, ScanEventKind, TryResult};
use crate::{
    errors::DisplayErrorChain,
    helpers::{FormattedDuration, plural},
    runner::RunStats,
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};
use swrite::{SWrite, swrite};

/// Writes scan events to a terminal or any other writer.
#[derive(Debug, Default)]
pub struct ScanReporter {
    styles: Box<Styles>,
    verbose: bool,
}

impl ScanReporter {
    /// Creates a new reporter with uncolored output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Colors the output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Also shows the individual tests of each try.
    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.verbose = verbose;
        self
    }

    /// Writes an event to `writer`.
    pub fn write_event(&self, event: &ScanEvent, writer: &mut dyn Write) -> io::Result<()> {
        let mut buf = String::new();
        self.write_event_impl(event, &mut buf);
        writer.write_all(buf.as_bytes())?;
        writer.flush()
    }

    fn write_event_impl(&self, event: &ScanEvent, buf: &mut String) {
        match &event.kind {
            ScanEventKind::RunStarted {
                batch_count,
                test_count,
                max_tries,
                parallel,
            } => {
                swrite!(buf, "{:>12} ", "Starting".style(self.styles.pass));
                swrite!(
                    buf,
                    "{} {} across {} {}",
                    test_count.style(self.styles.count),
                    plural::tests_str(*test_count),
                    batch_count.style(self.styles.count),
                    plural::batches_str(*batch_count),
                );
                if *max_tries > 1 {
                    swrite!(
                        buf,
                        " (up to {} {} each)",
                        max_tries.style(self.styles.count),
                        plural::tries_str(*max_tries),
                    );
                }
                if *parallel {
                    swrite!(buf, " in parallel");
                }
                buf.push('\n');
            }
            ScanEventKind::BatchStarted {
                batch_index,
                testable,
                test_count,
                output_directory,
                device,
            } => {
                swrite!(buf, "{:>12} ", "START".style(self.styles.pass));
                swrite!(
                    buf,
                    "[batch {}] {} {} from {}",
                    batch_index.style(self.styles.count),
                    test_count.style(self.styles.count),
                    plural::tests_str(*test_count),
                    testable.style(self.styles.testable),
                );
                if let Some(device) = device {
                    swrite!(buf, " on {device}");
                }
                swrite!(buf, " -> {output_directory}\n");
            }
            ScanEventKind::TryFinished {
                batch_index,
                max_tries,
                record,
            } => {
                let (label, style) = match &record.result {
                    TryResult::Passed => ("PASS", self.styles.pass),
                    TryResult::TestsFailed { .. } if record.try_number < *max_tries => {
                        ("TRY FAIL", self.styles.retry)
                    }
                    TryResult::TestsFailed { .. } => ("FAIL", self.styles.fail),
                };
                swrite!(buf, "{:>12} ", label.style(style));
                swrite!(
                    buf,
                    "[batch {}] try {}/{} [{:>8}]",
                    batch_index.style(self.styles.count),
                    record.try_number,
                    max_tries,
                    FormattedDuration(record.time_taken).to_string(),
                );
                match &record.result {
                    TryResult::Passed => {
                        swrite!(
                            buf,
                            " {} {} passed\n",
                            record.tests.len().style(self.styles.count),
                            plural::tests_str(record.tests.len()),
                        );
                    }
                    TryResult::TestsFailed { failed } => {
                        swrite!(
                            buf,
                            " {} of {} {} failed\n",
                            failed.len().style(self.styles.count),
                            record.tests.len(),
                            plural::tests_str(record.tests.len()),
                        );
                        if self.verbose {
                            for test in failed {
                                swrite!(buf, "{:>12} {}\n", "", test.style(self.styles.fail));
                            }
                        }
                    }
                }
            }
            ScanEventKind::BatchRetrying {
                batch_index,
                try_number,
                test_count,
                delay,
            } => {
                swrite!(buf, "{:>12} ", "RETRY".style(self.styles.retry));
                swrite!(
                    buf,
                    "[batch {}] try {} re-runs {} failed {}",
                    batch_index.style(self.styles.count),
                    try_number,
                    test_count.style(self.styles.count),
                    plural::tests_str(*test_count),
                );
                if !delay.is_zero() {
                    swrite!(buf, " after {}", FormattedDuration(*delay));
                }
                buf.push('\n');
            }
            ScanEventKind::BatchFinished { summary } => {
                self.write_batch_summary(summary, buf);
            }
            ScanEventKind::BatchCrashed { batch_index } => {
                swrite!(
                    buf,
                    "{:>12} [batch {}] worker exited without reporting a result\n",
                    "CRASH".style(self.styles.fail),
                    batch_index.style(self.styles.count),
                );
            }
            ScanEventKind::RunFinished { stats } => {
                self.write_run_stats(stats, buf);
            }
        }
    }

    fn write_batch_summary(&self, summary: &BatchRunSummary, buf: &mut String) {
        let style = if summary.passed() {
            self.styles.pass
        } else {
            self.styles.fail
        };
        swrite!(buf, "{:>12} ", "DONE".style(style));
        swrite!(
            buf,
            "[batch {}] [{:>8}] {} after {} {}",
            summary.batch_index.style(self.styles.count),
            FormattedDuration(summary.time_taken).to_string(),
            match &summary.verdict {
                BatchVerdict::Passed => "passed".style(self.styles.pass),
                BatchVerdict::Failed => "failed".style(self.styles.fail),
                BatchVerdict::Fatal(_) => "stopped".style(self.styles.fail),
            },
            summary.tries.len(),
            plural::tries_str(summary.tries.len()),
        );
        if let Some(collated) = &summary.collated {
            let flaky = collated.flaky().count();
            if flaky > 0 {
                swrite!(
                    buf,
                    ", {} flaky {}",
                    flaky.style(self.styles.retry),
                    plural::tests_str(flaky),
                );
            }
        }
        buf.push('\n');

        if let BatchVerdict::Fatal(error) = &summary.verdict {
            swrite!(
                buf,
                "{:>12} {}\n",
                "error:".style(self.styles.fail),
                DisplayErrorChain::new(error),
            );
        }
        if let Some(error) = &summary.collate_error {
            swrite!(
                buf,
                "{:>12} {}\n",
                "error:".style(self.styles.fail),
                DisplayErrorChain::new(error),
            );
        }
        if let Some(collated) = &summary.collated {
            for test in collated.failed() {
                swrite!(
                    buf,
                    "{:>12} {}\n",
                    "FAILED".style(self.styles.fail),
                    test.identifier,
                );
            }
            if let Some(path) = &collated.junit_path {
                swrite!(buf, "{:>12} {path}\n", "report:");
            }
        }
    }

    fn write_run_stats(&self, stats: &RunStats, buf: &mut String) {
        swrite!(buf, "{}\n", "-".repeat(12));
        let summary_style = if stats.passed() {
            self.styles.pass
        } else {
            self.styles.fail
        };
        swrite!(buf, "{:>12} ", "Summary".style(summary_style));
        swrite!(
            buf,
            "[{:>8}] {} {} run: {} passed",
            FormattedDuration(stats.elapsed).to_string(),
            stats.batch_count.style(self.styles.count),
            plural::batches_str(stats.batch_count),
            stats.batches_passed.style(self.styles.pass),
        );
        if stats.batches_failed > 0 {
            swrite!(
                buf,
                ", {} failed",
                stats.batches_failed.style(self.styles.fail)
            );
        }
        if stats.batches_crashed > 0 {
            swrite!(
                buf,
                ", {} crashed",
                stats.batches_crashed.style(self.styles.fail)
            );
        }
        if stats.retry_total_count > 0 {
            swrite!(
                buf,
                ", {} {}",
                stats.retry_total_count.style(self.styles.retry),
                plural::retries_str(stats.retry_total_count),
            );
        }
        buf.push('\n');
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    retry: Style,
    fail: Style,
    testable: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.retry = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.testable = Style::new().blue().bold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reporter::TryRecord, test_list::TestIdentifier};
    use chrono::Local;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn event(kind: ScanEventKind) -> ScanEvent {
        ScanEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: Duration::ZERO,
            kind,
        }
    }

    fn render(reporter: &ScanReporter, kind: ScanEventKind) -> String {
        let mut out = Vec::new();
        reporter.write_event(&event(kind), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn run_started_and_finished() {
        let reporter = ScanReporter::new();
        let started = render(
            &reporter,
            ScanEventKind::RunStarted {
                batch_count: 2,
                test_count: 5,
                max_tries: 3,
                parallel: true,
            },
        );
        assert_eq!(
            started,
            "    Starting 5 tests across 2 batches (up to 3 tries each) in parallel\n"
        );

        let finished = render(
            &reporter,
            ScanEventKind::RunFinished {
                stats: RunStats {
                    batch_count: 2,
                    test_count: 5,
                    batches_passed: 1,
                    batches_failed: 1,
                    batches_crashed: 0,
                    retry_total_count: 2,
                    elapsed: Duration::from_millis(1500),
                },
            },
        );
        assert_eq!(
            finished,
            indoc! {"
                ------------
                     Summary [   1.50s] 2 batches run: 1 passed, 1 failed, 2 retries
            "}
        );
    }

    #[test]
    fn try_finished_lists_failures_when_verbose() {
        let mut reporter = ScanReporter::new();
        reporter.set_verbose(true);
        let tests = vec![
            TestIdentifier::new("App/Suite/testA").unwrap(),
            TestIdentifier::new("App/Suite/testB").unwrap(),
        ];
        let output = render(
            &reporter,
            ScanEventKind::TryFinished {
                batch_index: 0,
                max_tries: 2,
                record: TryRecord {
                    try_number: 1,
                    tests: tests.clone(),
                    result: TryResult::TestsFailed {
                        failed: vec![tests[1].clone()],
                    },
                    reports: Vec::new(),
                    start_time: Local::now(),
                    time_taken: Duration::from_millis(250),
                },
            },
        );
        assert_eq!(
            output,
            "    TRY FAIL [batch 0] try 1/2 [   0.25s] 1 of 2 tests failed\n\
             \x20            App/Suite/testB\n"
        );
    }

    #[test]
    fn retrying_shows_delay() {
        let reporter = ScanReporter::new();
        let output = render(
            &reporter,
            ScanEventKind::BatchRetrying {
                batch_index: 1,
                try_number: 2,
                test_count: 1,
                delay: Duration::from_secs(2),
            },
        );
        assert_eq!(
            output,
            "       RETRY [batch 1] try 2 re-runs 1 failed test after 2.00s\n"
        );
    }
}
