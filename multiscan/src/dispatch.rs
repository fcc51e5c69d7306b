// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, StderrStyles, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use multiscan_runner::{
    config::{MultiscanConfig, RetryPolicy},
    exit_codes::MultiscanExitCode,
    helpers::plural,
    reporter::ScanReporter,
    runner::{Collaborators, ScanOptions, ScanRunnerBuilder},
    test_list::TestCollector,
};
use owo_colors::OwoColorize;
use std::{
    io::{self, BufWriter, Write},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, warn};

/// Runs UI test suites in batches, retrying only the tests that failed.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct MultiscanApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(subcommand)]
    command: Command,
}

impl MultiscanApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let workspace_root = self.config_opts.workspace_root()?;
        let config = MultiscanConfig::from_sources(
            workspace_root.clone(),
            self.config_opts.config_file.as_deref(),
        )?;
        debug!("loaded config from `{}`", config.config_file());

        match self.command {
            Command::Run(opts) => opts.exec(&workspace_root, &config, output),
            Command::List(opts) => opts.exec(&workspace_root, &config, output),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Directory relative paths are resolved against [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: workspace-root/.config/multiscan.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        if let Some(root) = &self.workspace_root {
            return Ok(root.clone());
        }
        let current_dir = std::env::current_dir()
            .map_err(|error| ExpectedError::CurrentDirFailed { error })?;
        Utf8PathBuf::try_from(current_dir)
            .map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
                path: err.into_path_buf(),
            })
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run tests, retrying failures
    Run(RunOpts),

    /// List the batches that would run, without running them
    List(ListOpts),
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Test selection")]
struct TestSelectionOpts {
    /// File listing tests to run, one `Testable/Suite/test` per line
    ///
    /// Overrides the `tests` list in the config.
    #[arg(long, value_name = "PATH")]
    test_list: Option<Utf8PathBuf>,

    /// Number of batches to split each testable's tests into
    #[arg(long, value_name = "N")]
    batch_count: Option<usize>,
}

impl TestSelectionOpts {
    fn collect(
        &self,
        workspace_root: &Utf8Path,
        config: &MultiscanConfig,
    ) -> Result<TestCollector> {
        let batch_count = self.batch_count.unwrap_or_else(|| config.batch_count());
        let collector = match &self.test_list {
            Some(path) => TestCollector::from_path(&workspace_root.join(path), batch_count)?,
            None => TestCollector::parse(&config.tests().join("\n"), batch_count)?,
        };
        if collector.test_count() == 0 {
            return Err(ExpectedError::NoTestsRun {
                test_list: self.test_list.clone(),
            });
        }
        Ok(collector)
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[command(flatten)]
    selection: TestSelectionOpts,

    #[command(flatten)]
    scan: ScanOpts,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Scan options")]
struct ScanOpts {
    /// Maximum number of times to try each batch
    #[arg(long, value_name = "N", env = "MULTISCAN_TRY_COUNT")]
    try_count: Option<usize>,

    /// Time to wait before each retry
    #[arg(
        long,
        value_name = "DURATION",
        value_parser = humantime::parse_duration,
        requires = "try_count"
    )]
    retry_delay: Option<Duration>,

    /// Run batches in parallel, each on its own device
    #[arg(long, overrides_with = "no_parallelize")]
    parallelize: bool,

    /// Run batches one after another
    #[arg(long, overrides_with = "parallelize")]
    no_parallelize: bool,

    /// Directory to write reports to
    #[arg(long, value_name = "DIR")]
    output_directory: Option<Utf8PathBuf>,

    /// Collect code coverage on the first try of each batch
    #[arg(long)]
    code_coverage: bool,
}

impl ScanOpts {
    fn apply(
        &self,
        workspace_root: &Utf8Path,
        options: &mut ScanOptions,
        builder: &mut ScanRunnerBuilder,
    ) {
        if let Some(count) = self.try_count {
            let delay = self.retry_delay.unwrap_or_default();
            builder.set_retry_policy(RetryPolicy::Fixed {
                count: count.max(1),
                delay,
            });
            if count == 0 {
                warn!("--try-count 0 is treated as 1");
            }
        }
        if self.parallelize {
            builder.set_parallelize(true);
        } else if self.no_parallelize {
            builder.set_parallelize(false);
        }
        if let Some(dir) = &self.output_directory {
            options.output_directory = workspace_root.join(dir);
        }
        if self.code_coverage {
            options.code_coverage = true;
        }
    }
}

impl RunOpts {
    fn exec(
        self,
        workspace_root: &Utf8Path,
        config: &MultiscanConfig,
        output: OutputContext,
    ) -> Result<i32> {
        let collector = self.selection.collect(workspace_root, config)?;
        let engine = config.command_engine()?;

        let mut options = config.scan_options();
        let mut builder = ScanRunnerBuilder::default();
        self.scan.apply(workspace_root, &mut options, &mut builder);

        let collaborators = Collaborators::new(Arc::new(engine))
            .with_metadata(Arc::new(config.batch_metadata()))
            .with_resource_pool(Box::new(config.device_pool()));
        let runner = builder.build(&collector, options, collaborators)?;

        let mut reporter = ScanReporter::new();
        if output.color.should_colorize(supports_color::Stream::Stderr) {
            reporter.colorize();
        }
        reporter.set_verbose(output.verbose);

        let mut write_error = None;
        let stats = runner
            .execute(|event| {
                let mut stderr = io::stderr().lock();
                if let Err(err) = reporter.write_event(&event, &mut stderr) {
                    write_error.get_or_insert(err);
                }
            })
            .map_err(ExpectedError::scan_error)?;

        if let Some(err) = write_error {
            return Err(ExpectedError::WriteOutputError { err });
        }
        if stats.passed() {
            Ok(MultiscanExitCode::OK)
        } else {
            Err(ExpectedError::TestRunFailed)
        }
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    #[command(flatten)]
    selection: TestSelectionOpts,
}

impl ListOpts {
    fn exec(
        self,
        workspace_root: &Utf8Path,
        config: &MultiscanConfig,
        output: OutputContext,
    ) -> Result<i32> {
        let collector = self.selection.collect(workspace_root, config)?;
        let options = config.scan_options();
        let styles = output.stderr_styles();

        let mut writer = BufWriter::new(io::stdout());
        write_batches(&collector, &options, output.verbose, &styles, &mut writer)
            .and_then(|()| writer.flush())
            .map_err(|err| ExpectedError::WriteOutputError { err })?;
        Ok(MultiscanExitCode::OK)
    }
}

fn write_batches(
    collector: &TestCollector,
    options: &ScanOptions,
    verbose: bool,
    styles: &StderrStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let batch_count = collector.batches().len();
    let testable_count = collector.testables().len();
    writeln!(
        writer,
        "{} {} across {} {} in {} {}:",
        collector.test_count().style(styles.count),
        plural::tests_str(collector.test_count()),
        testable_count.style(styles.count),
        plural::testables_str(testable_count),
        batch_count.style(styles.count),
        plural::batches_str(batch_count),
    )?;
    for batch in collector.batches() {
        writeln!(
            writer,
            "  batch {}: {} ({} {}) -> {}",
            batch.index.style(styles.count),
            batch.testable.style(styles.bold),
            batch.tests.len(),
            plural::tests_str(batch.tests.len()),
            collector.output_directory(&options.output_directory, batch, options.parallelize),
        )?;
        if verbose {
            for test in &batch.tests {
                writeln!(writer, "      {test}")?;
            }
        }
    }
    Ok(())
}
