// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{RetryPolicy, deserialize_retry_policy};
use crate::{
    devices::{Device, DevicePool, PlatformVersion, StaticMetadata},
    engine::CommandEngine,
    errors::{ConfigParseError, ConfigParseErrorKind},
    report_name::ReportNamer,
    runner::ScanOptions,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// This allows warnings to be logged (the default), or collected for testing purposes.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the tracing crate.
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        workspace_root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        let unknown_str = if unknown.len() == 1 {
            // Print this on the same line.
            format!("key: {}", unknown.iter().join(""))
        } else {
            format!(
                "keys:\n{}",
                unknown.iter().map(|key| format!("  - {key}")).join("\n")
            )
        };

        warn!(
            "in config file {}, ignoring unknown configuration {unknown_str}",
            config_file
                .strip_prefix(workspace_root)
                .unwrap_or(config_file),
        )
    }
}

/// Overall multiscan configuration.
///
/// Built from the embedded default config, overlaid with the user's config file.
#[derive(Clone, Debug)]
pub struct MultiscanConfig {
    workspace_root: Utf8PathBuf,
    config_file: Utf8PathBuf,
    inner: MultiscanConfigDeserialize,
    report_namer: ReportNamer,
}

impl MultiscanConfig {
    /// The default location of the config within the workspace: `.config/multiscan.toml`.
    pub const CONFIG_PATH: &'static str = ".config/multiscan.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Reads the config from the embedded defaults and `config_file`.
    ///
    /// If `config_file` is `None`, `.config/multiscan.toml` within `workspace_root` is used if it
    /// exists.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_with_warnings(workspace_root, config_file, &mut DefaultConfigWarnings)
    }

    /// Reads the config, with custom handling for warnings.
    pub fn from_sources_with_warnings(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (inner, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &workspace_root, &unknown);
        }

        let report_namer = inner
            .validate()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok(Self {
            workspace_root,
            config_file,
            inner,
            report_namer,
        })
    }

    /// Returns the config file that was read (or would have been read, if it didn't exist).
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the options for a scan, with paths resolved against the workspace root.
    pub fn scan_options(&self) -> ScanOptions {
        let scan = &self.inner.scan;
        ScanOptions {
            retry_policy: scan.try_count,
            parallelize: scan.parallelize,
            output_directory: self.workspace_root.join(&scan.output_directory),
            report_namer: self.report_namer.clone(),
            code_coverage: scan.code_coverage,
            detach_grace_period: scan.detach_grace_period,
        }
    }

    /// Returns the number of batches each testable is split into.
    pub fn batch_count(&self) -> usize {
        self.inner.scan.batch_count
    }

    /// Returns the tests listed in the config, if any.
    pub fn tests(&self) -> &[String] {
        &self.inner.tests
    }

    /// Returns a pool of the configured devices.
    pub fn device_pool(&self) -> DevicePool {
        DevicePool::new(self.inner.devices.iter().cloned())
    }

    /// Returns per-testable metadata from the `[testables]` table.
    pub fn batch_metadata(&self) -> StaticMetadata {
        StaticMetadata::new(
            self.inner
                .testables
                .iter()
                .filter_map(|(name, testable)| {
                    let version = testable.minimum_platform_version.clone()?;
                    Some((name.clone(), version))
                })
                .collect(),
        )
    }

    /// Returns the engine described by the `[engine]` table.
    ///
    /// Returns an error if no program is configured.
    pub fn command_engine(&self) -> Result<CommandEngine, ConfigParseError> {
        let engine = &self.inner.engine;
        let program = engine.program.clone().ok_or_else(|| {
            ConfigParseError::new(
                &self.config_file,
                ConfigParseErrorKind::InvalidValue {
                    key: "engine.program",
                    reason: "a test engine program must be configured".to_owned(),
                },
            )
        })?;
        Ok(CommandEngine::new(
            program,
            engine.args.clone(),
            engine.test_failure_exit_codes.clone(),
        ))
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(MultiscanConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: MultiscanConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key. Drop it from the config error so it
                // isn't printed twice.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MultiscanConfigDeserialize {
    scan: ScanConfig,
    engine: EngineConfig,
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    testables: IndexMap<String, TestableConfig>,
    #[serde(default)]
    tests: Vec<String>,
}

impl MultiscanConfigDeserialize {
    fn validate(&self) -> Result<ReportNamer, ConfigParseErrorKind> {
        if self.scan.batch_count == 0 {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "scan.batch-count",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.engine.program.as_deref() == Some("") {
            return Err(ConfigParseErrorKind::InvalidValue {
                key: "engine.program",
                reason: "must not be empty".to_owned(),
            });
        }

        let namer = ReportNamer::new(
            Some(&self.scan.output_types),
            self.scan.output_files.as_deref(),
            self.scan.custom_report_file_name.as_deref(),
        )?;
        Ok(namer)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ScanConfig {
    #[serde(deserialize_with = "deserialize_retry_policy")]
    try_count: RetryPolicy,
    batch_count: usize,
    parallelize: bool,
    output_directory: Utf8PathBuf,
    output_types: String,
    #[serde(default)]
    output_files: Option<String>,
    #[serde(default)]
    custom_report_file_name: Option<String>,
    code_coverage: bool,
    #[serde(with = "humantime_serde")]
    detach_grace_period: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EngineConfig {
    #[serde(default)]
    program: Option<String>,
    args: Vec<String>,
    test_failure_exit_codes: Vec<i32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TestableConfig {
    #[serde(default)]
    minimum_platform_version: Option<PlatformVersion>,
}
