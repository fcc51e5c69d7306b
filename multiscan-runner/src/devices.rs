// Copyright (c) The multiscan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Devices that batches run on, and the pool they are allocated from.
//!
//! In parallel mode, every batch is bound to exactly one device for the duration of its worker.
//! The pool is only touched by the coordinator: once before any worker starts, and once after
//! every worker has been joined.

use crate::errors::{DeviceAllocationError, PlatformVersionParseError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{cmp::Ordering, collections::BTreeSet, fmt, str::FromStr};

/// An OS version such as `14.2` or `15.0.1`.
///
/// Versions with fewer than three components are padded with zeroes for comparison, but are
/// displayed as originally written.
#[derive(Clone, Debug)]
pub struct PlatformVersion {
    version: semver::Version,
    input: String,
}

impl PlatformVersion {
    /// Returns the version, padded to three components.
    pub fn version(&self) -> &semver::Version {
        &self.version
    }
}

impl FromStr for PlatformVersion {
    type Err = PlatformVersionParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let padded = match trimmed.matches('.').count() {
            0 => format!("{trimmed}.0.0"),
            1 => format!("{trimmed}.0"),
            _ => trimmed.to_owned(),
        };
        let version = semver::Version::parse(&padded)
            .map_err(|error| PlatformVersionParseError::new(input, error))?;
        Ok(Self {
            version,
            input: trimmed.to_owned(),
        })
    }
}

impl fmt::Display for PlatformVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

impl PartialEq for PlatformVersion {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for PlatformVersion {}

impl PartialOrd for PlatformVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlatformVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl<'de> Deserialize<'de> for PlatformVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let input = String::deserialize(deserializer)?;
        input.parse().map_err(serde::de::Error::custom)
    }
}

/// A device (typically a simulator) that a batch can run on.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Device {
    /// The identifier passed to the engine as the destination.
    pub id: String,

    /// A human-readable name.
    pub name: String,

    /// The OS version the device runs.
    pub platform_version: PlatformVersion,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.platform_version, self.id)
    }
}

/// Requirements a device must meet to run a batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceConstraint {
    /// The lowest OS version the batch's testable supports, if known.
    pub minimum_platform_version: Option<PlatformVersion>,
}

impl DeviceConstraint {
    /// Returns true if the device satisfies this constraint.
    pub fn is_satisfied_by(&self, device: &Device) -> bool {
        self.minimum_platform_version
            .as_ref()
            .is_none_or(|min| device.platform_version >= *min)
    }
}

impl fmt::Display for DeviceConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.minimum_platform_version {
            Some(version) => write!(f, "minimum platform version {version}"),
            None => f.write_str("any platform version"),
        }
    }
}

/// A device bound to a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceAllocation {
    /// The batch the device is bound to.
    pub batch_index: usize,

    /// The device.
    pub device: Device,

    /// The constraint used to pick the device.
    pub constraint: DeviceConstraint,
}

/// A source of devices for parallel batches.
pub trait ResourcePool: Send {
    /// Allocates a free device satisfying `constraint`.
    ///
    /// A device stays allocated until it is passed to [`Self::release`].
    fn allocate(&mut self, constraint: &DeviceConstraint) -> Result<Device, DeviceAllocationError>;

    /// Returns a previously allocated device to the pool.
    fn release(&mut self, device: &Device);
}

/// A fixed pool of devices, handed out in the order they were configured.
#[derive(Clone, Debug, Default)]
pub struct DevicePool {
    devices: Vec<Device>,
    in_use: BTreeSet<String>,
}

impl DevicePool {
    /// Creates a new pool. Devices with a duplicate ID are ignored.
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        let mut seen = BTreeSet::new();
        let devices = devices
            .into_iter()
            .filter(|device| seen.insert(device.id.clone()))
            .collect();
        Self {
            devices,
            in_use: BTreeSet::new(),
        }
    }

    /// Returns the number of devices not currently allocated.
    pub fn free_count(&self) -> usize {
        self.devices.len() - self.in_use.len()
    }

    /// Returns the total number of devices in the pool.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true if the pool has no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl ResourcePool for DevicePool {
    fn allocate(&mut self, constraint: &DeviceConstraint) -> Result<Device, DeviceAllocationError> {
        let device = self
            .devices
            .iter()
            .find(|device| !self.in_use.contains(&device.id) && constraint.is_satisfied_by(device))
            .cloned()
            .ok_or_else(|| {
                DeviceAllocationError::new(constraint.clone(), self.free_count(), self.len())
            })?;
        self.in_use.insert(device.id.clone());
        Ok(device)
    }

    fn release(&mut self, device: &Device) {
        self.in_use.remove(&device.id);
    }
}

/// Per-testable information used to pick devices.
pub trait BatchMetadata: Send + Sync {
    /// Returns the lowest OS version `testable` can run on, if known.
    fn minimum_platform_version(&self, testable: &str) -> Option<PlatformVersion>;
}

/// [`BatchMetadata`] read from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticMetadata {
    minimum_versions: IndexMap<String, PlatformVersion>,
}

impl StaticMetadata {
    /// Creates a new instance from a map of testable names to minimum versions.
    pub fn new(minimum_versions: IndexMap<String, PlatformVersion>) -> Self {
        Self { minimum_versions }
    }
}

impl BatchMetadata for StaticMetadata {
    fn minimum_platform_version(&self, testable: &str) -> Option<PlatformVersion> {
        self.minimum_versions.get(testable).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn device(id: &str, version: &str) -> Device {
        Device {
            id: id.to_owned(),
            name: format!("device {id}"),
            platform_version: version.parse().expect("valid version"),
        }
    }

    fn constraint(min: Option<&str>) -> DeviceConstraint {
        DeviceConstraint {
            minimum_platform_version: min.map(|v| v.parse().expect("valid version")),
        }
    }

    #[test_case("14", "14.0.0" ; "major only")]
    #[test_case("14.2", "14.2.0" ; "major and minor")]
    #[test_case("15.0.1", "15.0.1" ; "full")]
    fn platform_version_padding(input: &str, expected: &str) {
        let version: PlatformVersion = input.parse().unwrap();
        assert_eq!(version.version().to_string(), expected);
        assert_eq!(version.to_string(), input, "displayed as written");
    }

    #[test]
    fn platform_version_ordering() {
        let v: Vec<PlatformVersion> = ["13.7", "14", "14.0.0", "14.2"]
            .iter()
            .map(|v| v.parse().unwrap())
            .collect();
        assert!(v[0] < v[1]);
        assert_eq!(v[1], v[2]);
        assert!(v[2] < v[3]);
    }

    #[test]
    fn platform_version_parse_error_keeps_source() {
        let error = "fourteen".parse::<PlatformVersion>().unwrap_err();
        // Parse errors travel inside cloneable scan events.
        let cloned = error.clone();
        assert_eq!(cloned.to_string(), "invalid platform version `fourteen`");
        assert!(std::error::Error::source(&cloned).is_some());
    }

    #[test]
    fn allocate_honors_constraint_and_never_aliases() {
        let mut pool = DevicePool::new([
            device("old", "13.0"),
            device("new-a", "14.2"),
            device("new-b", "15.0"),
        ]);

        let first = pool.allocate(&constraint(Some("14.0"))).unwrap();
        assert_eq!(first.id, "new-a");
        let second = pool.allocate(&constraint(Some("14.0"))).unwrap();
        assert_eq!(second.id, "new-b");

        let error = pool.allocate(&constraint(Some("14.0"))).unwrap_err();
        assert_eq!(
            error.to_string(),
            "no free device satisfies minimum platform version 14.0 (1 of 3 devices free)"
        );

        let any = pool.allocate(&constraint(None)).unwrap();
        assert_eq!(any.id, "old");
        assert_eq!(pool.free_count(), 0);

        pool.release(&first);
        assert_eq!(pool.free_count(), 1);
        let again = pool.allocate(&constraint(Some("14.0"))).unwrap();
        assert_eq!(again.id, "new-a");
    }

    #[test]
    fn duplicate_devices_are_ignored() {
        let pool = DevicePool::new([device("a", "14.0"), device("a", "15.0")]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn static_metadata_lookup() {
        let mut versions = IndexMap::new();
        versions.insert("AppUITests".to_owned(), "13.0".parse().unwrap());
        let metadata = StaticMetadata::new(versions);
        assert_eq!(
            metadata
                .minimum_platform_version("AppUITests")
                .map(|v| v.to_string()),
            Some("13.0".to_owned())
        );
        assert_eq!(metadata.minimum_platform_version("Other"), None);
    }
}
