// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Product builder configuration.
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.

use crate::checksum::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest data offset accepted by default (22 bits).
pub const DEFAULT_MAX_PART_OFFSET: u64 = 4_194_303;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Product builder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Root of the per-VCID scratch areas.
    #[serde(default = "default_active_dir")]
    pub active_dir: PathBuf,

    /// Root of published products.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum allowed data PDU offset.
    #[serde(default = "default_max_part_offset")]
    pub max_part_offset: u64,

    /// Verify the flight checksum at finalize.
    #[serde(default)]
    pub validate_checksum: bool,

    #[serde(default)]
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Mission uses the commanded-product header variant.
    #[serde(default = "default_true")]
    pub use_commanded_header: bool,

    /// APIDs carrying commanded (non-streaming) products.
    #[serde(default)]
    pub commanded_apids: BTreeSet<u16>,

    /// Interpret 8-byte transaction ids as their upper 63 bits.
    #[serde(default)]
    pub use_upper_63_tsn_bits: bool,

    /// Finalize the previous product as partial when a channel changes product.
    #[serde(default)]
    pub force_partial_on_change: bool,

    /// Finalize on every End PDU, complete or not.
    #[serde(default)]
    pub force_partial_on_end: bool,

    /// Flush in-progress transactions as partials at shutdown.
    #[serde(default)]
    pub force_partials_on_shutdown: bool,

    /// Rename scratch directories instead of deleting them after finalize.
    #[serde(default)]
    pub archive_active_dirs: bool,

    #[serde(default = "default_dvt_marker")]
    pub filename_dvt_marker: String,

    #[serde(default = "default_dvt_separator")]
    pub filename_dvt_separator: String,

    /// VCIDs this builder accepts (empty accepts all).
    #[serde(default)]
    pub allowed_vcids: BTreeSet<u32>,
}

fn default_active_dir() -> PathBuf {
    PathBuf::from("./products/active")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./products")
}

fn default_max_part_offset() -> u64 {
    DEFAULT_MAX_PART_OFFSET
}

fn default_true() -> bool {
    true
}

fn default_dvt_marker() -> String {
    "_".to_string()
}

fn default_dvt_separator() -> String {
    "-".to_string()
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            active_dir: default_active_dir(),
            output_dir: default_output_dir(),
            max_part_offset: DEFAULT_MAX_PART_OFFSET,
            validate_checksum: false,
            checksum_algorithm: ChecksumAlgorithm::default(),
            use_commanded_header: true,
            commanded_apids: BTreeSet::new(),
            use_upper_63_tsn_bits: false,
            force_partial_on_change: false,
            force_partial_on_end: false,
            force_partials_on_shutdown: false,
            archive_active_dirs: false,
            filename_dvt_marker: default_dvt_marker(),
            filename_dvt_separator: default_dvt_separator(),
            allowed_vcids: BTreeSet::new(),
        }
    }
}

impl BuilderConfig {
    /// Create a new config builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filename_dvt_marker.is_empty() {
            return Err(ConfigError::Invalid("filename DVT marker is empty".into()));
        }
        if self.filename_dvt_separator.is_empty() {
            return Err(ConfigError::Invalid(
                "filename DVT separator is empty".into(),
            ));
        }
        if self.active_dir == self.output_dir {
            return Err(ConfigError::Invalid(format!(
                "active and output directories are both {}",
                self.active_dir.display()
            )));
        }
        Ok(())
    }

    /// True when `vcid` is admitted by `allowed_vcids`.
    pub fn accepts_vcid(&self, vcid: u32) -> bool {
        self.allowed_vcids.is_empty() || self.allowed_vcids.contains(&vcid)
    }

    /// Scratch root for one virtual channel.
    pub fn channel_dir(&self, vcid: u32) -> PathBuf {
        self.active_dir.join(format!("active-{vcid}"))
    }
}

/// Config builder for fluent API.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    active_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    max_part_offset: Option<u64>,
    validate_checksum: Option<bool>,
    checksum_algorithm: Option<ChecksumAlgorithm>,
    use_commanded_header: Option<bool>,
    commanded_apids: BTreeSet<u16>,
    use_upper_63_tsn_bits: Option<bool>,
    force_partial_on_change: Option<bool>,
    force_partial_on_end: Option<bool>,
    force_partials_on_shutdown: Option<bool>,
    archive_active_dirs: Option<bool>,
    filename_dvt_marker: Option<String>,
    filename_dvt_separator: Option<String>,
    allowed_vcids: BTreeSet<u32>,
}

impl ConfigBuilder {
    pub fn active_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.active_dir = Some(dir.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Place both the scratch and the output tree under `root`.
    pub fn root_dir(self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.active_dir(root.join("active")).output_dir(root.join("products"))
    }

    pub fn max_part_offset(mut self, offset: u64) -> Self {
        self.max_part_offset = Some(offset);
        self
    }

    pub fn validate_checksum(mut self, enabled: bool) -> Self {
        self.validate_checksum = Some(enabled);
        self
    }

    pub fn checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = Some(algorithm);
        self
    }

    pub fn use_commanded_header(mut self, enabled: bool) -> Self {
        self.use_commanded_header = Some(enabled);
        self
    }

    /// Mark an APID as a commanded product.
    pub fn commanded_apid(mut self, apid: u16) -> Self {
        self.commanded_apids.insert(apid);
        self
    }

    pub fn use_upper_63_tsn_bits(mut self, enabled: bool) -> Self {
        self.use_upper_63_tsn_bits = Some(enabled);
        self
    }

    pub fn force_partial_on_change(mut self, enabled: bool) -> Self {
        self.force_partial_on_change = Some(enabled);
        self
    }

    pub fn force_partial_on_end(mut self, enabled: bool) -> Self {
        self.force_partial_on_end = Some(enabled);
        self
    }

    pub fn force_partials_on_shutdown(mut self, enabled: bool) -> Self {
        self.force_partials_on_shutdown = Some(enabled);
        self
    }

    pub fn archive_active_dirs(mut self, enabled: bool) -> Self {
        self.archive_active_dirs = Some(enabled);
        self
    }

    pub fn filename_dvt_marker(mut self, marker: impl Into<String>) -> Self {
        self.filename_dvt_marker = Some(marker.into());
        self
    }

    pub fn filename_dvt_separator(mut self, separator: impl Into<String>) -> Self {
        self.filename_dvt_separator = Some(separator.into());
        self
    }

    /// Admit a VCID (once any VCID is added, all others are refused).
    pub fn allow_vcid(mut self, vcid: u32) -> Self {
        self.allowed_vcids.insert(vcid);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> BuilderConfig {
        let defaults = BuilderConfig::default();

        BuilderConfig {
            active_dir: self.active_dir.unwrap_or(defaults.active_dir),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            max_part_offset: self.max_part_offset.unwrap_or(defaults.max_part_offset),
            validate_checksum: self
                .validate_checksum
                .unwrap_or(defaults.validate_checksum),
            checksum_algorithm: self
                .checksum_algorithm
                .unwrap_or(defaults.checksum_algorithm),
            use_commanded_header: self
                .use_commanded_header
                .unwrap_or(defaults.use_commanded_header),
            commanded_apids: self.commanded_apids,
            use_upper_63_tsn_bits: self
                .use_upper_63_tsn_bits
                .unwrap_or(defaults.use_upper_63_tsn_bits),
            force_partial_on_change: self
                .force_partial_on_change
                .unwrap_or(defaults.force_partial_on_change),
            force_partial_on_end: self
                .force_partial_on_end
                .unwrap_or(defaults.force_partial_on_end),
            force_partials_on_shutdown: self
                .force_partials_on_shutdown
                .unwrap_or(defaults.force_partials_on_shutdown),
            archive_active_dirs: self
                .archive_active_dirs
                .unwrap_or(defaults.archive_active_dirs),
            filename_dvt_marker: self
                .filename_dvt_marker
                .unwrap_or(defaults.filename_dvt_marker),
            filename_dvt_separator: self
                .filename_dvt_separator
                .unwrap_or(defaults.filename_dvt_separator),
            allowed_vcids: self.allowed_vcids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BuilderConfig::default();

        assert_eq!(config.max_part_offset, 4_194_303);
        assert!(!config.validate_checksum);
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Cfdp);
        assert!(config.use_commanded_header);
        assert!(!config.use_upper_63_tsn_bits);
        assert!(!config.force_partial_on_change);
        assert!(!config.force_partial_on_end);
        assert_eq!(config.filename_dvt_marker, "_");
        assert_eq!(config.filename_dvt_separator, "-");
        assert!(config.accepts_vcid(17));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = BuilderConfig::builder()
            .root_dir("/data/gds")
            .validate_checksum(true)
            .checksum_algorithm(ChecksumAlgorithm::Crc32)
            .commanded_apid(1200)
            .force_partial_on_change(true)
            .allow_vcid(6)
            .build();

        assert_eq!(config.active_dir, PathBuf::from("/data/gds/active"));
        assert_eq!(config.output_dir, PathBuf::from("/data/gds/products"));
        assert!(config.validate_checksum);
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Crc32);
        assert!(config.commanded_apids.contains(&1200));
        assert!(config.force_partial_on_change);
        assert!(config.accepts_vcid(6));
        assert!(!config.accepts_vcid(7));
        assert_eq!(
            config.channel_dir(6),
            PathBuf::from("/data/gds/active/active-6")
        );
    }

    #[test]
    fn test_from_toml_fills_defaults() {
        let config = BuilderConfig::from_toml(
            r#"
            output_dir = "/tmp/out"
            validate_checksum = true
            checksum_algorithm = "crc32"
            commanded_apids = [5, 6]
            "#,
        )
        .expect("parse");

        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.active_dir, PathBuf::from("./products/active"));
        assert!(config.validate_checksum);
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Crc32);
        assert_eq!(config.commanded_apids.len(), 2);
        assert_eq!(config.max_part_offset, DEFAULT_MAX_PART_OFFSET);
    }

    #[test]
    fn test_validation_errors() {
        let err = BuilderConfig::from_toml(r#"filename_dvt_marker = """#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let same = BuilderConfig::builder()
            .active_dir("/x")
            .output_dir("/x")
            .build();
        assert!(same.validate().is_err());

        let bad = BuilderConfig::from_toml("max_part_offset = \"lots\"").unwrap_err();
        assert!(matches!(bad, ConfigError::Toml(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("builder.toml");
        std::fs::write(&path, "force_partial_on_end = true\nallowed_vcids = [1]\n").expect("write");

        let config = BuilderConfig::from_file(&path).expect("load");
        assert!(config.force_partial_on_end);
        assert!(!config.accepts_vcid(2));
    }
}
