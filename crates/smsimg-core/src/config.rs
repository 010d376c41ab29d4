use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SmsimgError, SmsimgResult};

/// Top-level configuration (loaded from smsimg.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsimgConfig {
    pub compress: CompressConfig,
    pub fragments: FragmentConfig,
    pub keystore: KeyStoreConfig,
    pub output: OutputConfig,
    pub log: LogConfig,
}

/// Byte-budget search parameters for the compressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    /// Maximum decoded payload size in bytes (default: 5500, ~50 SMS)
    pub target_bytes: usize,
    /// First width tried, in pixels
    pub initial_width: u32,
    /// Search stops once the width drops below this
    pub min_width: u32,
    /// First JPEG quality tried, in (0, 1]
    pub initial_quality: f64,
    /// Search stops once the quality drops below this
    pub min_quality: f64,
    /// Quality decrement per attempt
    pub quality_step: f64,
    /// Width multiplier per attempt (floored)
    pub width_ratio: f64,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            target_bytes: 5500,
            initial_width: 128,
            min_width: 64,
            initial_quality: 0.8,
            min_quality: 0.35,
            quality_step: 0.1,
            width_ratio: 0.85,
        }
    }
}

/// How reassembly treats fragment indices that never arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReassemblyMode {
    /// Any missing index fails the transfer
    #[default]
    Strict,
    /// Concatenate whatever arrived, in index order
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Characters of encoded payload per fragment (default: 110)
    pub chunk_size: usize,
    /// Advisory fragment count; exceeding it only logs a warning
    pub max_fragments: usize,
    pub reassembly: ReassemblyMode,
    /// Encrypt/decrypt fragments on the rayon pool
    pub parallel: bool,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            chunk_size: 110,
            max_fragments: 50,
            reassembly: ReassemblyMode::Strict,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyBackendKind {
    /// Platform keychain (Keychain Services, Secret Service, Credential Manager)
    #[default]
    Keychain,
    /// Single base64 key file
    File,
    /// Process-local only; every run gets a fresh key
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub backend: KeyBackendKind,
    /// Keychain service name
    pub service: String,
    /// Storage identifier of the persisted key
    pub entry: String,
    /// Key file path for the `file` backend
    pub key_file: Option<PathBuf>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            backend: KeyBackendKind::Keychain,
            service: "smsimg".into(),
            entry: "smsimg-encryption-key".into(),
            key_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory reconstructed images are written to
    pub dir: PathBuf,
    /// File extension of reconstructed images
    pub extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.cache/smsimg"),
            extension: "jpg".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SmsimgConfig {
    /// Parse a TOML document, applying defaults for missing keys.
    pub fn from_toml(s: &str) -> SmsimgResult<Self> {
        let config: SmsimgConfig =
            toml::from_str(s).map_err(|e| SmsimgError::Config(format!("parsing config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> SmsimgResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Reject knob combinations the pipeline cannot run with.
    pub fn validate(&self) -> SmsimgResult<()> {
        let c = &self.compress;
        if c.target_bytes == 0 {
            return Err(SmsimgError::Config("compress.target_bytes must be > 0".into()));
        }
        if c.min_width == 0 || c.min_width > c.initial_width {
            return Err(SmsimgError::Config(format!(
                "compress.min_width must be in 1..={} (got {})",
                c.initial_width, c.min_width
            )));
        }
        if !(c.min_quality > 0.0 && c.min_quality <= c.initial_quality && c.initial_quality <= 1.0)
        {
            return Err(SmsimgError::Config(format!(
                "compress quality bounds must satisfy 0 < min ({}) <= initial ({}) <= 1",
                c.min_quality, c.initial_quality
            )));
        }
        if !(c.quality_step > 0.0) {
            return Err(SmsimgError::Config("compress.quality_step must be > 0".into()));
        }
        if !(c.width_ratio > 0.0 && c.width_ratio < 1.0) {
            return Err(SmsimgError::Config(format!(
                "compress.width_ratio must be in (0, 1) (got {})",
                c.width_ratio
            )));
        }
        if self.fragments.chunk_size == 0 {
            return Err(SmsimgError::Config("fragments.chunk_size must be > 0".into()));
        }
        if self.keystore.backend == KeyBackendKind::File && self.keystore.key_file.is_none() {
            return Err(SmsimgError::Config(
                "keystore.key_file is required for the file backend".into(),
            ));
        }
        if self.output.extension.is_empty() || self.output.extension.contains(['/', '.']) {
            return Err(SmsimgError::Config(format!(
                "output.extension must be a bare extension (got {:?})",
                self.output.extension
            )));
        }
        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
