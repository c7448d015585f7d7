//! Application configuration
//!
//! Loaded from TOML; every section falls back to defaults so a partial
//! file (or no file at all) is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{CodecError, Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub peer: PeerConfig,
    pub codec: EncoderConfig,
    pub network: NetworkConfig,
    pub api: ApiConfig,
}

/// Local peer identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Opaque id announced to remote peers; random when unset
    pub peer_id: Option<String>,
}

/// Lossless encoder settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// 0 (fastest) to 8 (smallest)
    pub compression_level: u8,
}

/// Peer transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_address: String,
    pub listen_port: u16,
    /// Peers to dial at startup (`host:port`)
    pub connect: Vec<String>,
    /// Disable Nagle on peer sockets
    pub nodelay: bool,
}

/// HTTP control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
    /// Directory served under `/` next to the API
    pub static_dir: Option<PathBuf>,
}

/// Partially specified encoder settings, as carried by an `init` request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfigOverrides {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub bits_per_sample: Option<u16>,
    pub compression_level: Option<u8>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl EncoderConfig {
    /// Fill omitted fields with defaults
    pub fn from_overrides(overrides: EncoderConfigOverrides) -> Self {
        let defaults = Self::default();
        Self {
            sample_rate: overrides.sample_rate.unwrap_or(defaults.sample_rate),
            channels: overrides.channels.unwrap_or(defaults.channels),
            bits_per_sample: overrides.bits_per_sample.unwrap_or(defaults.bits_per_sample),
            compression_level: overrides
                .compression_level
                .unwrap_or(defaults.compression_level),
        }
    }

    /// Check the settings against what the stream format can carry
    pub fn validate(&self) -> std::result::Result<(), CodecError> {
        if self.channels == 0 || self.channels > 8 {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported channel count: {}",
                self.channels
            )));
        }
        if !(8..=24).contains(&self.bits_per_sample) {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported bits per sample: {}",
                self.bits_per_sample
            )));
        }
        if self.sample_rate == 0 || self.sample_rate > 655_350 {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported sample rate: {}",
                self.sample_rate
            )));
        }
        if self.compression_level > 8 {
            return Err(CodecError::EncoderInit(format!(
                "Compression level out of range: {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// The same settings with every field present
    pub fn to_overrides(&self) -> EncoderConfigOverrides {
        EncoderConfigOverrides {
            sample_rate: Some(self.sample_rate),
            channels: Some(self.channels),
            bits_per_sample: Some(self.bits_per_sample),
            compression_level: Some(self.compression_level),
        }
    }

    /// Bytes per sample in the exported container
    pub fn bytes_per_sample(&self) -> u16 {
        self.bits_per_sample.div_ceil(8)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PEER_PORT,
            connect: Vec::new(),
            nodelay: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
            static_dir: None,
        }
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "peer-mixer").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration, falling back to defaults when no file exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config
            .codec
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Peer id from config, or a fresh random one
    pub fn resolve_peer_id(&self) -> String {
        self.peer
            .peer_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_defaults() {
        let config = EncoderConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 1);
        assert_eq!(config.bits_per_sample, 16);
        assert_eq!(config.compression_level, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_fill_missing_fields() {
        let config = EncoderConfig::from_overrides(EncoderConfigOverrides {
            sample_rate: Some(48000),
            compression_level: Some(8),
            ..Default::default()
        });
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.compression_level, 8);
        assert_eq!(config.channels, 1);
        assert_eq!(config.bits_per_sample, 16);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EncoderConfig::default();
        config.channels = 0;
        assert!(config.validate().is_err());

        let mut config = EncoderConfig::default();
        config.bits_per_sample = 32;
        assert!(config.validate().is_err());

        let mut config = EncoderConfig::default();
        config.compression_level = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            listen_port = 7100
            connect = ["10.0.0.2:7000"]

            [codec]
            compression_level = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.network.listen_port, 7100);
        assert_eq!(config.network.connect, vec!["10.0.0.2:7000".to_string()]);
        assert_eq!(config.codec.compression_level, 2);
        assert_eq!(config.codec.sample_rate, 44100);
        assert!(config.api.enabled);
    }

    #[test]
    fn test_invalid_codec_section_is_config_error() {
        let result = AppConfig::from_toml("[codec]\nbits_per_sample = 4\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("peer-mixer-missing-config.toml");
        let _ = std::fs::remove_file(&path);
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.network.listen_port, DEFAULT_PEER_PORT);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("peer-mixer-{}", uuid::Uuid::new_v4()))
            .join("config.toml");
        let mut config = AppConfig::default();
        config.peer.peer_id = Some("studio-a".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.resolve_peer_id(), "studio-a");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
