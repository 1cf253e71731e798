//! Settings record
//!
//! Persisted device configuration, read once when a device is created or
//! reinitialized. The core never writes it back; storage is the caller's
//! business (JSON on disk here, flash on real hardware).

use crate::fifo::DEFAULT_FIFO_CAPACITY;
use crate::{Gf1Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default card base port
pub const DEFAULT_BASE_PORT: u16 = 0x240;

/// Output sample rate used when `fixed_sample_rate` is set
pub const FIXED_OUTPUT_RATE: u32 = 44_100;

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Card base I/O port (0x210..=0x260, step 0x10)
    pub base_port: u16,
    /// Per-unit DMA interval override in microseconds
    pub dma_interval_us: Option<u32>,
    /// Render at a fixed 44.1 kHz instead of the voice-count dependent rate
    pub fixed_sample_rate: bool,
    /// Output FIFO fill threshold in frames (power of two)
    pub buffer_depth: usize,
    /// Slow-path stall budget in microseconds
    pub max_stall_us: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            dma_interval_us: None,
            fixed_sample_rate: true,
            buffer_depth: 256,
            max_stall_us: 15,
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the record describes a card that could exist
    pub fn validate(&self) -> Result<()> {
        if !(0x210..=0x260).contains(&self.base_port) || self.base_port & 0x0F != 0 {
            return Err(Gf1Error::ConfigError(format!(
                "base port {:#x} not in 0x210..=0x260 step 0x10",
                self.base_port
            )));
        }
        if !self.buffer_depth.is_power_of_two() || self.buffer_depth > DEFAULT_FIFO_CAPACITY {
            return Err(Gf1Error::ConfigError(format!(
                "buffer depth {} must be a power of two <= {}",
                self.buffer_depth, DEFAULT_FIFO_CAPACITY
            )));
        }
        if self.dma_interval_us == Some(0) {
            return Err(Gf1Error::ConfigError("DMA interval override must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.base_port, 0x240);
        assert!(settings.fixed_sample_rate);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings = Settings::from_json(r#"{ "base_port": 544, "dma_interval_us": 3 }"#).unwrap();
        assert_eq!(settings.base_port, 0x220);
        assert_eq!(settings.dma_interval_us, Some(3));
        assert_eq!(settings.buffer_depth, 256);
    }

    #[test]
    fn test_rejects_odd_base_port() {
        let settings = Settings {
            base_port: 0x245,
            ..Settings::default()
        };
        assert!(matches!(settings.validate(), Err(Gf1Error::ConfigError(_))));

        let settings = Settings {
            base_port: 0x300,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_buffer_depth() {
        let settings = Settings {
            buffer_depth: 300,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        assert!(matches!(Settings::from_json("{ nope"), Err(Gf1Error::Json(_))));
    }

    #[test]
    fn test_json_round_trip() {
        let settings = Settings {
            base_port: 0x260,
            fixed_sample_rate: false,
            ..Settings::default()
        };
        let text = settings.to_json().unwrap();
        assert_eq!(Settings::from_json(&text).unwrap(), settings);
    }
}
