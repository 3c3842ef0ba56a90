//! Probe configuration, loadable from TOML.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::constants::*;
use crate::protocol::{RegisterAddress, RegisterValue};

/// One user-supplied activation hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceSpec {
    #[serde(default)]
    pub label: Option<String>,
    /// Ordered `[register, value]` steps.
    pub steps: Vec<(RegisterAddress, RegisterValue)>,
}

/// Configuration for a probing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,

    /// Control read returning the status word.
    pub status_request: u8,
    pub status_length: usize,
    /// Control write forcing the active state.
    pub force_active_request: u8,
    pub force_active_value: u16,

    pub bulk_out_endpoint: u8,
    pub bulk_in_endpoint: u8,
    /// Request size for bulk IN polls.
    pub bulk_read_length: usize,

    pub control_timeout_ms: u64,
    pub bulk_write_timeout_ms: u64,
    pub bulk_read_timeout_ms: u64,

    pub reset_settle_ms: u64,
    pub active_settle_ms: u64,
    pub step_settle_ms: u64,
    pub recovery_settle_ms: u64,
    pub fuzz_interval_ms: u64,

    /// Extra base commands tried by the bulk fuzzer.
    pub commands: Vec<Vec<u8>>,
    /// Extra sequences tried by the sequence explorer.
    pub sequences: Vec<SequenceSpec>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            vendor_id: SENSOR_VENDOR_ID,
            product_id: SENSOR_PRODUCT_ID,
            interface: SENSOR_INTERFACE,
            status_request: STATUS_REQUEST,
            status_length: STATUS_LEN,
            force_active_request: FORCE_ACTIVE_REQUEST,
            force_active_value: FORCE_ACTIVE_VALUE,
            bulk_out_endpoint: BULK_OUT_ENDPOINT,
            bulk_in_endpoint: BULK_IN_ENDPOINT,
            bulk_read_length: BULK_READ_LEN,
            control_timeout_ms: CONTROL_TIMEOUT_MS,
            bulk_write_timeout_ms: BULK_WRITE_TIMEOUT_MS,
            bulk_read_timeout_ms: BULK_READ_TIMEOUT_MS,
            reset_settle_ms: RESET_SETTLE_MS,
            active_settle_ms: ACTIVE_SETTLE_MS,
            step_settle_ms: STEP_SETTLE_MS,
            recovery_settle_ms: RECOVERY_SETTLE_MS,
            fuzz_interval_ms: FUZZ_INTERVAL_MS,
            commands: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProbeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Same configuration with every delay set to zero.
    pub fn without_delays(mut self) -> Self {
        self.reset_settle_ms = 0;
        self.active_settle_ms = 0;
        self.step_settle_ms = 0;
        self.recovery_settle_ms = 0;
        self.fuzz_interval_ms = 0;
        self
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn bulk_write_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_write_timeout_ms)
    }

    pub fn bulk_read_timeout(&self) -> Duration {
        Duration::from_millis(self.bulk_read_timeout_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn active_settle(&self) -> Duration {
        Duration::from_millis(self.active_settle_ms)
    }

    pub fn step_settle(&self) -> Duration {
        Duration::from_millis(self.step_settle_ms)
    }

    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }

    pub fn fuzz_interval(&self) -> Duration {
        Duration::from_millis(self.fuzz_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_sensor() {
        let config = ProbeConfig::default();
        assert_eq!(config.vendor_id, 0x2808);
        assert_eq!(config.product_id, 0x93A9);
        assert_eq!(config.status_request, 0x02);
        assert_eq!(config.bulk_out_endpoint, 0x02);
        assert_eq!(config.bulk_in_endpoint, 0x83);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ProbeConfig = toml::from_str(
            r#"
            force_active_request = 0x57
            commands = [[0x04, 0xFB, 0x98, 0x06]]

            [[sequences]]
            label = "wake then enable"
            steps = [[0x57, 1], [0x01, 1]]
            "#,
        )
        .unwrap();

        assert_eq!(config.force_active_request, 0x57);
        assert_eq!(config.status_request, STATUS_REQUEST);
        assert_eq!(config.commands, vec![vec![0x04, 0xFB, 0x98, 0x06]]);
        assert_eq!(config.sequences.len(), 1);
        assert_eq!(config.sequences[0].steps, vec![(0x57, 1), (0x01, 1)]);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ProbeConfig {
            sequences: vec![SequenceSpec {
                label: None,
                steps: vec![(0x36, 1)],
            }],
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        let parsed: ProbeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_without_delays() {
        let config = ProbeConfig::default().without_delays();
        assert_eq!(config.reset_settle(), Duration::ZERO);
        assert_eq!(config.fuzz_interval(), Duration::ZERO);
        assert_eq!(config.control_timeout(), Duration::from_millis(100));
    }
}
