//! Host configuration.
//!
//! Values come from built-in defaults, then an optional JSON file, then
//! command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::serial;
use crate::error::HostError;
use crate::markers;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_LINE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Overall run timeout
    pub timeout_secs: u64,
    /// Longest a single read may block
    pub line_timeout_ms: u64,
    pub qemu: QemuConfig,
    pub serial: SerialConfig,
    pub markers: MarkerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QemuConfig {
    pub binary: String,
    pub machine: String,
    pub kernel: PathBuf,
    /// Appended after the generated arguments
    pub extra_args: Vec<String>,
    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerConfig {
    pub pass: Vec<String>,
    pub fail: Vec<String>,
    /// Regex matching a line that ends the run as passed
    pub expect: Option<String>,
    /// Recognise the kernel test runner's summary and panic banner
    pub runner_protocol: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            line_timeout_ms: DEFAULT_LINE_TIMEOUT_MS,
            qemu: QemuConfig::default(),
            serial: SerialConfig::default(),
            markers: MarkerConfig::default(),
        }
    }
}

impl Default for QemuConfig {
    fn default() -> Self {
        Self {
            binary: "qemu-system-aarch64".to_string(),
            machine: "raspi3b".to_string(),
            kernel: PathBuf::from("build/kernel8.img"),
            extra_args: Vec::new(),
            stop_grace_ms: 2000,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            pass: vec!["PASS".to_string()],
            fail: vec!["FAIL".to_string()],
            expect: None,
            runner_protocol: true,
        }
    }
}

impl HostConfig {
    pub fn from_json_str(s: &str) -> Result<Self, HostError> {
        serde_json::from_str(s)
            .map_err(|e| HostError::InvalidArgument(format!("bad config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, HostError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HostError::InvalidArgument(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), HostError> {
        if self.timeout_secs == 0 {
            return Err(HostError::InvalidArgument("timeout must be non-zero".into()));
        }
        if self.line_timeout_ms == 0 {
            return Err(HostError::InvalidArgument(
                "line timeout must be non-zero".into(),
            ));
        }
        serial::baud_rate(self.serial.baud_rate)?;
        if self.qemu.binary.is_empty() {
            return Err(HostError::InvalidArgument("emulator binary is empty".into()));
        }

        let lines = &self.markers;
        if lines
            .pass
            .iter()
            .chain(&lines.fail)
            .any(|m| markers::normalize(m).is_empty())
        {
            return Err(HostError::InvalidArgument("empty marker".into()));
        }
        if let Some(pattern) = &lines.expect {
            markers::expect_pattern(pattern)?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn line_timeout(&self) -> Duration {
        Duration::from_millis(self.line_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = HostConfig::default();
        config.validate().unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.qemu.machine, "raspi3b");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = HostConfig::from_json_str(
            r#"{ "timeout_secs": 5, "qemu": { "kernel": "out/swink.img" } }"#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.qemu.kernel, PathBuf::from("out/swink.img"));
        assert_eq!(config.qemu.binary, "qemu-system-aarch64");
        assert_eq!(config.line_timeout_ms, DEFAULT_LINE_TIMEOUT_MS);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = HostConfig::from_json_str(r#"{ "timeout": 5 }"#).unwrap_err();
        assert!(matches!(err, HostError::InvalidArgument(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "serial": {{ "baud_rate": 9600 }} }}"#).unwrap();

        let config = HostConfig::load(file.path()).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = HostConfig::load(Path::new("/nonexistent/host.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read config"));
    }

    #[test]
    fn test_validation() {
        let mut config = HostConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.serial.baud_rate = 12345;
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.markers.pass.push("  ".to_string());
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.markers.fail.push("\r".to_string());
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.markers.expect = Some("[".to_string());
        assert!(config.validate().is_err());
    }
}
