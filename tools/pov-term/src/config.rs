use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub command_file: CommandFileConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SerialConfig {
    /// Prompted for when absent.
    pub device: Option<String>,
    #[serde(default = "SerialConfig::default_baud")]
    pub baud: u32,
    #[serde(default = "SerialConfig::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MotorConfig {
    #[serde(default = "MotorConfig::default_host")]
    pub host: String,
    #[serde(default = "MotorConfig::default_port")]
    pub port: u16,
    #[serde(default = "MotorConfig::default_start_duty_cycle")]
    pub start_duty_cycle: f64,
    #[serde(default = "MotorConfig::default_wanted_frequency_hz")]
    pub wanted_frequency_hz: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CommandFileConfig {
    #[serde(default = "CommandFileConfig::default_path")]
    pub path: String,
    #[serde(default = "CommandFileConfig::default_drive_root")]
    pub drive_root: String,
}

impl SerialConfig {
    fn default_baud() -> u32 {
        9600
    }
    fn default_read_timeout_ms() -> u64 {
        100
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: None,
            baud: Self::default_baud(),
            read_timeout_ms: Self::default_read_timeout_ms(),
        }
    }
}

impl MotorConfig {
    fn default_host() -> String {
        "192.168.10.106".to_string()
    }
    fn default_port() -> u16 {
        3490
    }
    fn default_start_duty_cycle() -> f64 {
        60.0
    }
    fn default_wanted_frequency_hz() -> f64 {
        16.0
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            start_duty_cycle: Self::default_start_duty_cycle(),
            wanted_frequency_hz: Self::default_wanted_frequency_hz(),
        }
    }
}

impl CommandFileConfig {
    fn default_path() -> String {
        "povcommand.txt".to_string()
    }
    fn default_drive_root() -> String {
        "/cygdrive".to_string()
    }
}

impl Default for CommandFileConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            drive_root: Self::default_drive_root(),
        }
    }
}

impl Config {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("{} not found, using defaults", path.display());
            return Ok(Config::default());
        }
        let txt =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&txt).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let mut cfg: Config = toml::from_str(txt)?;

        let serial = &mut cfg.serial;
        if serial.device.as_deref().is_some_and(|d| d.trim().is_empty()) {
            serial.device = None;
        }
        if serial.baud == 0 {
            serial.baud = SerialConfig::default_baud();
        }
        if serial.read_timeout_ms == 0 {
            serial.read_timeout_ms = SerialConfig::default_read_timeout_ms();
        }

        let motor = &mut cfg.motor;
        if motor.host.trim().is_empty() {
            motor.host = MotorConfig::default_host();
        }
        if motor.port == 0 {
            motor.port = MotorConfig::default_port();
        }
        if !(0.0..=100.0).contains(&motor.start_duty_cycle) {
            motor.start_duty_cycle = MotorConfig::default_start_duty_cycle();
        }
        if motor.wanted_frequency_hz.is_nan() || motor.wanted_frequency_hz <= 0.0 {
            motor.wanted_frequency_hz = MotorConfig::default_wanted_frequency_hz();
        }

        let command_file = &mut cfg.command_file;
        if command_file.path.trim().is_empty() {
            command_file.path = CommandFileConfig::default_path();
        }
        if command_file.drive_root.trim().is_empty() {
            command_file.drive_root = CommandFileConfig::default_drive_root();
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.serial.device, None);
        assert_eq!(cfg.serial.baud, 9600);
        assert_eq!(cfg.serial.read_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.motor.host, "192.168.10.106");
        assert_eq!(cfg.motor.port, 3490);
        assert_eq!(cfg.motor.start_duty_cycle, 60.0);
        assert_eq!(cfg.motor.wanted_frequency_hz, 16.0);
        assert_eq!(cfg.command_file.path, "povcommand.txt");
        assert_eq!(cfg.command_file.drive_root, "/cygdrive");
    }

    #[test]
    fn values_override_defaults() {
        let cfg = Config::parse(
            r#"
            [serial]
            device = "/dev/rfcomm0"
            baud = 115200

            [motor]
            host = "127.0.0.1"
            wanted_frequency_hz = 21.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.serial.device.as_deref(), Some("/dev/rfcomm0"));
        assert_eq!(cfg.serial.baud, 115200);
        assert_eq!(cfg.motor.host, "127.0.0.1");
        assert_eq!(cfg.motor.port, 3490);
        assert_eq!(cfg.motor.wanted_frequency_hz, 21.0);
    }

    #[test]
    fn zero_and_empty_values_fall_back() {
        let cfg = Config::parse(
            r#"
            [serial]
            device = " "
            baud = 0
            read_timeout_ms = 0

            [motor]
            host = ""
            port = 0
            start_duty_cycle = 140.0
            wanted_frequency_hz = 0.0

            [command_file]
            path = ""
            "#,
        )
        .unwrap();
        assert_eq!(cfg.serial.device, None);
        assert_eq!(cfg.serial.baud, 9600);
        assert_eq!(cfg.serial.read_timeout_ms, 100);
        assert_eq!(cfg.motor.host, "192.168.10.106");
        assert_eq!(cfg.motor.port, 3490);
        assert_eq!(cfg.motor.start_duty_cycle, 60.0);
        assert_eq!(cfg.motor.wanted_frequency_hz, 16.0);
        assert_eq!(cfg.command_file.path, "povcommand.txt");
    }

    #[test]
    fn missing_file_and_bad_toml() {
        let missing = std::env::temp_dir().join("pov-term-no-such-config.toml");
        assert_eq!(Config::load(&missing).unwrap().serial.baud, 9600);
        assert!(Config::parse("[serial]\nbaud = \"fast\"").is_err());
    }
}
