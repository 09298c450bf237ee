//! Gateway configuration
//!
//! `/etc/fems` is a properties file holding at least the monitoring `apikey`.
//! Everything else has built-in defaults that a few optional keys override.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the gateway properties
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fems";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Parsed `key=value` properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: HashMap<String, String>,
}

impl Properties {
    /// Parse properties text
    ///
    /// Accepts `key=value`, `key: value` and `key value`; lines starting with
    /// `#` or `!` are comments. Later keys win.
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let split = line
                .char_indices()
                .find(|(_, c)| *c == '=' || *c == ':')
                .or_else(|| line.char_indices().find(|(_, c)| c.is_whitespace()));
            let (key, value) = match split {
                Some((idx, sep)) => (&line[..idx], &line[idx + sep.len_utf8()..]),
                None => (line, ""),
            };

            entries.insert(key.trim().to_string(), value.trim().to_string());
        }

        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Serial line and register used to check the storage system link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusSettings {
    pub device: PathBuf,
    pub baud_rate: u32,
    pub unit_id: u8,
    /// State-of-charge register of the storage system
    pub register: u16,
    pub receive_timeout: Duration,
    pub retries: u32,
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyUSB0"),
            baud_rate: 9600,
            unit_id: 4,
            register: 10143,
            receive_timeout: Duration::from_millis(500),
            retries: 1,
        }
    }
}

/// Everything the init workflow needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub apikey: Option<String>,
    pub monitor_url: String,
    pub connectivity_url: String,
    pub connect_timeout: Duration,
    pub interface: String,
    pub dpkg_lock: PathBuf,
    pub ntp_servers: Vec<String>,
    pub valid_years: RangeInclusive<i32>,
    pub autoupdate_script: PathBuf,
    pub control_lock: PathBuf,
    pub modbus: ModbusSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            apikey: None,
            monitor_url: "https://fenecon.de/femsmonitor".to_string(),
            connectivity_url: "https://fenecon.de".to_string(),
            connect_timeout: Duration::from_secs(1),
            interface: "eth0".to_string(),
            dpkg_lock: PathBuf::from("/var/lib/dpkg/lock"),
            ntp_servers: [
                "fenecon.de",
                "0.pool.ntp.org",
                "1.pool.ntp.org",
                "2.pool.ntp.org",
                "3.pool.ntp.org",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            valid_years: 2014..=2037,
            autoupdate_script: PathBuf::from("/etc/cron.daily/fems-autoupdate"),
            control_lock: PathBuf::from("/run/fems-yaler.lock"),
            modbus: ModbusSettings::default(),
        }
    }
}

impl Settings {
    /// Apply recognised keys from `properties` on top of the defaults
    ///
    /// A key with an unusable value keeps its default and is reported; the
    /// remaining keys still apply.
    pub fn from_properties(properties: &Properties) -> (Self, Option<ConfigError>) {
        let mut settings = Self {
            apikey: properties.get("apikey").map(str::to_string),
            ..Self::default()
        };
        let mut error = None;

        if let Some(url) = properties.get("monitor_url") {
            settings.monitor_url = url.to_string();
        }
        if let Some(interface) = properties.get("interface") {
            settings.interface = interface.to_string();
        }
        if let Some(device) = properties.get("modbus_device") {
            settings.modbus.device = PathBuf::from(device);
        }
        if let Some(path) = properties.get("lock_file") {
            settings.control_lock = PathBuf::from(path);
        }
        if let Some(unit) = properties.get("modbus_unit_id") {
            match unit.parse() {
                Ok(unit_id) => settings.modbus.unit_id = unit_id,
                Err(_) => {
                    error = Some(ConfigError::InvalidValue {
                        key: "modbus_unit_id".to_string(),
                        value: unit.to_string(),
                    })
                }
            }
        }

        (settings, error)
    }

    /// Read `path`; settings are returned even when the file is missing or
    /// partly invalid, along with the error so the caller can report it
    pub fn load(path: &Path) -> (Self, Option<ConfigError>) {
        match Properties::load(path) {
            Ok(properties) => Self::from_properties(&properties),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}
