//! Service name and file locations of the yaler tunnel

use std::path::{Path, PathBuf};

const SERVICE_NAME: &str = "fems-yalertunnel.service";
const UNIT_DIR: &str = "/lib/systemd/system";
const SYSTEMCTL: &str = "/bin/systemctl";
const YALER_EXECUTABLE: &str = "/usr/bin/fems-yalertunnel";

/// Where the tunnel service lives and which executables control it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// systemd unit name
    pub service_name: String,
    /// Path of the unit definition file
    pub unit_path: PathBuf,
    /// Service manager executable
    pub systemctl: PathBuf,
    /// Tunnel proxy executable started by the unit
    pub proxy_executable: PathBuf,
}

impl ServiceIdentity {
    /// Identity for a unit installed under `unit_dir` (used by tests and
    /// non-standard installations)
    pub fn with_unit_dir(unit_dir: impl AsRef<Path>) -> Self {
        Self {
            unit_path: unit_dir.as_ref().join(SERVICE_NAME),
            ..Self::default()
        }
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME.to_string(),
            unit_path: Path::new(UNIT_DIR).join(SERVICE_NAME),
            systemctl: PathBuf::from(SYSTEMCTL),
            proxy_executable: PathBuf::from(YALER_EXECUTABLE),
        }
    }
}
