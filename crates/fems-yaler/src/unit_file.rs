//! Rendering and installing the tunnel unit definition

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::domain::RelayDomain;
use crate::identity::ServiceIdentity;

/// Local endpoint exposed through the tunnel
pub const LOCAL_TARGET: &str = "127.0.0.1:22";

/// Yaler relay the proxy connects through
pub const RELAY_HOST: &str = "via.yaler.net:80";

/// Seconds systemd waits before restarting the proxy
pub const RESTART_SEC: u32 = 30;

/// Writes and removes the systemd unit of the tunnel service
#[derive(Debug, Clone)]
pub struct UnitDefinitionWriter {
    unit_path: PathBuf,
    proxy_executable: PathBuf,
}

impl UnitDefinitionWriter {
    pub fn new(identity: &ServiceIdentity) -> Self {
        Self {
            unit_path: identity.unit_path.clone(),
            proxy_executable: identity.proxy_executable.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.unit_path
    }

    /// Unit file content for `domain`; identical input gives identical bytes
    pub fn render(&self, domain: &RelayDomain) -> String {
        format!(
            r#"[Unit]
Description=FEMS yalertunnel on port 22

[Service]
ExecStart={proxy} proxy {local} {relay} {domain}
RestartSec={restart_sec}
Restart=always

[Install]
WantedBy=multi-user.target
"#,
            proxy = self.proxy_executable.display(),
            local = LOCAL_TARGET,
            relay = RELAY_HOST,
            domain = domain,
            restart_sec = RESTART_SEC,
        )
    }

    /// Install the unit for `domain`, replacing any existing file atomically
    pub fn write(&self, domain: &RelayDomain) -> io::Result<()> {
        let staging = self.staging_path();
        let content = self.render(domain);

        if let Err(e) = fs::write(&staging, content) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }

        fs::rename(&staging, &self.unit_path).inspect_err(|_| {
            let _ = fs::remove_file(&staging);
        })
    }

    /// Remove the unit file; a missing file is not an error
    pub fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.unit_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self) -> bool {
        self.unit_path.exists()
    }

    /// Temporary sibling of the unit file, so the final rename stays on one
    /// filesystem
    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .unit_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.unit_path.with_file_name(name)
    }
}
