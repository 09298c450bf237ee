//! Host probes and actions used during initialization
//!
//! All of them shell out through the [`CommandRunner`] port.

use chrono::{DateTime, Datelike, Local};
use fems_yaler::CommandRunner;
use std::io;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;

const LSOF: &str = "/usr/bin/lsof";
const IP: &str = "/sbin/ip";
const DHCLIENT: &str = "/sbin/dhclient";
const NTPDATE: &str = "/usr/sbin/ntpdate";
const SYSTEMD_NOTIFY: &str = "/bin/systemd-notify";

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that has never been set reports a year outside `valid_years`
pub fn is_date_valid(now: &DateTime<Local>, valid_years: &RangeInclusive<i32>) -> bool {
    valid_years.contains(&now.year())
}

/// Date format used in transcript messages
pub fn format_date(now: &DateTime<Local>) -> String {
    now.format("%d.%m.%Y").to_string()
}

/// Extract the first IPv4 address from `ip -4 -o addr show` output
pub fn parse_ipv4(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "inet")?;
        let cidr = tokens.next()?;
        cidr.split('/').next()?.parse().ok()
    })
}

pub struct SystemProbe {
    runner: Arc<dyn CommandRunner>,
    dpkg_lock: PathBuf,
    ntp_servers: Vec<String>,
    autoupdate_script: PathBuf,
}

impl SystemProbe {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: &Settings) -> Self {
        Self {
            runner,
            dpkg_lock: settings.dpkg_lock.clone(),
            ntp_servers: settings.ntp_servers.clone(),
            autoupdate_script: settings.autoupdate_script.clone(),
        }
    }

    /// Whether a package manager session (e.g. `aptitude full-upgrade`) holds
    /// the dpkg lock
    pub fn is_dpkg_running(&self) -> bool {
        if !self.dpkg_lock.exists() {
            return false;
        }

        let lock = self.dpkg_lock.to_string_lossy().into_owned();
        match self.runner.run(Path::new(LSOF), &[lock.as_str()]) {
            Ok(output) => !output.stdout.trim().is_empty(),
            Err(e) => {
                tracing::warn!("Unable to check dpkg lock: {}", e);
                false
            }
        }
    }

    /// Current IPv4 address of `interface`, if any
    pub fn ipv4_address(&self, interface: &str) -> Option<Ipv4Addr> {
        match self
            .runner
            .run(Path::new(IP), &["-4", "-o", "addr", "show", "dev", interface])
        {
            Ok(output) if output.success() => parse_ipv4(&output.stdout),
            Ok(output) => {
                tracing::debug!("ip addr show {} failed: {}", interface, output.stderr);
                None
            }
            Err(e) => {
                tracing::warn!("Unable to query address of {}: {}", interface, e);
                None
            }
        }
    }

    pub fn request_dhcp(&self, interface: &str) -> io::Result<()> {
        self.runner.run(Path::new(DHCLIENT), &[interface]).map(drop)
    }

    /// Set the clock from the configured NTP servers
    pub fn sync_clock(&self) -> io::Result<()> {
        let mut args = vec!["-b", "-u"];
        args.extend(self.ntp_servers.iter().map(String::as_str));
        self.runner.run(Path::new(NTPDATE), &args).map(drop)
    }

    /// Tell systemd the init unit is ready
    pub fn notify_ready(&self) -> io::Result<()> {
        self.runner
            .run(Path::new(SYSTEMD_NOTIFY), &["--ready"])
            .map(drop)
    }

    pub fn run_autoupdate(&self) -> io::Result<()> {
        self.runner.run(&self.autoupdate_script, &[]).map(drop)
    }
}
