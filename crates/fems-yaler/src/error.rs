//! Error types for tunnel service management

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single service manager operation
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Failed to acquire service control lock: {0}")]
    Lock(#[source] io::Error),

    #[error("Failed to execute systemctl {verb}: {source}")]
    Spawn {
        verb: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("systemctl {verb} exited with code {code}: {stderr}")]
    Exit {
        verb: &'static str,
        code: i32,
        stderr: String,
    },

    #[error("systemctl {verb} was terminated by a signal")]
    Terminated { verb: &'static str },
}

/// Outcome of a failed reconcile call
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid relayDomain: {0}")]
    InvalidDomain(String),

    #[error("Unable to install unit file {path:?}: {source}")]
    InstallFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to enable yaler service: {0}")]
    EnableFailed(#[source] ControlError),

    #[error("Unable to start yaler service: {0}")]
    StartFailed(#[source] ControlError),

    #[error("Tunnel reconciliation failed: {0}")]
    Unknown(String),
}
