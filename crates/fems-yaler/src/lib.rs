//! Yaler tunnel service management for FEMS gateways
//!
//! Keeps the `fems-yalertunnel` systemd service in line with the tunnel state
//! requested by the online monitoring:
//! - `domain`: relay domain validation
//! - `identity`: service name and file locations
//! - `command`: synchronous command execution port
//! - `lock`: mutual exclusion for service manager calls
//! - `systemctl`: service control through systemd
//! - `unit_file`: rendering and installing the unit definition
//! - `reconciler`: desired/observed state reconciliation

pub mod command;
pub mod domain;
pub mod error;
pub mod identity;
pub mod lock;
pub mod reconciler;
pub mod systemctl;
pub mod unit_file;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use domain::{is_valid_relay_domain, RelayDomain};
pub use error::{ControlError, TunnelError};
pub use identity::ServiceIdentity;
pub use lock::{ControlLock, FileLock, LockGuard, ProcessLock};
pub use reconciler::{ObservedActivation, Reconciled, TunnelReconciler, TunnelState};
pub use systemctl::{ServiceController, Systemctl};
pub use unit_file::UnitDefinitionWriter;
