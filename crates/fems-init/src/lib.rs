//! FEMS gateway boot-time self-test
//!
//! Runs once per boot: checks the network, the clock and the storage system
//! link, reports the transcript to the online monitoring and applies its
//! answer to the remote access tunnel.

pub mod config;
pub mod init;
pub mod io;
pub mod lcd;
pub mod modbus;
pub mod monitor;
pub mod system;
pub mod transcript;
pub mod tunnel;

pub use config::{ConfigError, ModbusSettings, Properties, Settings, DEFAULT_CONFIG_PATH};
pub use init::{InitDeps, InitError, InitReport, InitWorkflow};
pub use io::{GatewayIo, SysfsIo, UserLed};
pub use lcd::{DisplaySink, DisplayStatus, LcdAgent, LcdDevice, TracingSink};
pub use modbus::{ModbusError, ModbusProbe, SerialRtuProbe};
pub use monitor::{HttpMonitor, Monitor, MonitorError, ReportResponse, SystemMessage};
pub use system::{Clock, SystemClock, SystemProbe};
pub use transcript::Transcript;
pub use tunnel::{reconcile_blocking, SystemdTunnel, TunnelManager};
