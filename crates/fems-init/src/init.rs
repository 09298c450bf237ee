//! Boot-time self-test
//!
//! Checks network, clock and the storage system link, reports the result to
//! the online monitoring and applies what it answers (remote access tunnel,
//! system update).

use fems_yaler::{
    FileLock, Reconciled, ServiceIdentity, SystemCommandRunner, TunnelError, TunnelState,
};
use std::io;
use std::net::Ipv4Addr;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ConfigError, Settings};
use crate::io::{turn_all_outputs_off, GatewayIo, SysfsIo, UserLed};
use crate::lcd::{DisplaySink, LcdAgent, LcdDevice, TracingSink};
use crate::modbus::{ModbusProbe, SerialRtuProbe};
use crate::monitor::{desired_tunnel_state, HttpMonitor, Monitor, SystemMessage};
use crate::system::{format_date, is_date_valid, Clock, SystemClock, SystemProbe};
use crate::transcript::Transcript;
use crate::tunnel::{reconcile_blocking, SystemdTunnel, TunnelManager};

/// Character device of the front panel display
const LCD_DEVICE: &str = "/dev/lcd";

/// Checks that end the self-test early
#[derive(Error, Debug)]
pub enum InitError {
    #[error("No IP address{}", detail_suffix(.0))]
    NoIp(Option<String>),

    #[error("No internet: {0}")]
    NoInternet(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

/// Everything the workflow talks to
pub struct InitDeps {
    pub settings: Settings,
    /// Problem reading the configuration, reported in the transcript
    pub config_error: Option<ConfigError>,
    pub system: Arc<SystemProbe>,
    pub clock: Arc<dyn Clock>,
    pub io: Arc<dyn GatewayIo>,
    pub display: Box<dyn DisplaySink>,
    pub modbus: Arc<dyn ModbusProbe>,
    pub monitor: Arc<dyn Monitor>,
    pub tunnel: Arc<dyn TunnelManager>,
}

impl InitDeps {
    /// Production wiring for the gateway
    pub fn system(settings: Settings, config_error: Option<ConfigError>) -> anyhow::Result<Self> {
        let runner = Arc::new(SystemCommandRunner);

        let monitor = HttpMonitor::new(
            settings.monitor_url.clone(),
            settings.connectivity_url.clone(),
            settings.connect_timeout,
        )?;

        let display: Box<dyn DisplaySink> = if std::path::Path::new(LCD_DEVICE).exists() {
            Box::new(LcdDevice::new(LCD_DEVICE))
        } else {
            Box::new(TracingSink)
        };

        Ok(Self {
            system: Arc::new(SystemProbe::new(runner.clone(), &settings)),
            clock: Arc::new(SystemClock),
            io: Arc::new(SysfsIo::default()),
            display,
            modbus: Arc::new(SerialRtuProbe::new(settings.modbus.clone(), runner.clone())),
            monitor: Arc::new(monitor),
            tunnel: Arc::new(SystemdTunnel::new(
                ServiceIdentity::default(),
                runner,
                Arc::new(FileLock::new(settings.control_lock.clone())),
            )),
            settings,
            config_error,
        })
    }
}

/// Result of one self-test run
#[derive(Debug)]
pub struct InitReport {
    /// A mandatory check failed
    pub failed: bool,
    /// Outcome of the tunnel reconciliation, if one was attempted
    pub tunnel: Option<Result<Reconciled, TunnelError>>,
    /// Whether the system update was started
    pub update_started: bool,
    /// Full transcript
    pub transcript: String,
}

impl InitReport {
    pub fn exit_code(&self) -> i32 {
        if self.failed {
            1
        } else {
            0
        }
    }
}

/// Run a blocking host call on the blocking pool
async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

pub struct InitWorkflow {
    deps: InitDeps,
    transcript: Transcript,
}

impl InitWorkflow {
    pub fn new(deps: InitDeps) -> Self {
        Self {
            deps,
            transcript: Transcript::new(),
        }
    }

    pub async fn run(self) -> InitReport {
        let Self { deps, transcript } = self;
        let InitDeps {
            settings,
            config_error,
            system,
            clock,
            io,
            display,
            modbus,
            monitor,
            tunnel,
        } = deps;
        let checks = Checks {
            settings: &settings,
            system: system.clone(),
            clock,
            io: io.clone(),
            modbus,
            monitor,
            transcript: &transcript,
        };

        transcript.info("Start FEMS Initialization");
        let lcd = LcdAgent::start(display);
        lcd.set_first_row("FEMS Selbsttest");

        let dpkg_running = {
            let system = system.clone();
            blocking(move || Ok(system.is_dpkg_running()))
                .await
                .unwrap_or(false)
        };
        if dpkg_running {
            transcript.info("DPKG is running -> no system update");
        } else {
            transcript.info("DPKG is not running -> will start system update");
        }

        if let Some(e) = &config_error {
            transcript.error(e.to_string());
        }

        transcript.info("Turn outputs off");
        turn_all_outputs_off(io.as_ref(), &transcript);

        let mut failed = false;
        if let Err(e) = checks.run(&lcd).await {
            transcript.error(e.to_string());
            lcd.offer(e.to_string());
            failed = true;
        }

        let status = lcd.status();
        lcd.stop().await;

        let tunnel_outcome = match &settings.apikey {
            None => {
                transcript.error("Apikey is not available");
                None
            }
            Some(apikey) => {
                let desired = checks.report(apikey).await;
                Some(apply_tunnel_state(tunnel, desired, &transcript).await)
            }
        };

        let update_started = status.internet() && !dpkg_running;
        if update_started {
            transcript.info("Start system update");
            let system = system.clone();
            if let Err(e) = blocking(move || system.run_autoupdate()).await {
                transcript.error(e.to_string());
            }
        } else {
            transcript.info("Do not start system update");
        }

        if failed {
            transcript.error("Finished with error");
        } else {
            transcript.info("Finished without error");
        }

        InitReport {
            failed,
            tunnel: tunnel_outcome,
            update_started,
            transcript: transcript.text(),
        }
    }
}

async fn apply_tunnel_state(
    tunnel: Arc<dyn TunnelManager>,
    desired: TunnelState,
    transcript: &Transcript,
) -> Result<Reconciled, TunnelError> {
    match desired {
        TunnelState::Enabled(_) => transcript.info("Activate Yaler tunnel"),
        TunnelState::Disabled => transcript.info("Deactivate Yaler tunnel"),
    }

    let outcome = reconcile_blocking(tunnel, desired).await;
    if let Err(e) = &outcome {
        transcript.error(e.to_string());
    }
    outcome
}

/// The individual checks, sharing the transcript
struct Checks<'a> {
    settings: &'a Settings,
    system: Arc<SystemProbe>,
    clock: Arc<dyn Clock>,
    io: Arc<dyn GatewayIo>,
    modbus: Arc<dyn ModbusProbe>,
    monitor: Arc<dyn Monitor>,
    transcript: &'a Transcript,
}

impl Checks<'_> {
    async fn run(&self, lcd: &LcdAgent) -> Result<(), InitError> {
        let status = lcd.status();

        let ip = self.check_network().await?;
        self.transcript.info(format!("IP: {}", ip));
        status.set_ip(true);
        lcd.offer("IP ok");
        self.switch_led(UserLed::Led1);

        self.check_time_and_internet().await?;
        self.transcript.info("Internet access is available");
        status.set_internet(true);
        lcd.offer("Internet ok");
        self.switch_led(UserLed::Led2);

        match self.modbus.read_registers().await {
            Ok(registers) => {
                self.transcript
                    .info(format!("Modbus result: {:?}", registers));
                self.transcript.info("Modbus is ok");
                status.set_modbus(true);
                lcd.offer("RS485 ok");
            }
            Err(e) => {
                self.transcript.error(e.to_string());
                self.transcript.error("Modbus is not ok");
                lcd.offer("RS485-Fehler");
            }
        }

        self.transcript.info("Announce systemd: ready");
        let system = self.system.clone();
        if let Err(e) = blocking(move || system.notify_ready()).await {
            self.transcript.error(e.to_string());
        }

        Ok(())
    }

    fn switch_led(&self, led: UserLed) {
        if let Err(e) = self.io.switch_user_led(led, true) {
            self.transcript.error(e.to_string());
        }
    }

    async fn ipv4_address(&self) -> Option<Ipv4Addr> {
        let system = self.system.clone();
        let interface = self.settings.interface.clone();
        blocking(move || Ok(system.ipv4_address(&interface)))
            .await
            .ok()
            .flatten()
    }

    /// IPv4 address of the configured interface, asking DHCP once if needed
    async fn check_network(&self) -> Result<Ipv4Addr, InitError> {
        if let Some(ip) = self.ipv4_address().await {
            return Ok(ip);
        }

        let system = self.system.clone();
        let interface = self.settings.interface.clone();
        blocking(move || system.request_dhcp(&interface))
            .await
            .map_err(|e| InitError::NoIp(Some(e.to_string())))?;

        self.ipv4_address().await.ok_or(InitError::NoIp(None))
    }

    async fn check_time_and_internet(&self) -> Result<(), InitError> {
        let valid_years = &self.settings.valid_years;
        let now = self.clock.now();

        if is_date_valid(&now, valid_years) {
            self.transcript
                .info(format!("Date was ok: {}", format_date(&now)));
            return self
                .monitor
                .check_connectivity()
                .await
                .map_err(|e| InitError::NoInternet(e.to_string()));
        }

        self.transcript
            .info(format!("Date was not ok: {}", format_date(&now)));

        let system = self.system.clone();
        blocking(move || system.sync_clock())
            .await
            .map_err(|e| InitError::NoInternet(e.to_string()))?;

        let now = self.clock.now();
        if !is_date_valid(&now, valid_years) {
            return Err(InitError::NoInternet(format!(
                "Date is still wrong: {}",
                format_date(&now)
            )));
        }

        self.transcript
            .info(format!("Date is now ok: {}", format_date(&now)));
        Ok(())
    }

    /// Send the transcript and return the tunnel state the monitoring asks for
    async fn report(&self, apikey: &str) -> TunnelState {
        let ip = self.ipv4_address().await;
        let message = SystemMessage::new(apikey, &self.transcript.text(), ip);

        match self.monitor.send_report(&message).await {
            Ok(response) => {
                if response.is_ok() {
                    self.transcript.info(format!(
                        "Successfully sent system-data; server answered: {}",
                        response.reason.as_deref().unwrap_or("OK")
                    ));
                } else {
                    self.transcript.error(format!(
                        "Error while sending system-data; server response: {}; will try again later",
                        response.status
                    ));
                }
                desired_tunnel_state(response.reply.as_ref())
            }
            Err(e) => {
                self.transcript.error(e.to_string());
                TunnelState::Disabled
            }
        }
    }
}
