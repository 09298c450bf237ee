//! LCD status agent
//!
//! Runs as a background task and renders whatever the init workflow offers.
//! The first row is a fixed title, the second row shows the latest status.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Characters per display row
pub const LCD_COLUMNS: usize = 16;

/// Renders two text rows
pub trait DisplaySink: Send {
    fn render(&mut self, first: &str, second: &str) -> io::Result<()>;
}

/// Character device of the 16x2 display
pub struct LcdDevice {
    path: PathBuf,
}

impl LcdDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Pad or cut `text` to exactly one display row
pub fn fit_row(text: &str) -> String {
    format!("{:<width$.width$}", text, width = LCD_COLUMNS)
}

impl DisplaySink for LcdDevice {
    fn render(&mut self, first: &str, second: &str) -> io::Result<()> {
        let mut device = OpenOptions::new().write(true).open(&self.path)?;
        write!(device, "{}\n{}\n", fit_row(first), fit_row(second))?;
        device.flush()
    }
}

/// Sink for gateways without a display
#[derive(Debug, Default)]
pub struct TracingSink;

impl DisplaySink for TracingSink {
    fn render(&mut self, first: &str, second: &str) -> io::Result<()> {
        tracing::debug!("LCD: {} | {}", first, second);
        Ok(())
    }
}

/// Check results the display (and the init workflow) keeps track of
#[derive(Debug, Default)]
pub struct DisplayStatus {
    ip: AtomicBool,
    internet: AtomicBool,
    modbus: AtomicBool,
}

impl DisplayStatus {
    pub fn set_ip(&self, ok: bool) {
        self.ip.store(ok, Ordering::SeqCst);
    }

    pub fn ip(&self) -> bool {
        self.ip.load(Ordering::SeqCst)
    }

    pub fn set_internet(&self, ok: bool) {
        self.internet.store(ok, Ordering::SeqCst);
    }

    pub fn internet(&self) -> bool {
        self.internet.load(Ordering::SeqCst)
    }

    pub fn set_modbus(&self, ok: bool) {
        self.modbus.store(ok, Ordering::SeqCst);
    }

    pub fn modbus(&self) -> bool {
        self.modbus.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
enum LcdCommand {
    FirstRow(String),
    Offer(String),
}

/// Handle to the running display task
pub struct LcdAgent {
    tx: mpsc::UnboundedSender<LcdCommand>,
    handle: JoinHandle<()>,
    status: Arc<DisplayStatus>,
}

impl LcdAgent {
    /// Spawn the display task on the current runtime
    pub fn start(sink: Box<dyn DisplaySink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(sink, rx));

        Self {
            tx,
            handle,
            status: Arc::new(DisplayStatus::default()),
        }
    }

    async fn run(mut sink: Box<dyn DisplaySink>, mut rx: mpsc::UnboundedReceiver<LcdCommand>) {
        let mut first = String::new();
        let mut second = String::new();

        while let Some(command) = rx.recv().await {
            match command {
                LcdCommand::FirstRow(text) => first = text,
                LcdCommand::Offer(text) => second = text,
            }

            if let Err(e) = sink.render(&first, &second) {
                tracing::warn!("LCD update failed: {}", e);
            }
        }

        tracing::debug!("LCD agent stopped");
    }

    pub fn set_first_row(&self, text: impl Into<String>) {
        self.send(LcdCommand::FirstRow(text.into()));
    }

    /// Show `text` as the current status line
    pub fn offer(&self, text: impl Into<String>) {
        self.send(LcdCommand::Offer(text.into()));
    }

    fn send(&self, command: LcdCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("LCD agent is not running");
        }
    }

    pub fn status(&self) -> Arc<DisplayStatus> {
        self.status.clone()
    }

    /// Render everything still queued, then end the task
    pub async fn stop(self) {
        let Self { tx, handle, .. } = self;
        drop(tx);
        if let Err(e) = handle.await {
            tracing::warn!("LCD agent terminated abnormally: {}", e);
        }
    }
}
