//! Modbus RTU link check against the storage system
//!
//! A single Read Holding Registers transaction over RS485 proves that the
//! serial link and the storage controller respond.

use async_trait::async_trait;
use fems_yaler::CommandRunner;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ModbusSettings;

const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;
const STTY: &str = "/bin/stty";

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Modbus connection error: {0}")]
    Io(#[from] io::Error),

    #[error("Modbus receive timeout")]
    Timeout,

    #[error("Modbus CRC mismatch (expected {expected:#06x}, got {actual:#06x})")]
    Crc { expected: u16, actual: u16 },

    #[error("Modbus response from unexpected unit {0}")]
    UnexpectedUnit(u8),

    #[error("Modbus response with unexpected function {0:#04x}")]
    UnexpectedFunction(u8),

    #[error("Modbus error: exception code {0}")]
    Exception(u8),

    #[error("Modbus undefined response: {0}")]
    Malformed(String),
}

/// CRC-16/MODBUS
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Read Holding Registers request frame
pub fn encode_read_request(unit: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(unit);
    frame.push(READ_HOLDING_REGISTERS);
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    append_crc(&mut frame);
    frame
}

/// Validate a response frame and return the register values
pub fn decode_read_response(frame: &[u8], unit: u8, count: u16) -> Result<Vec<u16>, ModbusError> {
    if frame.len() < 5 {
        return Err(ModbusError::Malformed(format!(
            "frame too short ({} bytes)",
            frame.len()
        )));
    }

    let (body, crc_bytes) = frame.split_at(frame.len() - 2);
    let actual = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let expected = crc16(body);
    if actual != expected {
        return Err(ModbusError::Crc { expected, actual });
    }

    if body[0] != unit {
        return Err(ModbusError::UnexpectedUnit(body[0]));
    }

    let function = body[1];
    if function == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        return Err(ModbusError::Exception(body[2]));
    }
    if function != READ_HOLDING_REGISTERS {
        return Err(ModbusError::UnexpectedFunction(function));
    }

    let byte_count = usize::from(body[2]);
    let data = &body[3..];
    if byte_count != data.len() || byte_count != usize::from(count) * 2 {
        return Err(ModbusError::Malformed(format!(
            "byte count {} for {} registers",
            byte_count, count
        )));
    }

    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Fill `buf` completely; a read returning no data means the line went quiet
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), ModbusError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(ModbusError::Timeout),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read one response frame; its length follows from the header
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ModbusError> {
    let mut frame = vec![0u8; 3];
    read_full(reader, &mut frame)?;

    let remaining = if frame[1] & EXCEPTION_FLAG != 0 {
        2
    } else {
        usize::from(frame[2]) + 2
    };

    let start = frame.len();
    frame.resize(start + remaining, 0);
    read_full(reader, &mut frame[start..])?;
    Ok(frame)
}

/// Send `request` and read the matching response on an open port
///
/// Timed-out attempts are repeated on the same port, up to `retries` times.
pub fn exchange<P: Read + Write>(
    port: &mut P,
    request: &[u8],
    unit: u8,
    retries: u32,
) -> Result<Vec<u16>, ModbusError> {
    let mut attempt = 0;
    loop {
        let result = port
            .write_all(request)
            .and_then(|_| port.flush())
            .map_err(ModbusError::from)
            .and_then(|_| read_frame(port))
            .and_then(|frame| decode_read_response(&frame, unit, 1));

        match result {
            Ok(registers) => return Ok(registers),
            Err(e) if attempt < retries => {
                tracing::debug!("Modbus attempt {} failed: {}", attempt + 1, e);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `stty time` value for a receive timeout, in tenths of a second
fn receive_deciseconds(timeout: Duration) -> u128 {
    (timeout.as_millis() / 100).clamp(1, 255)
}

/// Anything that can run the link check
#[async_trait]
pub trait ModbusProbe: Send + Sync {
    /// Read the configured register(s) from the storage system
    async fn read_registers(&self) -> Result<Vec<u16>, ModbusError>;
}

/// [`ModbusProbe`] over a serial tty in RTU framing
pub struct SerialRtuProbe {
    settings: ModbusSettings,
    runner: Arc<dyn CommandRunner>,
}

impl SerialRtuProbe {
    pub fn new(settings: ModbusSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self { settings, runner }
    }

    /// Raw 8N1 at the configured baud rate, no echo
    ///
    /// `min 0` with `time` makes a read return empty once the line has been
    /// quiet for the receive timeout.
    async fn configure_port(&self) -> Result<(), ModbusError> {
        let runner = self.runner.clone();
        let device = self.settings.device.to_string_lossy().into_owned();
        let baud = self.settings.baud_rate.to_string();
        let time = receive_deciseconds(self.settings.receive_timeout).to_string();

        let output = tokio::task::spawn_blocking(move || {
            runner.run(
                Path::new(STTY),
                &[
                    "-F",
                    device.as_str(),
                    baud.as_str(),
                    "cs8",
                    "-cstopb",
                    "-parenb",
                    "raw",
                    "-echo",
                    "min",
                    "0",
                    "time",
                    time.as_str(),
                ],
            )
        })
        .await
        .map_err(io::Error::other)??;

        if output.success() {
            Ok(())
        } else {
            Err(ModbusError::Io(io::Error::other(format!(
                "stty failed: {}",
                output.stderr
            ))))
        }
    }
}

#[async_trait]
impl ModbusProbe for SerialRtuProbe {
    async fn read_registers(&self) -> Result<Vec<u16>, ModbusError> {
        self.configure_port().await?;

        let settings = self.settings.clone();
        let request = encode_read_request(settings.unit_id, settings.register, 1);

        tokio::task::spawn_blocking(move || -> Result<Vec<u16>, ModbusError> {
            let mut port = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&settings.device)?;
            exchange(&mut port, &request, settings.unit_id, settings.retries)
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn response(unit: u8, values: &[u16]) -> Vec<u8> {
        let mut frame = vec![unit, READ_HOLDING_REGISTERS, (values.len() * 2) as u8];
        for value in values {
            frame.extend_from_slice(&value.to_be_bytes());
        }
        append_crc(&mut frame);
        frame
    }

    #[test]
    fn test_crc16_known_value() {
        // Read 1 register at 0x0000 from unit 1
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
    }

    #[test]
    fn test_encode_soc_request() {
        let frame = encode_read_request(4, 10143, 1);
        assert_eq!(&frame[..6], &[0x04, 0x03, 0x27, 0x9F, 0x00, 0x01]);
        assert_eq!(frame.len(), 8);
        assert_eq!(crc16(&frame), 0, "CRC over a full frame is zero");
    }

    #[test]
    fn test_decode_response() {
        let frame = response(4, &[87]);
        assert_eq!(decode_read_response(&frame, 4, 1).unwrap(), vec![87]);
    }

    #[test]
    fn test_decode_exception() {
        let mut frame = vec![4, 0x83, 0x02];
        append_crc(&mut frame);
        assert!(matches!(
            decode_read_response(&frame, 4, 1),
            Err(ModbusError::Exception(2))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        let mut corrupted = response(4, &[87]);
        corrupted[3] ^= 0xFF;
        assert!(matches!(
            decode_read_response(&corrupted, 4, 1),
            Err(ModbusError::Crc { .. })
        ));

        assert!(matches!(
            decode_read_response(&response(5, &[87]), 4, 1),
            Err(ModbusError::UnexpectedUnit(5))
        ));

        assert!(matches!(
            decode_read_response(&response(4, &[1, 2]), 4, 1),
            Err(ModbusError::Malformed(_))
        ));

        assert!(matches!(
            decode_read_response(&[4, 3], 4, 1),
            Err(ModbusError::Malformed(_))
        ));
    }

    /// Serial port answering each request with the next scripted reply;
    /// `None` stays silent
    struct ScriptedPort {
        replies: VecDeque<Option<Vec<u8>>>,
        pending: VecDeque<u8>,
        requests: Vec<Vec<u8>>,
    }

    impl ScriptedPort {
        fn new(replies: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                replies: replies.into(),
                pending: VecDeque::new(),
                requests: Vec::new(),
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.requests.push(buf.to_vec());
            if let Some(Some(reply)) = self.replies.pop_front() {
                self.pending.extend(reply);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.pending.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    #[test]
    fn test_read_frame_lengths() {
        let data = response(4, &[87]);
        let mut trailing = data.clone();
        trailing.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader = trailing.as_slice();
        assert_eq!(read_frame(&mut reader).unwrap(), data);

        let mut exception = vec![4, 0x83, 0x02];
        append_crc(&mut exception);
        let mut reader = exception.as_slice();
        assert_eq!(read_frame(&mut reader).unwrap(), exception);
    }

    #[test]
    fn test_read_frame_truncated_is_timeout() {
        let data = response(4, &[87]);
        let mut reader = &data[..4];
        assert!(matches!(
            read_frame(&mut reader),
            Err(ModbusError::Timeout)
        ));
    }

    #[test]
    fn test_retry_after_silent_attempt() {
        let request = encode_read_request(4, 10143, 1);
        let mut port = ScriptedPort::new(vec![None, Some(response(4, &[87]))]);

        assert_eq!(exchange(&mut port, &request, 4, 1).unwrap(), vec![87]);
        assert_eq!(port.requests, vec![request.clone(), request]);
    }

    #[test]
    fn test_retries_exhausted() {
        let request = encode_read_request(4, 10143, 1);
        let mut port = ScriptedPort::new(vec![None, None, Some(response(4, &[87]))]);

        assert!(matches!(
            exchange(&mut port, &request, 4, 1),
            Err(ModbusError::Timeout)
        ));
        assert_eq!(port.requests.len(), 2);
    }

    #[test]
    fn test_receive_deciseconds() {
        assert_eq!(receive_deciseconds(Duration::from_millis(500)), 5);
        assert_eq!(receive_deciseconds(Duration::from_millis(20)), 1);
        assert_eq!(receive_deciseconds(Duration::from_secs(60)), 255);
    }
}
