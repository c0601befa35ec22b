// MIT License - Copyright (c) 2026 Peter Wright
// Serial transport

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::debug;

use crate::error::Result;

/// Serial parity as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Line settings of the panel's printer port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub software_flow_control: bool,
    /// Upper bound on a single read; the ingestion loop re-checks
    /// cancellation and model changes at least this often.
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            software_flow_control: false,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl SerialSettings {
    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        if self.stop_bits == 2 {
            tokio_serial::StopBits::Two
        } else {
            tokio_serial::StopBits::One
        }
    }

    fn flow_control(&self) -> tokio_serial::FlowControl {
        if self.software_flow_control {
            tokio_serial::FlowControl::Software
        } else {
            tokio_serial::FlowControl::None
        }
    }
}

/// Per-field overrides from the config file, applied on top of the active
/// panel model's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SerialOverrides {
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub parity: Option<Parity>,
    pub stop_bits: Option<u8>,
    pub software_flow_control: Option<bool>,
    pub read_timeout_ms: Option<u64>,
}

impl SerialOverrides {
    pub fn apply(&self, base: SerialSettings) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate.unwrap_or(base.baud_rate),
            data_bits: self.data_bits.unwrap_or(base.data_bits),
            parity: self.parity.unwrap_or(base.parity),
            stop_bits: self.stop_bits.unwrap_or(base.stop_bits),
            software_flow_control: self
                .software_flow_control
                .unwrap_or(base.software_flow_control),
            read_timeout: self
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.read_timeout),
        }
    }
}

/// An open serial connection. Exactly one is held at a time by the
/// ingestion engine; it is dropped on any I/O error.
pub trait SerialLink: AsyncRead + Unpin + Send {
    /// Throw away bytes the driver has buffered but we have not read.
    fn discard_input(&mut self) -> std::io::Result<()>;
}

impl SerialLink for SerialStream {
    fn discard_input(&mut self) -> std::io::Result<()> {
        self.clear(tokio_serial::ClearBuffer::Input)
            .map_err(std::io::Error::from)
    }
}

/// Opens serial links. The seam between the ingestion engine and the OS.
pub trait PortOpener: Send + Sync + 'static {
    type Link: SerialLink + 'static;

    fn open(&self, settings: &SerialSettings) -> impl Future<Output = Result<Self::Link>> + Send;
}

/// Opens a real device node (e.g. `/dev/ttyUSB0`).
#[derive(Debug, Clone)]
pub struct DevicePortOpener {
    path: String,
}

impl DevicePortOpener {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PortOpener for DevicePortOpener {
    type Link = SerialStream;

    async fn open(&self, settings: &SerialSettings) -> Result<SerialStream> {
        debug!(
            "Opening {} at {} baud ({}{:?}{})",
            self.path, settings.baud_rate, settings.data_bits, settings.parity, settings.stop_bits
        );
        let stream = tokio_serial::new(&self.path, settings.baud_rate)
            .data_bits(settings.data_bits())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits())
            .flow_control(settings.flow_control())
            .timeout(settings.read_timeout)
            .open_native_async()?;
        Ok(stream)
    }
}
