// MIT License - Copyright (c) 2026 Peter Wright
// Alarm / trouble relay contact monitor

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::sleep_or_cancel;
use crate::error::{BridgeError, Result};
use crate::message::OutboundMessage;
use crate::publisher::{BrokerTransport, Delivery, Publisher};

/// A digital input wired to one of the panel's relay contacts.
pub trait ContactInput: Send + Sync + 'static {
    /// `true` when the contact is in its active state.
    fn is_active(&self) -> Result<bool>;
}

/// GPIO input read through the sysfs interface
/// (`/sys/class/gpio/gpio<N>/value`).
#[derive(Debug, Clone)]
pub struct SysfsContact {
    pin: u32,
    value_path: PathBuf,
    active_high: bool,
}

impl SysfsContact {
    pub fn new(pin: u32, active_high: bool) -> Self {
        Self::with_root("/sys/class/gpio", pin, active_high)
    }

    pub fn with_root(root: impl Into<PathBuf>, pin: u32, active_high: bool) -> Self {
        let value_path = root.into().join(format!("gpio{pin}")).join("value");
        Self {
            pin,
            value_path,
            active_high,
        }
    }

    /// Export the pin if the kernel has not done so yet.
    pub fn export(&self) -> Result<()> {
        if self.value_path.exists() {
            return Ok(());
        }
        let gpio_dir = self.value_path.parent().and_then(|p| p.parent());
        if let Some(root) = gpio_dir {
            debug!("Exporting GPIO {}", self.pin);
            std::fs::write(root.join("export"), self.pin.to_string())?;
        }
        Ok(())
    }
}

impl ContactInput for SysfsContact {
    fn is_active(&self) -> Result<bool> {
        let raw = std::fs::read_to_string(&self.value_path)?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(BridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("GPIO {} reads {other:?}", self.pin),
                )));
            }
        };
        Ok(high == self.active_high)
    }
}

/// Polls the alarm and trouble contacts and publishes their state as
/// telemetry. Readings are dropped, not queued, while the broker is away.
pub struct RelayMonitor<T: BrokerTransport, C: ContactInput> {
    publisher: Arc<Publisher<T>>,
    alarm: C,
    trouble: C,
    interval: Duration,
}

impl<T: BrokerTransport, C: ContactInput> RelayMonitor<T, C> {
    pub fn new(publisher: Arc<Publisher<T>>, alarm: C, trouble: C, interval: Duration) -> Self {
        Self {
            publisher,
            alarm,
            trouble,
            interval,
        }
    }

    fn reading(&self) -> Result<Map<String, Value>> {
        let mut map = Map::new();
        map.insert("alarm_relay".into(), Value::from(self.alarm.is_active()?));
        map.insert("trouble_relay".into(), Value::from(self.trouble.is_active()?));
        Ok(map)
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        info!("Relay monitor started (every {:?})", self.interval);
        loop {
            match self.reading() {
                Ok(reading) => {
                    let msg = OutboundMessage::telemetry(reading);
                    if let Err(e) = self.publisher.publish(msg, Delivery::DropIfUnavailable).await {
                        debug!("Relay state not published: {e}");
                    }
                }
                Err(e) => warn!("Failed to read relay contacts: {e}"),
            }
            if !sleep_or_cancel(&cancel, self.interval).await {
                return Ok(());
            }
        }
    }
}
