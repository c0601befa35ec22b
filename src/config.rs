// MIT License - Copyright (c) 2026 Peter Wright
// TOML configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    SEVERITY_UNRECOGNIZED, TOPIC_ATTRIBUTE_REQUEST, TOPIC_ATTRIBUTE_RESPONSE, TOPIC_ATTRIBUTES,
    TOPIC_TELEMETRY,
};
use crate::error::{BridgeError, Result};
use crate::ingest::IngestSettings;
use crate::message::{ClientIdentity, Coordinates};
use crate::mqtt::MqttSettings;
use crate::panels::PanelModel;
use crate::publisher::Topics;
use crate::rate_limit::RateQuotas;
use crate::serial::SerialOverrides;
use crate::severity::SeverityTable;
use crate::supervisor::SupervisorSettings;

/// Whole gateway configuration, one section per component.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: ClientToml,
    pub serial: SerialToml,
    pub mqtt: MqttToml,
    #[serde(default)]
    pub rate_limit: RateLimitToml,
    #[serde(default)]
    pub queue: QueueToml,
    #[serde(default)]
    pub supervisor: SupervisorToml,
    #[serde(default)]
    pub severity: SeverityToml,
    #[serde(default)]
    pub relay_monitor: Option<RelayToml>,
}

#[derive(Debug, Deserialize)]
pub struct ClientToml {
    pub client_id: String,
    pub panel_id: u32,
    /// Initial panel model; can be changed at runtime through the
    /// `id_modelo_panel` attribute.
    pub panel_model_id: u32,
    /// Display name sent with every record. Defaults to the model's name.
    #[serde(default)]
    pub panel_model_name: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SerialToml {
    pub port: String,
    #[serde(flatten)]
    pub overrides: SerialOverrides,
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_cap")]
    pub reconnect_cap_secs: u64,
}

fn default_reconnect_base() -> u64 {
    1000
}
fn default_reconnect_cap() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct MqttToml {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Device access token.
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
    /// Defaults to `<client_id>_<panel_id>_FACP`.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_mqtt_reconnect")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub topics: TopicsToml,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_keep_alive() -> u64 {
    60
}
fn default_mqtt_reconnect() -> u64 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_capacity() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct TopicsToml {
    #[serde(default = "default_telemetry_topic")]
    pub telemetry: String,
    #[serde(default = "default_attributes_topic")]
    pub attributes: String,
    #[serde(default = "default_request_prefix")]
    pub attribute_request_prefix: String,
    #[serde(default = "default_response_prefix")]
    pub attribute_response_prefix: String,
    /// Retained status / last will. Defaults to the telemetry topic.
    #[serde(default)]
    pub status: Option<String>,
}

impl Default for TopicsToml {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_topic(),
            attributes: default_attributes_topic(),
            attribute_request_prefix: default_request_prefix(),
            attribute_response_prefix: default_response_prefix(),
            status: None,
        }
    }
}

fn default_telemetry_topic() -> String {
    TOPIC_TELEMETRY.to_string()
}
fn default_attributes_topic() -> String {
    TOPIC_ATTRIBUTES.to_string()
}
fn default_request_prefix() -> String {
    TOPIC_ATTRIBUTE_REQUEST.to_string()
}
fn default_response_prefix() -> String {
    TOPIC_ATTRIBUTE_RESPONSE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct RateLimitToml {
    #[serde(default = "default_per_second")]
    pub per_second: usize,
    #[serde(default = "default_per_minute")]
    pub per_minute: usize,
    #[serde(default = "default_per_hour")]
    pub per_hour: usize,
}

impl Default for RateLimitToml {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

fn default_per_second() -> usize {
    RateQuotas::default().per_second
}
fn default_per_minute() -> usize {
    RateQuotas::default().per_minute
}
fn default_per_hour() -> usize {
    RateQuotas::default().per_hour
}

#[derive(Debug, Deserialize)]
pub struct QueueToml {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

impl Default for QueueToml {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            snapshot_interval_secs: default_snapshot_interval(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("queue.json")
}
fn default_snapshot_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
pub struct SupervisorToml {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Uptime after which a restarted worker counts as healthy again.
    #[serde(default = "default_restart_reset")]
    pub restart_reset_secs: u64,
}

impl Default for SupervisorToml {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            join_timeout_secs: default_join_timeout(),
            max_restarts: default_max_restarts(),
            restart_reset_secs: default_restart_reset(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_join_timeout() -> u64 {
    10
}
fn default_max_restarts() -> u32 {
    5
}
fn default_restart_reset() -> u64 {
    600
}

#[derive(Debug, Deserialize)]
pub struct SeverityToml {
    #[serde(default = "default_severity_path")]
    pub path: PathBuf,
    #[serde(default = "default_severity")]
    pub default: i32,
}

impl Default for SeverityToml {
    fn default() -> Self {
        Self {
            path: default_severity_path(),
            default: default_severity(),
        }
    }
}

fn default_severity_path() -> PathBuf {
    PathBuf::from("severity.toml")
}
fn default_severity() -> i32 {
    SEVERITY_UNRECOGNIZED
}

/// Alarm / trouble contact polling. Absent section means no polling.
#[derive(Debug, Deserialize)]
pub struct RelayToml {
    pub alarm_pin: u32,
    pub trouble_pin: u32,
    #[serde(default = "default_active_high")]
    pub alarm_active_high: bool,
    #[serde(default = "default_active_high")]
    pub trouble_active_high: bool,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
}

fn default_active_high() -> bool {
    true
}
fn default_publish_interval() -> u64 {
    10
}
fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

impl Config {
    /// Parse and validate a config file's contents.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)
            .map_err(|e| BridgeError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        self.panel_model()?;
        if self.client.client_id.trim().is_empty() {
            return Err(BridgeError::config("client.client_id is empty"));
        }
        if self.serial.port.trim().is_empty() {
            return Err(BridgeError::config("serial.port is empty"));
        }
        if self.mqtt.host.trim().is_empty() {
            return Err(BridgeError::config("mqtt.host is empty"));
        }
        if self.client.latitude.is_some() != self.client.longitude.is_some() {
            return Err(BridgeError::config(
                "client.latitude and client.longitude must be set together",
            ));
        }
        let r = &self.rate_limit;
        if r.per_second == 0 || r.per_minute == 0 || r.per_hour == 0 {
            return Err(BridgeError::config("rate_limit quotas must be positive"));
        }
        if let Some(relay) = &self.relay_monitor
            && relay.publish_interval_secs == 0
        {
            return Err(BridgeError::config("relay_monitor.publish_interval_secs must be positive"));
        }
        Ok(())
    }

    /// The panel model the gateway starts with.
    pub fn panel_model(&self) -> Result<PanelModel> {
        PanelModel::from_id(self.client.panel_model_id)
    }

    pub fn identity(&self) -> Result<ClientIdentity> {
        let model = self.panel_model()?;
        let coordinates = match (self.client.latitude, self.client.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Ok(ClientIdentity {
            client_id: self.client.client_id.clone(),
            panel_id: self.client.panel_id,
            panel_model_name: self
                .client
                .panel_model_name
                .clone()
                .unwrap_or_else(|| model.name().to_string()),
            panel_model_id: model.id(),
            coordinates,
        })
    }

    pub fn mqtt_client_id(&self) -> String {
        self.mqtt.client_id.clone().unwrap_or_else(|| {
            format!("{}_{}_FACP", self.client.client_id, self.client.panel_id)
        })
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt_client_id(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            tls: self.mqtt.tls,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            reconnect_interval: Duration::from_secs(self.mqtt.reconnect_interval_secs),
            capacity: self.mqtt.capacity,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt.connect_timeout_secs)
    }

    pub fn topics(&self) -> Topics {
        let t = &self.mqtt.topics;
        Topics {
            telemetry: t.telemetry.clone(),
            attributes: t.attributes.clone(),
            attribute_request_prefix: t.attribute_request_prefix.clone(),
            attribute_response_prefix: t.attribute_response_prefix.clone(),
            status: t.status.clone().unwrap_or_else(|| t.telemetry.clone()),
        }
    }

    pub fn rate_quotas(&self) -> RateQuotas {
        RateQuotas {
            per_second: self.rate_limit.per_second,
            per_minute: self.rate_limit.per_minute,
            per_hour: self.rate_limit.per_hour,
        }
    }

    pub fn ingest_settings(&self) -> IngestSettings {
        IngestSettings {
            reconnect_base: Duration::from_millis(self.serial.reconnect_base_ms),
            reconnect_cap: Duration::from_secs(self.serial.reconnect_cap_secs),
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            poll_interval: Duration::from_secs(self.supervisor.poll_interval_secs),
            join_timeout: Duration::from_secs(self.supervisor.join_timeout_secs),
            restart_reset: Duration::from_secs(self.supervisor.restart_reset_secs),
        }
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.queue.snapshot_interval_secs)
    }

    pub fn load_severity_table(&self) -> Result<SeverityTable> {
        SeverityTable::load(&self.severity.path, self.severity.default)
    }
}
