// MIT License - Copyright (c) 2026 Peter Wright
// Outbound messages and event records

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{
    field, GATEWAY_TIME_FORMAT, SEVERITY_STATUS_CONNECTED, SEVERITY_STATUS_DISCONNECTED,
    STATUS_CONNECTED, STATUS_DISCONNECTED, STATUS_SERIAL_FAILURE,
};

/// Broker channel an outbound message is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishKind {
    Telemetry,
    Attribute,
}

/// An immutable message waiting for delivery to the broker.
///
/// The payload is an ordered map: key order is preserved on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    kind: PublishKind,
    payload: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(kind: PublishKind, payload: Map<String, Value>) -> Self {
        Self { kind, payload }
    }

    pub fn telemetry(payload: Map<String, Value>) -> Self {
        Self::new(PublishKind::Telemetry, payload)
    }

    pub fn attribute(payload: Map<String, Value>) -> Self {
        Self::new(PublishKind::Attribute, payload)
    }

    pub fn kind(&self) -> PublishKind {
        self.kind
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Serialize the payload for the wire.
    pub fn to_json(&self) -> String {
        Value::Object(self.payload.clone()).to_string()
    }
}

/// Record type as consumers see it in the `Tipo` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Event,
    Report,
    Status,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "Evento",
            Self::Report => "Reporte",
            Self::Status => "Estado",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "Evento" => Some(Self::Event),
            "Reporte" => Some(Self::Report),
            "Estado" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Who is reporting: the installation and panel this gateway is attached to.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub panel_id: u32,
    pub panel_model_name: String,
    pub panel_model_id: u32,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl ClientIdentity {
    /// Copy of this identity reporting a different panel model id.
    pub fn with_model_id(&self, panel_model_id: u32) -> Self {
        Self {
            panel_model_id,
            ..self.clone()
        }
    }

    fn write_header(&self, map: &mut Map<String, Value>) {
        map.insert(field::CLIENT_ID.into(), Value::from(self.client_id.clone()));
        map.insert(field::PANEL_ID.into(), Value::from(self.panel_id));
        map.insert(
            field::PANEL_MODEL.into(),
            Value::from(self.panel_model_name.clone()),
        );
        map.insert(field::PANEL_MODEL_ID.into(), Value::from(self.panel_model_id));
    }

    fn write_coordinates(&self, map: &mut Map<String, Value>) {
        if let Some(c) = self.coordinates {
            map.insert(field::LATITUDE.into(), Value::from(c.latitude));
            map.insert(field::LONGITUDE.into(), Value::from(c.longitude));
        }
    }
}

/// What a panel parser extracts from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRecord {
    pub code: String,
    pub panel_time: Option<String>,
    pub metadata: String,
}

/// A fully resolved event or report, ready to become an [`OutboundMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvent {
    pub client_id: String,
    pub panel_id: u32,
    pub panel_model: String,
    pub panel_model_id: u32,
    pub code: String,
    pub record_type: RecordType,
    /// Absent on reports, which carry no severity.
    pub severity: Option<i32>,
    pub gateway_time: String,
    pub panel_time: Option<String>,
    pub metadata: String,
    pub coordinates: Option<Coordinates>,
    pub uniq: Option<f64>,
}

impl ParsedEvent {
    /// Stamp a parser record with identity, gateway time and a fresh uniqueness token.
    pub fn from_record(
        identity: &ClientIdentity,
        record_type: RecordType,
        record: PanelRecord,
        severity: Option<i32>,
    ) -> Self {
        Self {
            client_id: identity.client_id.clone(),
            panel_id: identity.panel_id,
            panel_model: identity.panel_model_name.clone(),
            panel_model_id: identity.panel_model_id,
            code: record.code,
            record_type,
            severity,
            gateway_time: gateway_timestamp(),
            panel_time: record.panel_time,
            metadata: record.metadata,
            coordinates: identity.coordinates,
            uniq: Some(rand::random::<f64>()),
        }
    }

    pub fn to_payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(field::CLIENT_ID.into(), Value::from(self.client_id.clone()));
        map.insert(field::PANEL_ID.into(), Value::from(self.panel_id));
        map.insert(field::PANEL_MODEL.into(), Value::from(self.panel_model.clone()));
        map.insert(field::PANEL_MODEL_ID.into(), Value::from(self.panel_model_id));
        map.insert(field::MESSAGE.into(), Value::from(self.code.clone()));
        map.insert(field::TYPE.into(), Value::from(self.record_type.as_str()));
        if let Some(severity) = self.severity {
            map.insert(field::SEVERITY.into(), Value::from(severity));
        }
        map.insert(field::GATEWAY_TIME.into(), Value::from(self.gateway_time.clone()));
        if let Some(ref panel_time) = self.panel_time {
            map.insert(field::PANEL_TIME.into(), Value::from(panel_time.clone()));
        }
        map.insert(field::METADATA.into(), Value::from(self.metadata.clone()));
        if let Some(c) = self.coordinates {
            map.insert(field::LATITUDE.into(), Value::from(c.latitude));
            map.insert(field::LONGITUDE.into(), Value::from(c.longitude));
        }
        if let Some(uniq) = self.uniq {
            map.insert(field::UNIQ.into(), Value::from(uniq));
        }
        map
    }

    pub fn into_message(self) -> OutboundMessage {
        OutboundMessage::telemetry(self.to_payload())
    }

    /// Recover a record from a payload produced by [`ParsedEvent::to_payload`].
    pub fn from_payload(payload: &Map<String, Value>) -> Option<Self> {
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
        let coordinates = match (
            payload.get(field::LATITUDE).and_then(Value::as_f64),
            payload.get(field::LONGITUDE).and_then(Value::as_f64),
        ) {
            (Some(latitude), Some(longitude)) => Some(Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        };

        Some(Self {
            client_id: text(field::CLIENT_ID)?,
            panel_id: payload.get(field::PANEL_ID)?.as_u64()? as u32,
            panel_model: text(field::PANEL_MODEL)?,
            panel_model_id: payload.get(field::PANEL_MODEL_ID)?.as_u64()? as u32,
            code: text(field::MESSAGE)?,
            record_type: RecordType::from_wire(payload.get(field::TYPE)?.as_str()?)?,
            severity: payload
                .get(field::SEVERITY)
                .and_then(Value::as_i64)
                .map(|s| s as i32),
            gateway_time: text(field::GATEWAY_TIME)?,
            panel_time: text(field::PANEL_TIME),
            metadata: text(field::METADATA).unwrap_or_default(),
            coordinates,
            uniq: payload.get(field::UNIQ).and_then(Value::as_f64),
        })
    }
}

/// Current local time in the gateway timestamp format.
pub fn gateway_timestamp() -> String {
    Local::now().format(GATEWAY_TIME_FORMAT).to_string()
}

/// Retained status payload sent on every broker (re)connection.
pub fn connected_status(identity: &ClientIdentity, serial_up: bool) -> Map<String, Value> {
    let text = if serial_up {
        STATUS_CONNECTED
    } else {
        STATUS_SERIAL_FAILURE
    };
    status_payload(identity, text, SEVERITY_STATUS_CONNECTED)
}

/// Last-will payload the broker publishes if the gateway vanishes.
pub fn last_will(identity: &ClientIdentity) -> Map<String, Value> {
    status_payload(identity, STATUS_DISCONNECTED, SEVERITY_STATUS_DISCONNECTED)
}

fn status_payload(identity: &ClientIdentity, text: &str, severity: i32) -> Map<String, Value> {
    let mut map = Map::new();
    identity.write_header(&mut map);
    map.insert(field::MESSAGE.into(), Value::from(text));
    map.insert(field::TYPE.into(), Value::from(RecordType::Status.as_str()));
    map.insert(field::SEVERITY.into(), Value::from(severity));
    identity.write_coordinates(&mut map);
    map
}
