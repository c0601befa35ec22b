// MIT License - Copyright (c) 2026 Peter Wright
// Wire-level constants

//! Field names, topics and sentinels shared with downstream consumers.
//!
//! The payload field names are Spanish because the dashboards that consume
//! them predate this bridge; they must not be renamed.

/// Payload field names, in the order legacy consumers expect them.
pub mod field {
    pub const CLIENT_ID: &str = "ID_Cliente";
    pub const PANEL_ID: &str = "ID_Panel";
    pub const PANEL_MODEL: &str = "Modelo_Panel";
    pub const PANEL_MODEL_ID: &str = "ID_Modelo_Panel";
    pub const MESSAGE: &str = "Mensaje";
    pub const TYPE: &str = "Tipo";
    pub const SEVERITY: &str = "Nivel_Severidad";
    pub const GATEWAY_TIME: &str = "Fecha_SBC";
    pub const PANEL_TIME: &str = "Fecha_Panel";
    pub const METADATA: &str = "Metadata";
    pub const LATITUDE: &str = "latitud";
    pub const LONGITUDE: &str = "longitud";
    pub const UNIQ: &str = "uniq";
}

/// Severity reported for an event code missing from the severity table,
/// unless the configuration overrides it.
pub const SEVERITY_UNRECOGNIZED: i32 = 999;

/// Highest severity on the 0-6 scale.
pub const SEVERITY_MAX: i32 = 6;

/// Severity of the "connected" status message.
pub const SEVERITY_STATUS_CONNECTED: i32 = 0;

/// Severity of the last-will "disconnected" status message.
pub const SEVERITY_STATUS_DISCONNECTED: i32 = 4;

/// Status message texts.
pub const STATUS_CONNECTED: &str = "Conectado";
pub const STATUS_SERIAL_FAILURE: &str = "Fallo serial";
pub const STATUS_DISCONNECTED: &str = "Desconectado";

/// Remote attribute carrying the active panel model id.
pub const PANEL_MODEL_ATTRIBUTE: &str = "id_modelo_panel";

/// Namespaces an attribute response may nest values under.
pub const ATTRIBUTE_NAMESPACES: [&str; 2] = ["shared", "client"];

/// Default broker topics (ThingsBoard device API).
pub const TOPIC_TELEMETRY: &str = "v1/devices/me/telemetry";
pub const TOPIC_ATTRIBUTES: &str = "v1/devices/me/attributes";
pub const TOPIC_ATTRIBUTE_REQUEST: &str = "v1/devices/me/attributes/request/";
pub const TOPIC_ATTRIBUTE_RESPONSE: &str = "v1/devices/me/attributes/response/";

/// Gateway timestamp format (`YYYY-MM-DD HH:MM:SS.ffffff`).
pub const GATEWAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
