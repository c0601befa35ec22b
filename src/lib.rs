// MIT License - Copyright (c) 2026 Peter Wright
// Fire alarm panel to MQTT gateway
//
//! # facp-bridge
//!
//! Store-and-forward bridge between the serial printer port of a fire alarm
//! control panel (Edwards iO1000 / EST3x, Notifier NFS, Simplex 4100) and an
//! MQTT telemetry broker (ThingsBoard device API).
//!
//! Panel output is framed and parsed per panel model, queued in a durable
//! FIFO that survives restarts, and published under a sliding-window rate
//! limit. The active panel model can be changed remotely through the
//! `id_modelo_panel` shared attribute.
//!
//! ## Quick Start
//!
//! ```no_run
//! use facp_bridge::{Config, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let gateway = Gateway::from_config(config)?;
//!     gateway
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod attributes;
pub mod backoff;
pub mod config;
pub mod constants;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod ingest;
pub mod message;
pub mod mqtt;
pub mod panels;
pub mod publisher;
pub mod queue;
pub mod rate_limit;
pub mod relay;
pub mod serial;
pub mod severity;
pub mod supervisor;

// Re-exports for convenience
pub use config::Config;
pub use error::{BridgeError, Result};
pub use gateway::Gateway;
pub use message::{ClientIdentity, OutboundMessage, ParsedEvent, PublishKind, RecordType};
pub use panels::PanelModel;
pub use publisher::{BrokerTransport, ConnectionState, Delivery, Publisher, Topics};
pub use queue::DurableQueue;
pub use serial::{PortOpener, SerialLink, SerialSettings};
pub use severity::SeverityTable;
