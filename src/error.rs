// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy

/// All errors that can occur in the facp-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Serial port closed by peer")]
    SerialClosed,

    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("Broker not connected")]
    NotConnected,

    #[error("Broker connection timeout")]
    ConnectionTimeout,

    #[error("Undecodable bytes in serial stream: {details}")]
    Decode { details: String },

    #[error("Unsupported panel model: {0}")]
    UnsupportedPanelModel(u32),

    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Queue snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Attribute error: {details}")]
    Attribute { details: String },

    #[error("Worker {name} failed: {details}")]
    Worker { name: String, details: String },
}

impl BridgeError {
    /// Whether this error is transient and the operation should be retried
    /// after a backoff rather than escalated.
    ///
    /// Serial settings the driver rejects never fix themselves; a missing or
    /// busy device does.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Serial(e) => e.kind() != tokio_serial::ErrorKind::InvalidInput,
            BridgeError::Io(_)
            | BridgeError::SerialClosed
            | BridgeError::Mqtt(_)
            | BridgeError::NotConnected
            | BridgeError::ConnectionTimeout
            | BridgeError::Decode { .. } => true,
            BridgeError::UnsupportedPanelModel(_)
            | BridgeError::Config { .. }
            | BridgeError::Snapshot(_)
            | BridgeError::Attribute { .. }
            | BridgeError::Worker { .. } => false,
        }
    }

    pub(crate) fn config(details: impl Into<String>) -> Self {
        BridgeError::Config {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(BridgeError::SerialClosed.is_retryable());
        assert!(BridgeError::NotConnected.is_retryable());
        assert!(BridgeError::Decode { details: "0xff".into() }.is_retryable());
        assert!(
            BridgeError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t")).is_retryable()
        );
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(!BridgeError::UnsupportedPanelModel(42).is_retryable());
        assert!(!BridgeError::config("missing [mqtt]").is_retryable());
    }

    #[test]
    fn test_serial_errors_by_kind() {
        let missing = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "unplugged");
        assert!(BridgeError::Serial(missing).is_retryable());
        let bad_baud = tokio_serial::Error::new(tokio_serial::ErrorKind::InvalidInput, "bad baud");
        assert!(!BridgeError::Serial(bad_baud).is_retryable());
    }

    #[test]
    fn test_display() {
        let e = BridgeError::UnsupportedPanelModel(20001);
        assert_eq!(e.to_string(), "Unsupported panel model: 20001");
    }
}
