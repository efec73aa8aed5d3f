//! Render service metadata.

use serde::{Deserialize, Serialize};

/// Highest coordinator protocol version this build understands.
pub const PROTOCOL_VERSION: u32 = 2;

/// Service metadata fetched from `GET /info` once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderServiceInfo {
    /// Minimum protocol version the coordinator requires
    #[serde(rename = "version", alias = "protocolVersion")]
    pub protocol_version: u32,
    /// AMQP URI of the job queue broker
    #[serde(rename = "rabbitMq", alias = "queueUri")]
    pub queue_uri: String,
}

impl RenderServiceInfo {
    /// True if the coordinator requires a newer protocol than this build supports.
    pub fn requires_update(&self) -> bool {
        self.protocol_version > PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_coordinator_names() {
        let info: RenderServiceInfo =
            serde_json::from_str(r#"{"version":2,"rabbitMq":"amqp://mq:5672/%2f"}"#).unwrap();
        assert_eq!(info.protocol_version, 2);
        assert_eq!(info.queue_uri, "amqp://mq:5672/%2f");
        assert!(!info.requires_update());
    }

    #[test]
    fn test_newer_protocol_requires_update() {
        let info: RenderServiceInfo =
            serde_json::from_str(r#"{"protocolVersion":3,"queueUri":"amqp://mq"}"#).unwrap();
        assert!(info.requires_update());
    }
}
