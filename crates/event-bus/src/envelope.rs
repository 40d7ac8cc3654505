//! The event envelope shared by every event in the system.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event envelope: a JSON detail payload wrapped with routing metadata.
///
/// Envelopes are what the bus carries and what queue message bodies contain
/// (JSON-serialized). The `detail-type` field drives consumer routing; the
/// `detail` payload is opaque to the bus and validated by each consumer at
/// its own boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier assigned at publish time.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    /// The producing service (e.g., `storefront.inventory-service`).
    pub source: String,

    /// The event name used for routing (e.g., `order.placed`).
    #[serde(rename = "detail-type")]
    pub detail_type: String,

    /// The event payload. Consumers must validate its shape; a missing
    /// detail makes the whole message shapeless.
    pub detail: serde_json::Value,

    /// When the event was published.
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl EventEnvelope {
    /// Creates an envelope with a serialized detail payload.
    pub fn new<T: Serialize>(
        source: impl Into<String>,
        detail_type: impl Into<String>,
        detail: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            source: source.into(),
            detail_type: detail_type.into(),
            detail: serde_json::to_value(detail)?,
            time: Utc::now(),
        })
    }

    /// Decodes the detail payload into a typed value.
    pub fn detail_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.detail.clone())
    }

    /// Returns true if the detail payload is absent in all but name.
    pub fn has_detail(&self) -> bool {
        !self.detail.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        order_id: String,
        total: i64,
    }

    #[test]
    fn roundtrips_typed_detail() {
        let payload = Payload {
            order_id: "o1".to_string(),
            total: 1500,
        };
        let envelope = EventEnvelope::new("test.service", "order.placed", &payload).unwrap();

        assert_eq!(envelope.detail_type, "order.placed");
        assert!(envelope.has_detail());
        assert_eq!(envelope.detail_as::<Payload>().unwrap(), payload);
    }

    #[test]
    fn wire_format_uses_detail_type_key() {
        let envelope =
            EventEnvelope::new("test.service", "order.placed", &serde_json::json!({"a": 1}))
                .unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert!(json.get("detail-type").is_some());
        assert!(json.get("detail_type").is_none());
    }

    #[test]
    fn parses_envelope_without_id_or_time() {
        let body = r#"{"source":"s","detail-type":"order.placed","detail":{"x":1}}"#;
        let envelope: EventEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.detail_type, "order.placed");
        assert!(envelope.has_detail());
    }

    #[test]
    fn missing_detail_fails_to_parse() {
        let body = r#"{"source":"s","detail-type":"order.placed"}"#;
        assert!(serde_json::from_str::<EventEnvelope>(body).is_err());
    }

    #[test]
    fn null_detail_is_shapeless() {
        let body = r#"{"source":"s","detail-type":"order.placed","detail":null}"#;
        let envelope: EventEnvelope = serde_json::from_str(body).unwrap();
        assert!(!envelope.has_detail());
    }
}
