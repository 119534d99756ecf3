//! Provider payload adapters.
//!
//! Each adapter maps one provider's webhook field names onto the canonical
//! inbound-SMS shape. Adding a provider means adding one adapter and
//! registering it — the pipeline itself never branches on provider names.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::IngestError;

/// A parsed webhook body: flat field map, source format erased.
///
/// Form-encoded bodies arrive as string pairs; JSON bodies may carry numbers
/// or booleans, which are stringified on access.
#[derive(Debug, Clone, Default)]
pub struct RawPayload {
    fields: serde_json::Map<String, Value>,
}

impl RawPayload {
    pub fn from_json(value: Value) -> Result<Self, IngestError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(IngestError::MalformedPayload(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fetch a field as a non-empty string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let value = match self.fields.get(key)? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        if value.is_empty() { None } else { Some(value) }
    }

    /// First non-empty value among several candidate field names.
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.get_str(key))
    }
}

/// Canonical inbound SMS, before number normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSms {
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub provider_message_id: Option<String>,
}

/// Maps one provider's raw payload onto `CanonicalSms`.
pub trait PayloadAdapter: Send + Sync {
    /// Provider name this adapter handles (lower-case).
    fn provider(&self) -> &'static str;

    fn extract(&self, payload: &RawPayload) -> Result<CanonicalSms, IngestError>;
}

fn required(payload: &RawPayload, key: &str) -> Result<String, IngestError> {
    payload
        .get_str(key)
        .ok_or_else(|| IngestError::MalformedPayload(format!("missing required field: {key}")))
}

/// Twilio inbound SMS: `From` / `To` / `Body` / `MessageSid`.
pub struct TwilioAdapter;

impl PayloadAdapter for TwilioAdapter {
    fn provider(&self) -> &'static str {
        "twilio"
    }

    fn extract(&self, payload: &RawPayload) -> Result<CanonicalSms, IngestError> {
        Ok(CanonicalSms {
            sender: required(payload, "From")?,
            recipient: required(payload, "To")?,
            body: required(payload, "Body")?,
            provider_message_id: payload.get_str("MessageSid"),
        })
    }
}

/// Nexmo/Vonage inbound SMS: `msisdn` / `to` / `text` / `messageId`.
pub struct NexmoAdapter;

impl PayloadAdapter for NexmoAdapter {
    fn provider(&self) -> &'static str {
        "nexmo"
    }

    fn extract(&self, payload: &RawPayload) -> Result<CanonicalSms, IngestError> {
        Ok(CanonicalSms {
            sender: required(payload, "msisdn")?,
            recipient: required(payload, "to")?,
            body: required(payload, "text")?,
            provider_message_id: payload.get_str("messageId"),
        })
    }
}

/// Fallback for providers without a dedicated adapter: common field-name
/// aliases.
pub struct GenericAdapter;

impl PayloadAdapter for GenericAdapter {
    fn provider(&self) -> &'static str {
        "generic"
    }

    fn extract(&self, payload: &RawPayload) -> Result<CanonicalSms, IngestError> {
        let sender = payload
            .first_of(&["from", "sender"])
            .ok_or_else(|| IngestError::MalformedPayload("missing sender field".into()))?;
        let recipient = payload
            .first_of(&["to", "recipient"])
            .ok_or_else(|| IngestError::MalformedPayload("missing recipient field".into()))?;
        let body = payload
            .first_of(&["message", "text", "body"])
            .ok_or_else(|| IngestError::MalformedPayload("missing message body field".into()))?;

        Ok(CanonicalSms {
            sender,
            recipient,
            body,
            provider_message_id: payload.first_of(&["message_id", "id"]),
        })
    }
}

/// Registry of adapters keyed by provider name, with a generic fallback.
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn PayloadAdapter>>,
    fallback: Arc<dyn PayloadAdapter>,
}

impl AdapterRegistry {
    /// Registry with the built-in twilio and nexmo adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            adapters: HashMap::new(),
            fallback: Arc::new(GenericAdapter),
        };
        registry.register(Arc::new(TwilioAdapter));
        registry.register(Arc::new(NexmoAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn PayloadAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    /// Resolve an adapter for the provider, falling back to the generic
    /// field mapping for names without a dedicated one.
    pub fn resolve(&self, provider_name: &str) -> Arc<dyn PayloadAdapter> {
        self.adapters
            .get(provider_name)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twilio_maps_its_fields() {
        let payload = RawPayload::from_pairs([
            ("From", "+19998887777"),
            ("To", "+15551230001"),
            ("Body", "hello"),
            ("MessageSid", "SM123"),
        ]);
        let sms = TwilioAdapter.extract(&payload).unwrap();
        assert_eq!(sms.sender, "+19998887777");
        assert_eq!(sms.recipient, "+15551230001");
        assert_eq!(sms.body, "hello");
        assert_eq!(sms.provider_message_id.as_deref(), Some("SM123"));
    }

    #[test]
    fn twilio_missing_body_is_malformed() {
        let payload = RawPayload::from_pairs([("From", "+1"), ("To", "+2")]);
        let err = TwilioAdapter.extract(&payload).unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload(_)));
        assert!(err.to_string().contains("Body"));
    }

    #[test]
    fn nexmo_maps_its_fields() {
        let payload = RawPayload::from_pairs([
            ("msisdn", "19998887777"),
            ("to", "15551230001"),
            ("text", "hi"),
            ("messageId", "0A00"),
        ]);
        let sms = NexmoAdapter.extract(&payload).unwrap();
        assert_eq!(sms.sender, "19998887777");
        assert_eq!(sms.provider_message_id.as_deref(), Some("0A00"));
    }

    #[test]
    fn generic_accepts_aliases() {
        let payload =
            RawPayload::from_pairs([("sender", "+1"), ("recipient", "+2"), ("body", "yo")]);
        let sms = GenericAdapter.extract(&payload).unwrap();
        assert_eq!(sms.sender, "+1");
        assert_eq!(sms.recipient, "+2");
        assert_eq!(sms.body, "yo");
        assert!(sms.provider_message_id.is_none());
    }

    #[test]
    fn registry_resolves_by_name_with_fallback() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(registry.resolve("twilio").provider(), "twilio");
        assert_eq!(registry.resolve("nexmo").provider(), "nexmo");
        assert_eq!(registry.resolve("somebody-else").provider(), "generic");
    }

    #[test]
    fn json_payload_stringifies_numbers() {
        let payload = RawPayload::from_json(serde_json::json!({
            "from": "+1", "to": "+2", "text": "x", "id": 42
        }))
        .unwrap();
        let sms = GenericAdapter.extract(&payload).unwrap();
        assert_eq!(sms.provider_message_id.as_deref(), Some("42"));
    }

    #[test]
    fn non_object_json_is_malformed() {
        assert!(matches!(
            RawPayload::from_json(serde_json::json!([1, 2])),
            Err(IngestError::MalformedPayload(_))
        ));
    }
}
