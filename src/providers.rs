//! SMS provider records.
//!
//! Providers are read-mostly configuration rows: the ingestor looks one up per
//! webhook delivery, and the lowest-priority active provider is "primary".
//! Credentials are held opaquely and never logged or serialized.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use uuid::Uuid;

/// An SMS provider configuration row.
#[derive(Debug, Clone)]
pub struct SmsProvider {
    pub id: Uuid,
    /// Unique lookup name, lower-case ("twilio", "nexmo", ...).
    pub name: String,
    pub is_active: bool,
    /// Lower value = preferred.
    pub priority: i64,
    /// Advisory rate limit, requests per minute.
    pub rate_limit_per_minute: i64,
    /// API credential, never exposed in logs or API responses.
    pub api_key: Option<SecretString>,
    /// Template for the provider's inbound webhook URL.
    pub webhook_url_template: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SmsProvider {
    pub fn new(name: impl Into<String>, priority: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_active: true,
            priority,
            rate_limit_per_minute: 100,
            api_key: None,
            webhook_url_template: None,
            created_at: Utc::now(),
        }
    }
}

/// API view of a provider — deliberately omits credentials.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub priority: i64,
    pub rate_limit_per_minute: i64,
    pub webhook_url: Option<String>,
}

impl From<&SmsProvider> for ProviderView {
    fn from(p: &SmsProvider) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            is_active: p.is_active,
            priority: p.priority,
            rate_limit_per_minute: p.rate_limit_per_minute,
            webhook_url: p
                .webhook_url_template
                .as_ref()
                .map(|t| t.replace("{provider}", &p.name)),
        }
    }
}

/// Pick the primary provider: lowest priority among active ones.
pub fn primary<'a>(providers: &'a [SmsProvider]) -> Option<&'a SmsProvider> {
    providers
        .iter()
        .filter(|p| p.is_active)
        .min_by_key(|p| p.priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_is_lowest_priority_active() {
        let mut a = SmsProvider::new("twilio", 1);
        let b = SmsProvider::new("nexmo", 2);
        assert_eq!(primary(&[a.clone(), b.clone()]).unwrap().name, "twilio");

        a.is_active = false;
        assert_eq!(primary(&[a, b]).unwrap().name, "nexmo");
    }

    #[test]
    fn primary_of_empty_is_none() {
        assert!(primary(&[]).is_none());
    }

    #[test]
    fn view_replaces_template_placeholder() {
        let mut p = SmsProvider::new("twilio", 1);
        p.webhook_url_template = Some("/api/webhooks/sms?provider={provider}".into());
        let view = ProviderView::from(&p);
        assert_eq!(
            view.webhook_url.as_deref(),
            Some("/api/webhooks/sms?provider=twilio")
        );
    }
}
