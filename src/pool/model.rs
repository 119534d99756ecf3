//! Phone number domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a pooled phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberStatus {
    Available,
    Assigned,
}

impl NumberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberStatus::Available => "available",
            NumberStatus::Assigned => "assigned",
        }
    }
}

impl std::str::FromStr for NumberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(NumberStatus::Available),
            "assigned" => Ok(NumberStatus::Assigned),
            other => Err(format!("unknown number status: {other}")),
        }
    }
}

/// A disposable phone number and its embedded lease state.
///
/// The lease is the (holder, assigned_at, expires_at) triple; it shares the
/// number's lifetime, so there is no separate lease entity. Invariant:
/// status is Assigned exactly when holder and assigned_at are set, and
/// expires_at is set exactly when status is Assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: Uuid,
    /// E.164 canonical form, globally unique.
    pub phone_number: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country_code: String,
    pub provider_id: Option<Uuid>,
    /// User currently holding the lease, if any.
    pub holder: Option<String>,
    pub status: NumberStatus,
    pub assigned_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl PhoneNumber {
    /// Create a fresh, available number.
    pub fn new(phone_number: impl Into<String>, country_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone_number: phone_number.into(),
            country_code: country_code.into(),
            provider_id: None,
            holder: None,
            status: NumberStatus::Available,
            assigned_at: None,
            expires_at: None,
            created_at: Utc::now(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_provider(mut self, provider_id: Uuid) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    /// Whether the lease has passed its expiry. Always false when unassigned.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }
}

/// A number together with per-holder view data (message count, expiry flag).
#[derive(Debug, Clone, Serialize)]
pub struct LeasedNumberView {
    #[serde(flatten)]
    pub number: PhoneNumber,
    pub message_count: u64,
    pub is_expired: bool,
}

/// Pool-level counts for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_numbers: u64,
    pub active_numbers: u64,
    pub expired_numbers: u64,
    pub available_numbers: u64,
}

/// Normalize a phone number to canonical `+<digits>` form.
///
/// Strips every character that is not a digit or `+`, then prefixes `+` if
/// absent. Matches the webhook providers' loose formats ("+1 (234) 567-8901",
/// "12345678901") onto one canonical key.
pub fn normalize_number(raw: &str) -> String {
    let mut normalized: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if !normalized.starts_with('+') {
        normalized.insert(0, '+');
    }
    normalized
}

/// Strict E.164 check used for provisioning: `+`, a non-zero leading digit,
/// 2-15 digits total.
pub fn is_valid_e164(number: &str) -> bool {
    let Some(rest) = number.strip_prefix('+') else {
        return false;
    };
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if ('1'..='9').contains(&c) => {}
        _ => return false,
    }
    let digits = rest.len();
    (2..=15).contains(&digits) && rest.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_formatting() {
        assert_eq!(normalize_number("+1 (234) 567-8901"), "+12345678901");
        assert_eq!(normalize_number("12345678901"), "+12345678901");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_number("+1 (234) 567-8901");
        assert_eq!(normalize_number(&once), once);
    }

    #[test]
    fn e164_validation() {
        assert!(is_valid_e164("+15551230001"));
        assert!(is_valid_e164("+447700900123"));
        assert!(!is_valid_e164("15551230001"));
        assert!(!is_valid_e164("+0123456"));
        assert!(!is_valid_e164("+1"));
        assert!(!is_valid_e164("+1234567890123456"));
        assert!(!is_valid_e164("+1555abc0001"));
    }

    #[test]
    fn new_number_is_available() {
        let n = PhoneNumber::new("+15551230001", "US");
        assert_eq!(n.status, NumberStatus::Available);
        assert!(n.holder.is_none());
        assert!(n.assigned_at.is_none());
        assert!(n.expires_at.is_none());
        assert!(!n.is_expired());
    }

    #[test]
    fn status_round_trips() {
        for s in [NumberStatus::Available, NumberStatus::Assigned] {
            assert_eq!(s.as_str().parse::<NumberStatus>().unwrap(), s);
        }
    }
}
