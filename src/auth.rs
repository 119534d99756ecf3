//! Authentication seam.
//!
//! Credential issuance lives outside this service; the core only needs a
//! capability that turns an opaque bearer token into a verified user
//! identity. The shipped implementation is a static token table seeded from
//! configuration — enough for dev and tests, swappable for a real verifier.

use std::collections::HashMap;

use axum::http::HeaderMap;

use crate::config::TokenSeed;
use crate::error::AuthError;

/// A verified caller.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub is_admin: bool,
}

/// Maps an opaque credential to a verified identity.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Identity>;
}

/// Static token table, seeded from `BURNER_SMS_TOKENS`.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn from_seeds(seeds: &[TokenSeed]) -> Self {
        let tokens = seeds
            .iter()
            .map(|seed| {
                (
                    seed.token.clone(),
                    Identity {
                        user_id: seed.user_id.clone(),
                        is_admin: seed.is_admin,
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    #[cfg(test)]
    pub fn single(token: &str, user_id: &str, is_admin: bool) -> Self {
        Self::from_seeds(&[TokenSeed {
            token: token.into(),
            user_id: user_id.into(),
            is_admin,
        }])
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

/// Pull the bearer token out of an `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Authenticate an HTTP request.
pub fn require_user(
    headers: &HeaderMap,
    verifier: &dyn TokenVerifier,
) -> Result<Identity, AuthError> {
    let token = bearer_token(headers).ok_or(AuthError::MissingCredentials)?;
    verifier.verify(token).ok_or(AuthError::InvalidCredentials)
}

/// Authenticate and require the admin flag.
pub fn require_admin(
    headers: &HeaderMap,
    verifier: &dyn TokenVerifier,
) -> Result<Identity, AuthError> {
    let identity = require_user(headers, verifier)?;
    if !identity.is_admin {
        return Err(AuthError::AdminRequired);
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn verifies_seeded_token() {
        let verifier = StaticTokenVerifier::single("secret", "alice", false);
        let identity = require_user(&headers_with("secret"), &verifier).unwrap();
        assert_eq!(identity.user_id, "alice");
        assert!(!identity.is_admin);
    }

    #[test]
    fn rejects_missing_and_bad_tokens() {
        let verifier = StaticTokenVerifier::single("secret", "alice", false);
        assert!(matches!(
            require_user(&HeaderMap::new(), &verifier),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            require_user(&headers_with("wrong"), &verifier),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn admin_gate() {
        let verifier = StaticTokenVerifier::single("root", "admin", true);
        assert!(require_admin(&headers_with("root"), &verifier).is_ok());

        let verifier = StaticTokenVerifier::single("secret", "alice", false);
        assert!(matches!(
            require_admin(&headers_with("secret"), &verifier),
            Err(AuthError::AdminRequired)
        ));
    }
}
