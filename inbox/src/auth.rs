use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use metrics::counter;
use sha2::{Digest, Sha256};

use crate::api::ApiError;
use crate::limiter::Decision;
use crate::router;
use crate::token::validate_token;

/// An active API key. Inactive or revoked keys simply do not exist as far
/// as the registry is concerned; the check is binary.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub key_id: String,
    pub token_hash: String,
    /// Requests per minute granted to this key.
    pub rate_limit: u32,
}

/// Lookup of a presented bearer token against the set of active keys.
#[async_trait]
pub trait KeyRegistry {
    async fn find(&self, token: &str) -> Option<ApiKey>;
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Registry holding key digests in memory, seeded at startup.
pub struct MemoryKeyRegistry {
    by_hash: HashMap<String, ApiKey>,
}

impl MemoryKeyRegistry {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        let by_hash = keys
            .into_iter()
            .map(|key| (key.token_hash.clone(), key))
            .collect();
        MemoryKeyRegistry { by_hash }
    }

    /// Parse the comma-delimited seed string from config:
    /// `key_id:sha256(token)[:requests_per_minute]`.
    pub fn from_config(seed: Option<String>, default_rate_limit: u32) -> anyhow::Result<Self> {
        let mut keys = Vec::new();

        if let Some(values) = seed {
            for entry in values.split(',').filter(|entry| !entry.is_empty()) {
                let mut parts = entry.splitn(3, ':');
                let key_id = parts
                    .next()
                    .filter(|id| !id.is_empty())
                    .with_context(|| format!("api key entry {entry:?} has no key id"))?;
                let token_hash = parts
                    .next()
                    .filter(|hash| hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()))
                    .with_context(|| {
                        format!("api key entry {entry:?} has no sha256 token digest")
                    })?;
                let rate_limit = match parts.next() {
                    Some(value) => value
                        .parse()
                        .with_context(|| format!("api key entry {entry:?} has a bad rate limit"))?,
                    None => default_rate_limit,
                };

                keys.push(ApiKey {
                    key_id: key_id.to_owned(),
                    token_hash: token_hash.to_owned(),
                    rate_limit,
                });
            }
        }

        Ok(Self::new(keys))
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[async_trait]
impl KeyRegistry for MemoryKeyRegistry {
    async fn find(&self, token: &str) -> Option<ApiKey> {
        self.by_hash.get(&hash_token(token)).cloned()
    }
}

/// Middleware wrapping every authenticated route: extract the bearer token,
/// resolve it to an active key, then consult the rate limiter with the
/// key's own limit. The authenticated key is stored in request extensions
/// for handlers.
pub async fn authenticate(
    State(state): State<router::State>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::MissingToken)?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or(ApiError::MalformedAuthHeader)?;

    validate_token(token)?;

    let key = state
        .keys
        .find(token)
        .await
        .ok_or(ApiError::UnknownToken)?;

    match state.limiter.check(&key.key_id, key.rate_limit, None) {
        Decision::Allow => {}
        Decision::Reject { retry_after } => {
            counter!("inbox_requests_rate_limited_total").increment(1);
            tracing::debug!(key_id = %key.key_id, retry_after, "rate limited");
            return Err(ApiError::RateLimited { retry_after });
        }
    }

    request.extensions_mut().insert(key);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_seeded_key_by_token() {
        let registry = MemoryKeyRegistry::new(vec![ApiKey {
            key_id: "key-1".to_string(),
            token_hash: hash_token("secret-token"),
            rate_limit: 100,
        }]);

        let found = registry.find("secret-token").await.unwrap();
        assert_eq!(found.key_id, "key-1");

        assert!(registry.find("other-token").await.is_none());
    }

    #[test]
    fn parses_config_seed_entries() {
        let digest = hash_token("secret-token");
        let seed = format!("key-1:{digest}:25,key-2:{}", hash_token("other"));

        let registry = MemoryKeyRegistry::from_config(Some(seed), 100).unwrap();

        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn config_seed_applies_default_rate_limit() {
        let seed = format!("key-1:{}", hash_token("secret-token"));

        let registry = MemoryKeyRegistry::from_config(Some(seed), 75).unwrap();

        let found = registry.find("secret-token").await.unwrap();
        assert_eq!(found.rate_limit, 75);
    }

    #[test]
    fn rejects_malformed_seed_entries() {
        assert!(MemoryKeyRegistry::from_config(Some("justakeyid".to_string()), 100).is_err());
        assert!(
            MemoryKeyRegistry::from_config(Some("key-1:nothexdigest".to_string()), 100).is_err()
        );

        let seed = format!("key-1:{}:soon", hash_token("secret-token"));
        assert!(MemoryKeyRegistry::from_config(Some(seed), 100).is_err());
    }

    #[test]
    fn empty_seed_is_an_empty_registry() {
        let registry = MemoryKeyRegistry::from_config(None, 100).unwrap();

        assert!(registry.is_empty());
    }
}
