use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Why a presented cursor could not be decoded. Surfaced to callers as an
/// "invalid cursor" validation error, never as an empty result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    #[error("not valid base64")]
    InvalidEncoding,
    #[error("does not decode to a resume position")]
    InvalidContents,
}

/// Opaque resume position for inbox pagination: the ordering key and unique
/// id of the last item returned. Carries no secret, but must survive URL
/// transport byte-for-byte, hence the url-safe alphabet without padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub occurred_at: String,
    pub event_id: Uuid,
}

impl Cursor {
    pub fn new(occurred_at: String, event_id: Uuid) -> Self {
        Cursor {
            occurred_at,
            event_id,
        }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).expect("cursor serialization cannot fail");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Cursor, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::InvalidEncoding)?;
        serde_json::from_slice(&bytes).map_err(|_| CursorError::InvalidContents)
    }
}
