use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::DisposalItemId;

const PREFIX: &str = "WT1";

/// Payload minted into a disposal item's QR code
///
/// Format: `WT1:<disposal item id>:<token>`. The random token keeps codes
/// unguessable; the id keeps them unambiguous. Clients treat the rendered
/// string as opaque, only the backend parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QrPayload {
    pub disposal_item_id: DisposalItemId,
    pub token: String,
}

/// Reasons a scanned string is not a QR payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadParseError {
    #[error("Unrecognized payload prefix")]
    Prefix,

    #[error("Invalid disposal item id in payload")]
    ItemId,

    #[error("Missing payload token")]
    Token,
}

impl QrPayload {
    /// Mint a payload with a fresh random token
    pub fn mint(disposal_item_id: DisposalItemId) -> Self {
        Self {
            disposal_item_id,
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl fmt::Display for QrPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", PREFIX, self.disposal_item_id, self.token)
    }
}

impl FromStr for QrPayload {
    type Err = PayloadParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');

        if parts.next() != Some(PREFIX) {
            return Err(PayloadParseError::Prefix);
        }

        let disposal_item_id = parts
            .next()
            .and_then(|id| id.parse::<DisposalItemId>().ok())
            .filter(|id| *id > 0)
            .ok_or(PayloadParseError::ItemId)?;

        let token = parts
            .next()
            .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or(PayloadParseError::Token)?;

        Ok(Self {
            disposal_item_id,
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_display_parses_back() {
        let payload = QrPayload::mint(101);
        let text = payload.to_string();
        assert!(text.starts_with("WT1:101:"));
        assert_eq!(text.parse::<QrPayload>().unwrap(), payload);
    }

    #[test]
    fn test_malformed_payloads() {
        assert_eq!("hello".parse::<QrPayload>(), Err(PayloadParseError::Prefix));
        assert_eq!("WT1:0:abc".parse::<QrPayload>(), Err(PayloadParseError::ItemId));
        assert_eq!("WT1:x:abc".parse::<QrPayload>(), Err(PayloadParseError::ItemId));
        assert_eq!("WT1:5:".parse::<QrPayload>(), Err(PayloadParseError::Token));
        assert_eq!("WT1:5:a-b".parse::<QrPayload>(), Err(PayloadParseError::Token));
    }
}
