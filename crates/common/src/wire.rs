//! REST payload shapes shared by the client and the backend
//!
//! Status fields in responses are kept as raw tokens so the receiving side
//! validates them explicitly instead of trusting a lenient decoder.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::models::{
    DisposalItemId, LabId, PickupId, PickupStatus, QrMetadata, WeightUnit,
};

/// `POST /qr`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQrRequest {
    pub disposal_item_id: DisposalItemId,
    pub waste_type_name: String,
    pub weight: Decimal,
    pub unit: WeightUnit,
}

impl GenerateQrRequest {
    pub fn new(disposal_item_id: DisposalItemId, metadata: &QrMetadata) -> Self {
        Self {
            disposal_item_id,
            waste_type_name: metadata.waste_type_name.clone(),
            weight: metadata.weight,
            unit: metadata.unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateQrResponse {
    pub payload: String,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

/// `POST /scan`, either a live-decoded code or a still photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanRequest {
    Code {
        code: String,
    },
    Image {
        #[serde(rename = "imageBytes", with = "base64_bytes")]
        image_bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResponse {
    pub disposal_item_id: DisposalItemId,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

/// `PATCH /pickups/{id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePickupRequest {
    pub status: PickupStatus,
}

/// `POST /pickups`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePickupRequest {
    pub lab_id: LabId,
    pub request_date: NaiveDate,
    pub disposal_item_ids: Vec<DisposalItemId>,
}

/// Response of both pickup endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickupStatusResponse {
    pub id: PickupId,
    pub status: String,
}

/// `POST /items`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterItemRequest {
    pub id: DisposalItemId,
    pub lab_id: LabId,
    pub waste_type_name: String,
    pub weight: Decimal,
    pub unit: WeightUnit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_until: Option<NaiveDate>,
}

/// Machine-readable failure reason in error bodies
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    UnknownCode,
    AlreadyProcessed,
    StateConflict,
    InvalidTransition,
    Internal,
}

/// Error body: `{ "error": message, "code": TOKEN }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

/// Base64 (standard alphabet) encoding for binary JSON fields
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_request_shapes() {
        let code = serde_json::to_value(ScanRequest::Code {
            code: "WT1:101:abc".into(),
        })
        .unwrap();
        assert_eq!(code, json!({ "code": "WT1:101:abc" }));

        let image = serde_json::to_value(ScanRequest::Image {
            image_bytes: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(image, json!({ "imageBytes": "AQID" }));

        let parsed: ScanRequest = serde_json::from_value(json!({ "imageBytes": "AQID" })).unwrap();
        assert_eq!(
            parsed,
            ScanRequest::Image {
                image_bytes: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_create_pickup_shape() {
        let body = CreatePickupRequest {
            lab_id: 3,
            request_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            disposal_item_ids: vec![101, 102],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "labId": 3, "requestDate": "2024-05-02", "disposalItemIds": [101, 102] })
        );
    }

    #[test]
    fn test_error_body_tokens() {
        let body: ErrorBody =
            serde_json::from_value(json!({ "error": "seen", "code": "ALREADY_PROCESSED" }))
                .unwrap();
        assert_eq!(body.code, ErrorCode::AlreadyProcessed);
    }
}
