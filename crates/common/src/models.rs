//! Domain model: disposal items, pickup requests, QR artifacts and scans

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub type DisposalItemId = u64;
pub type PickupId = u64;
pub type LabId = u64;

/// Disposal item status
///
/// Forward-only: `Stored -> Requested -> PickedUp`. Transmitted as
/// upper-case tokens (`STORED`, `REQUESTED`, `PICKED_UP`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DisposalStatus {
    /// Registered by a lab, sitting in storage
    Stored,
    /// Included in a pickup request
    Requested,
    /// Collected; confirmed by a scan
    PickedUp,
}

impl DisposalStatus {
    /// The single status this one may advance to, if any
    pub fn successor(self) -> Option<DisposalStatus> {
        match self {
            DisposalStatus::Stored => Some(DisposalStatus::Requested),
            DisposalStatus::Requested => Some(DisposalStatus::PickedUp),
            DisposalStatus::PickedUp => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successor().is_none()
    }
}

/// Pickup request status
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PickupStatus {
    /// Created by an operator, not yet started
    Requested,
    /// Collection under way
    Processing,
    /// Collection finished
    Completed,
    /// Abandoned before completion
    Canceled,
}

impl PickupStatus {
    /// Whether `self -> target` is one of the legal pickup edges
    pub fn can_transition_to(self, target: PickupStatus) -> bool {
        matches!(
            (self, target),
            (PickupStatus::Requested, PickupStatus::Processing)
                | (PickupStatus::Processing, PickupStatus::Completed)
                | (PickupStatus::Requested, PickupStatus::Canceled)
                | (PickupStatus::Processing, PickupStatus::Canceled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PickupStatus::Completed | PickupStatus::Canceled)
    }
}

/// Measurement unit of a disposal item's weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum WeightUnit {
    #[serde(rename = "kg")]
    #[strum(serialize = "kg")]
    Kilogram,
    #[serde(rename = "L")]
    #[strum(serialize = "L")]
    Liter,
}

/// A registered unit of waste awaiting pickup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposalItem {
    pub id: DisposalItemId,
    pub lab_id: LabId,
    pub waste_type_name: String,
    pub weight: Decimal,
    pub unit: WeightUnit,
    pub status: DisposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_until: Option<NaiveDate>,
}

impl DisposalItem {
    /// Create a freshly registered (stored) item
    pub fn new(
        id: DisposalItemId,
        lab_id: LabId,
        waste_type_name: impl Into<String>,
        weight: Decimal,
        unit: WeightUnit,
    ) -> Self {
        Self {
            id,
            lab_id,
            waste_type_name: waste_type_name.into(),
            weight,
            unit,
            status: DisposalStatus::Stored,
            available_until: None,
        }
    }

    /// Metadata needed to mint this item's QR code
    pub fn qr_metadata(&self) -> QrMetadata {
        QrMetadata {
            waste_type_name: self.waste_type_name.clone(),
            weight: self.weight,
            unit: self.unit,
        }
    }
}

/// Descriptive fields sent along with a QR generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrMetadata {
    pub waste_type_name: String,
    pub weight: Decimal,
    pub unit: WeightUnit,
}

/// Generated QR identity of one disposal item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrArtifact {
    pub disposal_item_id: DisposalItemId,

    /// Opaque payload encoded in the QR code
    pub payload: String,

    /// Rendered image (PNG)
    pub image: Vec<u8>,

    pub generated_at: DateTime<Utc>,
}

/// Operator-initiated batch of disposal items scheduled for collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupRequest {
    pub id: PickupId,
    pub lab_id: LabId,
    pub request_date: NaiveDate,
    pub disposal_item_ids: Vec<DisposalItemId>,
    pub status: PickupStatus,
}

/// One decoded frame from the capture driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub payload: String,
    pub captured_at: DateTime<Utc>,
}

impl ScanEvent {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ALL_PICKUP: [PickupStatus; 4] = [
        PickupStatus::Requested,
        PickupStatus::Processing,
        PickupStatus::Completed,
        PickupStatus::Canceled,
    ];

    #[test]
    fn test_pickup_edges() {
        let legal = [
            (PickupStatus::Requested, PickupStatus::Processing),
            (PickupStatus::Processing, PickupStatus::Completed),
            (PickupStatus::Requested, PickupStatus::Canceled),
            (PickupStatus::Processing, PickupStatus::Canceled),
        ];

        for from in ALL_PICKUP {
            for to in ALL_PICKUP {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL_PICKUP.into_iter().filter(|s| s.is_terminal()) {
            assert!(ALL_PICKUP.iter().all(|to| !from.can_transition_to(*to)));
        }
        assert!(DisposalStatus::PickedUp.is_terminal());
        assert_eq!(
            DisposalStatus::Stored.successor(),
            Some(DisposalStatus::Requested)
        );
    }

    #[test]
    fn test_status_tokens() {
        assert_eq!(DisposalStatus::PickedUp.to_string(), "PICKED_UP");
        assert_eq!(PickupStatus::Canceled.as_ref(), "CANCELED");
        assert_eq!(
            DisposalStatus::from_str("REQUESTED").unwrap(),
            DisposalStatus::Requested
        );
        assert!(PickupStatus::from_str("processing").is_err());
        assert!(PickupStatus::from_str("DONE").is_err());

        let json = serde_json::to_string(&PickupStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }

    #[test]
    fn test_item_wire_shape() {
        let item = DisposalItem::new(101, 3, "Solvent", Decimal::new(125, 1), WeightUnit::Liter);
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["wasteTypeName"], "Solvent");
        assert_eq!(json["unit"], "L");
        assert_eq!(json["status"], "STORED");
        assert!(json.get("availableUntil").is_none());
    }
}
