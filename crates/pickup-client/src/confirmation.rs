//! Pickup confirmation protocol
//!
//! Turns one scanned code (or a still photo of one) into a disposal item
//! status change through exactly one `POST /scan` exchange. Concurrent
//! confirmations of the same input share the exchange; the exchange runs on
//! its own task so a late success still reaches the item lifecycle after the
//! caller has gone away.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wastetrack_common::wire::{ErrorCode, ScanRequest, ScanResponse};
use wastetrack_common::{ConfirmError, DisposalItemId, DisposalStatus, LifecycleError};

use crate::api::{ApiError, PickupApi};
use crate::flight::{FlightAborted, SingleFlight};
use crate::lifecycle::DisposalLifecycle;

/// What was scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanInput {
    /// Payload decoded by the live capture driver
    Code(String),
    /// Still photo to be decoded by the backend
    Image(Vec<u8>),
}

impl ScanInput {
    /// Key for the in-flight guard
    fn flight_key(&self) -> String {
        match self {
            ScanInput::Code(code) => format!("code:{}", code.trim()),
            ScanInput::Image(bytes) => format!("image:{}", hex::encode(Sha256::digest(bytes))),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            ScanInput::Code(code) => code.trim().is_empty(),
            ScanInput::Image(bytes) => bytes.is_empty(),
        }
    }

    fn into_request(self) -> ScanRequest {
        match self {
            ScanInput::Code(code) => ScanRequest::Code {
                code: code.trim().to_string(),
            },
            ScanInput::Image(image_bytes) => ScanRequest::Image { image_bytes },
        }
    }
}

/// Successful confirmation, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub disposal_item_id: DisposalItemId,
    pub new_status: DisposalStatus,
    pub processed_at: DateTime<Utc>,
}

pub struct PickupConfirmation {
    api: Arc<dyn PickupApi>,
    lifecycle: Arc<DisposalLifecycle>,
    flight: SingleFlight<String, Confirmation, ConfirmError>,
}

impl PickupConfirmation {
    pub fn new(api: Arc<dyn PickupApi>, lifecycle: Arc<DisposalLifecycle>) -> Self {
        Self {
            api,
            lifecycle,
            flight: SingleFlight::new(),
        }
    }

    /// Confirm the pickup of the item identified by `input`
    pub async fn confirm(&self, input: ScanInput) -> Result<Confirmation, ConfirmError> {
        if input.is_empty() {
            return Err(ConfirmError::UnknownCode("empty scan input".to_string()));
        }

        let key = input.flight_key();
        let api = Arc::clone(&self.api);
        let lifecycle = Arc::clone(&self.lifecycle);
        let request = input.into_request();

        self.flight
            .run(key, move || exchange(api, lifecycle, request))
            .await
            .unwrap_or_else(|FlightAborted| {
                Err(ConfirmError::NetworkFailure(
                    "confirmation task aborted".to_string(),
                ))
            })
    }

    /// Whether a confirmation for `input` is waiting on the network
    pub async fn is_pending(&self, input: &ScanInput) -> bool {
        self.flight.is_in_flight(&input.flight_key()).await
    }
}

async fn exchange(
    api: Arc<dyn PickupApi>,
    lifecycle: Arc<DisposalLifecycle>,
    request: ScanRequest,
) -> Result<Confirmation, ConfirmError> {
    let response = api.scan(&request).await.map_err(|e| {
        let err = classify(e);
        warn!("Scan confirmation failed: {}", err);
        err
    })?;

    let confirmation = validate(response)?;
    let id = confirmation.disposal_item_id;

    match lifecycle.confirm_picked_up(id).await {
        Ok(()) => {}
        Err(LifecycleError::StateConflict {
            actual: DisposalStatus::PickedUp,
            ..
        }) => {
            // The server accepted it, but this device already counted it
            return Err(ConfirmError::AlreadyProcessed {
                disposal_item_id: Some(id),
            });
        }
        Err(LifecycleError::UnknownItem(_)) => {
            debug!("Disposal item {} is not tracked on this device", id);
        }
        Err(LifecycleError::StateConflict {
            actual: DisposalStatus::Stored,
            ..
        }) => {
            // The pickup was requested elsewhere; the server is authoritative
            lifecycle.catch_up(id, DisposalStatus::PickedUp).await?;
        }
        Err(err) => return Err(err.into()),
    }

    info!(
        "Confirmed pickup of disposal item {} at {}",
        id, confirmation.processed_at
    );
    Ok(confirmation)
}

fn validate(response: ScanResponse) -> Result<Confirmation, ConfirmError> {
    if response.disposal_item_id == 0 {
        return Err(ConfirmError::ProtocolError(
            "disposal item id must be positive".to_string(),
        ));
    }

    let status: DisposalStatus = response.status.parse().map_err(|_| {
        ConfirmError::ProtocolError(format!("unrecognized status token {:?}", response.status))
    })?;

    if status != DisposalStatus::PickedUp {
        return Err(ConfirmError::ProtocolError(format!(
            "expected {}, got {}",
            DisposalStatus::PickedUp,
            status
        )));
    }

    Ok(Confirmation {
        disposal_item_id: response.disposal_item_id,
        new_status: status,
        processed_at: response.processed_at,
    })
}

/// Map a transport failure onto the confirmation taxonomy
pub(crate) fn classify(err: ApiError) -> ConfirmError {
    if err.is_transient() {
        return ConfirmError::NetworkFailure(err.to_string());
    }

    let message = match &err {
        ApiError::Rejected { message, .. } => message.clone(),
        other => other.to_string(),
    };

    match (err.code(), err.status()) {
        (Some(ErrorCode::AlreadyProcessed), _) => {
            ConfirmError::AlreadyProcessed { disposal_item_id: None }
        }
        (Some(ErrorCode::UnknownCode | ErrorCode::NotFound | ErrorCode::BadRequest), _) => {
            ConfirmError::UnknownCode(message)
        }
        (Some(ErrorCode::StateConflict), _) => ConfirmError::StateConflict(message),
        (None, Some(409)) => ConfirmError::AlreadyProcessed { disposal_item_id: None },
        (None, Some(400 | 404 | 422)) => ConfirmError::UnknownCode(message),
        _ => ConfirmError::ProtocolError(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PickupApi as _;
    use crate::mock_api::MockPickupApi;
    use rust_decimal::Decimal;
    use std::time::Duration;
    use wastetrack_common::wire::{CreatePickupRequest, GenerateQrRequest};
    use wastetrack_common::{DisposalItem, WeightUnit};

    struct Fixture {
        api: Arc<MockPickupApi>,
        lifecycle: Arc<DisposalLifecycle>,
        confirmation: PickupConfirmation,
        code: String,
    }

    /// Item 101 registered, requested, with a minted code
    async fn fixture(latency: Option<Duration>) -> Fixture {
        let mut api = MockPickupApi::new();
        if let Some(latency) = latency {
            api = api.with_latency(latency);
        }
        let api = Arc::new(api);

        let item = DisposalItem::new(101, 1, "Chloroform", Decimal::new(2, 0), WeightUnit::Liter);
        api.register_item(item.clone()).await;

        let code = api
            .generate_qr(&GenerateQrRequest::new(101, &item.qr_metadata()))
            .await
            .unwrap()
            .payload;
        api.create_pickup(&CreatePickupRequest {
            lab_id: 1,
            request_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            disposal_item_ids: vec![101],
        })
        .await
        .unwrap();

        let lifecycle = Arc::new(DisposalLifecycle::new());
        let mut local = item;
        local.status = DisposalStatus::Requested;
        lifecycle.track(local).await.unwrap();

        let confirmation = PickupConfirmation::new(api.clone(), lifecycle.clone());
        Fixture {
            api,
            lifecycle,
            confirmation,
            code,
        }
    }

    #[tokio::test]
    async fn test_confirm_then_already_processed() {
        let f = fixture(None).await;

        let confirmed = f
            .confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap();
        assert_eq!(confirmed.disposal_item_id, 101);
        assert_eq!(confirmed.new_status, DisposalStatus::PickedUp);
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::PickedUp));

        let again = f
            .confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(again, ConfirmError::AlreadyProcessed { .. }));
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::PickedUp));
        assert_eq!(f.api.scan_calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_code_is_terminal() {
        let f = fixture(None).await;

        let err = f
            .confirmation
            .confirm(ScanInput::Code("WT1:555:nothing".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, ConfirmError::UnknownCode(_)));
        assert!(!err.is_retryable());
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::Requested));
    }

    #[tokio::test]
    async fn test_network_failure_is_retryable_and_changes_nothing() {
        let f = fixture(None).await;
        f.api
            .script_scan(Err(ApiError::Transport("timed out".into())))
            .await;

        let err = f
            .confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::NetworkFailure(_)));
        assert!(err.is_retryable());
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::Requested));

        // rescanning the same code succeeds
        f.confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap();
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::PickedUp));
    }

    #[tokio::test]
    async fn test_unrecognized_status_token_is_protocol_error() {
        let f = fixture(None).await;
        f.api
            .script_scan(Ok(ScanResponse {
                disposal_item_id: 101,
                status: "COLLECTED".into(),
                processed_at: Utc::now(),
            }))
            .await;

        let err = f
            .confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::ProtocolError(_)));
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::Requested));
    }

    #[tokio::test]
    async fn test_wrong_status_is_protocol_error() {
        let f = fixture(None).await;
        f.api
            .script_scan(Ok(ScanResponse {
                disposal_item_id: 101,
                status: "REQUESTED".into(),
                processed_at: Utc::now(),
            }))
            .await;

        let err = f
            .confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::ProtocolError(_)));
    }

    #[tokio::test]
    async fn test_concurrent_same_code_single_exchange() {
        let f = fixture(Some(Duration::from_millis(50))).await;
        let confirmation = Arc::new(f.confirmation);

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let confirmation = Arc::clone(&confirmation);
            let code = f.code.clone();
            tasks.push(tokio::spawn(async move {
                confirmation.confirm(ScanInput::Code(code)).await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().disposal_item_id, 101);
        }
        assert_eq!(f.api.scan_calls(), 1);
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::PickedUp));
    }

    #[tokio::test]
    async fn test_photo_path_uses_same_exchange() {
        let f = fixture(None).await;

        let confirmed = f
            .confirmation
            .confirm(ScanInput::Image(f.code.clone().into_bytes()))
            .await
            .unwrap();
        assert_eq!(confirmed.disposal_item_id, 101);

        let again = f
            .confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(again, ConfirmError::AlreadyProcessed { .. }));
    }

    #[tokio::test]
    async fn test_code_and_photo_of_one_item_confirm_once() {
        let f = fixture(Some(Duration::from_millis(30))).await;

        let (code, photo) = tokio::join!(
            f.confirmation.confirm(ScanInput::Code(f.code.clone())),
            f.confirmation.confirm(ScanInput::Image(f.code.clone().into_bytes())),
        );

        // different inputs are separate exchanges; the backend admits one
        assert_eq!(f.api.scan_calls(), 2);
        assert!(code.is_ok() ^ photo.is_ok());
        let loser = code.err().or(photo.err()).unwrap();
        assert!(matches!(loser, ConfirmError::AlreadyProcessed { .. }));
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::PickedUp));
    }

    #[tokio::test]
    async fn test_late_success_applied_after_caller_dropped() {
        let f = fixture(Some(Duration::from_millis(60))).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            f.confirmation.confirm(ScanInput::Code(f.code.clone())),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::Requested));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.lifecycle.status(101).await, Some(DisposalStatus::PickedUp));
        assert!(!f.confirmation.is_pending(&ScanInput::Code(f.code.clone())).await);
    }

    #[tokio::test]
    async fn test_server_success_catches_up_stale_item() {
        let f = fixture(None).await;

        // this device never saw the pickup request
        let stale = Arc::new(DisposalLifecycle::new());
        stale
            .track(DisposalItem::new(101, 1, "Chloroform", Decimal::new(2, 0), WeightUnit::Liter))
            .await
            .unwrap();
        let confirmation = PickupConfirmation::new(f.api.clone(), stale.clone());

        let confirmed = confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap();
        assert_eq!(confirmed.disposal_item_id, 101);
        assert_eq!(stale.status(101).await, Some(DisposalStatus::PickedUp));

        let again = confirmation
            .confirm(ScanInput::Code(f.code.clone()))
            .await
            .unwrap_err();
        assert!(matches!(again, ConfirmError::AlreadyProcessed { .. }));
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_call() {
        let f = fixture(None).await;
        let err = f
            .confirmation
            .confirm(ScanInput::Code("   ".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::UnknownCode(_)));
        assert_eq!(f.api.scan_calls(), 0);
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify(ApiError::rejected(503, ErrorCode::Internal, "down")),
            ConfirmError::NetworkFailure(_)
        ));
        assert!(matches!(
            classify(ApiError::rejected(409, ErrorCode::AlreadyProcessed, "seen")),
            ConfirmError::AlreadyProcessed { .. }
        ));
        assert!(matches!(
            classify(ApiError::rejected(409, ErrorCode::StateConflict, "stored")),
            ConfirmError::StateConflict(_)
        ));
        assert!(matches!(
            classify(ApiError::Rejected {
                status: 404,
                code: None,
                message: "no".into()
            }),
            ConfirmError::UnknownCode(_)
        ));
        assert!(matches!(
            classify(ApiError::Decode("eof".into())),
            ConfirmError::ProtocolError(_)
        ));
    }
}
