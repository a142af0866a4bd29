//! API request handlers for the pickup backend

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use wastetrack_common::wire::{
    CreatePickupRequest, ErrorBody, ErrorCode, GenerateQrRequest, GenerateQrResponse,
    PickupStatusResponse, RegisterItemRequest, ScanRequest, ScanResponse, UpdatePickupRequest,
};
use wastetrack_common::{
    DisposalItem, DisposalItemId, DisposalStatus, PickupId, PickupRequest, PickupStatus, QrPayload,
};

use crate::qr::{self, QrCodecError};
use crate::storage::PickupStore;

/// Shared application state
pub struct AppState {
    pub storage: Mutex<Box<dyn PickupStore>>,
    pub qr_module_size: u32,
}

impl AppState {
    pub fn new(storage: impl PickupStore + 'static, qr_module_size: u32) -> Self {
        Self {
            storage: Mutex::new(Box::new(storage)),
            qr_module_size,
        }
    }
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::BadRequest, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, message)
    }

    fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Storage error: {:#}", err);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            err.to_string(),
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

fn validate_item_fields(
    id: DisposalItemId,
    waste_type_name: &str,
    weight: Decimal,
) -> Result<(), ApiError> {
    if id == 0 {
        return Err(ApiError::bad_request("disposal item id must be positive"));
    }
    if waste_type_name.trim().is_empty() {
        return Err(ApiError::bad_request("waste type name must not be empty"));
    }
    if weight <= Decimal::ZERO {
        return Err(ApiError::bad_request("weight must be positive"));
    }
    Ok(())
}

fn unknown_code(code: &str) -> ApiError {
    ApiError::new(
        StatusCode::NOT_FOUND,
        ErrorCode::UnknownCode,
        format!("Unknown code: {}", code),
    )
}

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let mut storage = state.storage.lock().await;

    match storage.health_check().await {
        Ok(()) => Json(serde_json::json!({
            "status": "healthy",
            "service": "pickup-backend"
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "service": "pickup-backend"
                })),
            )
                .into_response()
        }
    }
}

/// Register a disposal item (`POST /items`)
pub async fn register_item_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterItemRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DisposalItem>), ApiError> {
    let Json(request) = payload?;
    validate_item_fields(request.id, &request.waste_type_name, request.weight)?;
    if request.lab_id == 0 {
        return Err(ApiError::bad_request("lab id must be positive"));
    }

    let mut item = DisposalItem::new(
        request.id,
        request.lab_id,
        request.waste_type_name.trim(),
        request.weight,
        request.unit,
    );
    item.available_until = request.available_until;

    let mut storage = state.storage.lock().await;
    if !storage.insert_item(&item).await? {
        return Err(ApiError::conflict(
            ErrorCode::StateConflict,
            format!("Disposal item {} already registered", item.id),
        ));
    }

    Ok((StatusCode::CREATED, Json(item)))
}

/// Fetch a disposal item (`GET /items/{id}`)
pub async fn get_item_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DisposalItemId>,
) -> Result<Json<DisposalItem>, ApiError> {
    let mut storage = state.storage.lock().await;
    storage
        .get_item(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Disposal item {} not found", id)))
}

/// Generate the QR code of a disposal item (`POST /qr`)
///
/// The payload is minted once per item; later calls render the same one.
pub async fn generate_qr_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateQrRequest>, JsonRejection>,
) -> Result<Json<GenerateQrResponse>, ApiError> {
    let Json(request) = payload?;
    let id = request.disposal_item_id;
    validate_item_fields(id, &request.waste_type_name, request.weight)?;

    let payload = {
        let mut storage = state.storage.lock().await;
        if storage.get_item(id).await?.is_none() {
            return Err(ApiError::not_found(format!(
                "Disposal item {} not found",
                id
            )));
        }

        match storage.qr_payload(id).await? {
            Some(existing) => existing,
            None => {
                let minted = QrPayload::mint(id).to_string();
                let bound = storage.claim_qr_payload(id, &minted).await?;
                info!("Minted QR payload for disposal item {}", id);
                bound
            }
        }
    };

    let image = qr::render_png(&payload, state.qr_module_size).map_err(|e| {
        error!("QR rendering failed for disposal item {}: {}", id, e);
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Internal,
            e.to_string(),
        )
    })?;

    Ok(Json(GenerateQrResponse { payload, image }))
}

/// Confirm a pickup from a scanned code or a photo of one (`POST /scan`)
pub async fn scan_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanResponse>, ApiError> {
    let Json(request) = payload?;

    let code = match request {
        ScanRequest::Code { code } => code.trim().to_string(),
        ScanRequest::Image { image_bytes } => {
            qr::decode_image(&image_bytes).map_err(|e| match e {
                QrCodecError::NotFound => ApiError::bad_request("No QR code found in image"),
                other => ApiError::bad_request(other.to_string()),
            })?
        }
    };

    if code.parse::<QrPayload>().is_err() {
        return Err(unknown_code(&code));
    }

    let mut storage = state.storage.lock().await;
    let id = storage
        .resolve_code(&code)
        .await?
        .ok_or_else(|| unknown_code(&code))?;

    let mut item = storage
        .get_item(id)
        .await?
        .ok_or_else(|| unknown_code(&code))?;

    match item.status {
        DisposalStatus::Requested => {}
        DisposalStatus::PickedUp => {
            return Err(ApiError::conflict(
                ErrorCode::AlreadyProcessed,
                format!("Disposal item {} already picked up", id),
            ))
        }
        other => {
            return Err(ApiError::conflict(
                ErrorCode::StateConflict,
                format!("Disposal item {} is {}, not in a pickup request", id, other),
            ))
        }
    }

    if !storage.mark_processed(id).await? {
        warn!("Code for disposal item {} already processed", id);
        return Err(ApiError::conflict(
            ErrorCode::AlreadyProcessed,
            format!("Disposal item {} already picked up", id),
        ));
    }

    item.status = DisposalStatus::PickedUp;
    if let Err(e) = storage.save_item(&item).await {
        // a flag without the status change would turn every rescan away
        if let Err(undo) = storage.clear_processed(id).await {
            error!("Disposal item {} left flagged as processed: {:#}", id, undo);
        }
        return Err(e.into());
    }

    info!("Disposal item {} picked up", id);

    Ok(Json(ScanResponse {
        disposal_item_id: id,
        status: DisposalStatus::PickedUp.to_string(),
        processed_at: Utc::now(),
    }))
}

/// Create a pickup request (`POST /pickups`)
pub async fn create_pickup_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreatePickupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PickupStatusResponse>), ApiError> {
    let Json(request) = payload?;

    if request.lab_id == 0 {
        return Err(ApiError::bad_request("lab id must be positive"));
    }
    if request.disposal_item_ids.is_empty() {
        return Err(ApiError::bad_request(
            "a pickup needs at least one disposal item",
        ));
    }
    let mut seen = HashSet::new();
    if request
        .disposal_item_ids
        .iter()
        .any(|id| *id == 0 || !seen.insert(*id))
    {
        return Err(ApiError::bad_request(
            "disposal item ids must be positive and unique",
        ));
    }

    let mut storage = state.storage.lock().await;

    let mut items = Vec::with_capacity(request.disposal_item_ids.len());
    for id in &request.disposal_item_ids {
        let item = storage
            .get_item(*id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Disposal item {} not found", id)))?;
        if item.status != DisposalStatus::Stored {
            return Err(ApiError::conflict(
                ErrorCode::StateConflict,
                format!("Disposal item {} is {}", id, item.status),
            ));
        }
        items.push(item);
    }

    for item in &mut items {
        item.status = DisposalStatus::Requested;
    }

    let pickup = PickupRequest {
        id: storage.next_pickup_id().await?,
        lab_id: request.lab_id,
        request_date: request.request_date,
        disposal_item_ids: request.disposal_item_ids,
        status: PickupStatus::Requested,
    };
    storage.open_pickup(&pickup, &items).await?;

    info!(
        "Created pickup {} for lab {} with items {:?}",
        pickup.id, pickup.lab_id, pickup.disposal_item_ids
    );

    Ok((
        StatusCode::CREATED,
        Json(PickupStatusResponse {
            id: pickup.id,
            status: pickup.status.to_string(),
        }),
    ))
}

/// Fetch a pickup request (`GET /pickups/{id}`)
pub async fn get_pickup_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PickupId>,
) -> Result<Json<PickupRequest>, ApiError> {
    let mut storage = state.storage.lock().await;
    storage
        .get_pickup(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Pickup {} not found", id)))
}

/// Move a pickup request to a new status (`PATCH /pickups/{id}`)
pub async fn update_pickup_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PickupId>,
    payload: Result<Json<UpdatePickupRequest>, JsonRejection>,
) -> Result<Json<PickupStatusResponse>, ApiError> {
    let Json(request) = payload?;

    let mut storage = state.storage.lock().await;
    let mut pickup = storage
        .get_pickup(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Pickup {} not found", id)))?;

    if !pickup.status.can_transition_to(request.status) {
        warn!(
            "Rejected transition for pickup {}: {} -> {}",
            id, pickup.status, request.status
        );
        return Err(ApiError::conflict(
            ErrorCode::InvalidTransition,
            format!("{} -> {}", pickup.status, request.status),
        ));
    }

    let from = pickup.status;
    pickup.status = request.status;
    storage.save_pickup(&pickup).await?;

    info!("Pickup {}: {} -> {}", id, from, pickup.status);

    Ok(Json(PickupStatusResponse {
        id,
        status: pickup.status.to_string(),
    }))
}
