//! In-memory pickup API for development and testing
//!
//! Mirrors the backend's rules (idempotent QR minting, one-shot scan
//! processing, legal pickup edges) without a network. Every call is counted,
//! and responses can be scripted per endpoint to inject failures or
//! malformed payloads. Still photos are "decoded" by reading their bytes as
//! UTF-8 code text.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use wastetrack_common::wire::{
    CreatePickupRequest, ErrorCode, GenerateQrRequest, GenerateQrResponse, PickupStatusResponse,
    ScanRequest, ScanResponse, UpdatePickupRequest,
};
use wastetrack_common::{
    DisposalItem, DisposalItemId, DisposalStatus, PickupId, PickupRequest, PickupStatus,
};

use crate::api::{ApiError, PickupApi};

#[derive(Default)]
struct MockState {
    items: HashMap<DisposalItemId, DisposalItem>,
    payloads: HashMap<DisposalItemId, String>,
    codes: HashMap<String, DisposalItemId>,
    processed: HashSet<DisposalItemId>,
    pickups: HashMap<PickupId, PickupRequest>,
    next_pickup_id: PickupId,
    qr_script: VecDeque<Result<GenerateQrResponse, ApiError>>,
    scan_script: VecDeque<Result<ScanResponse, ApiError>>,
    update_script: VecDeque<Result<PickupStatusResponse, ApiError>>,
    create_script: VecDeque<Result<PickupStatusResponse, ApiError>>,
}

/// Call counters, one per endpoint
#[derive(Default)]
pub struct CallCounts {
    pub generate_qr: AtomicUsize,
    pub scan: AtomicUsize,
    pub update_pickup: AtomicUsize,
    pub create_pickup: AtomicUsize,
}

/// Mock pickup backend
pub struct MockPickupApi {
    state: Mutex<MockState>,
    latency: Option<Duration>,
    calls: CallCounts,
}

impl MockPickupApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_pickup_id: 1,
                ..Default::default()
            }),
            latency: None,
            calls: CallCounts::default(),
        }
    }

    /// Delay every response, so concurrent callers overlap
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Id the next created pickup request will get
    pub async fn set_next_pickup_id(&self, id: PickupId) {
        self.state.lock().await.next_pickup_id = id;
    }

    /// Register a disposal item as a lab would
    pub async fn register_item(&self, item: DisposalItem) {
        self.state.lock().await.items.insert(item.id, item);
    }

    /// Forget a disposal item and its QR code
    pub async fn delete_item(&self, item_id: DisposalItemId) {
        let mut state = self.state.lock().await;
        state.items.remove(&item_id);
        if let Some(payload) = state.payloads.remove(&item_id) {
            state.codes.remove(&payload);
        }
    }

    pub async fn item(&self, item_id: DisposalItemId) -> Option<DisposalItem> {
        self.state.lock().await.items.get(&item_id).cloned()
    }

    pub async fn pickup(&self, pickup_id: PickupId) -> Option<PickupRequest> {
        self.state.lock().await.pickups.get(&pickup_id).cloned()
    }

    pub async fn script_generate_qr(&self, response: Result<GenerateQrResponse, ApiError>) {
        self.state.lock().await.qr_script.push_back(response);
    }

    pub async fn script_scan(&self, response: Result<ScanResponse, ApiError>) {
        self.state.lock().await.scan_script.push_back(response);
    }

    pub async fn script_update_pickup(&self, response: Result<PickupStatusResponse, ApiError>) {
        self.state.lock().await.update_script.push_back(response);
    }

    pub async fn script_create_pickup(&self, response: Result<PickupStatusResponse, ApiError>) {
        self.state.lock().await.create_script.push_back(response);
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    pub fn generate_qr_calls(&self) -> usize {
        self.calls.generate_qr.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.calls.scan.load(Ordering::SeqCst)
    }

    pub fn update_pickup_calls(&self) -> usize {
        self.calls.update_pickup.load(Ordering::SeqCst)
    }

    pub fn create_pickup_calls(&self) -> usize {
        self.calls.create_pickup.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockPickupApi {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(message: String) -> ApiError {
    ApiError::rejected(404, ErrorCode::NotFound, message)
}

#[async_trait]
impl PickupApi for MockPickupApi {
    async fn generate_qr(
        &self,
        request: &GenerateQrRequest,
    ) -> Result<GenerateQrResponse, ApiError> {
        self.calls.generate_qr.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.state.lock().await;
        if let Some(scripted) = state.qr_script.pop_front() {
            return scripted;
        }

        let id = request.disposal_item_id;
        if !state.items.contains_key(&id) {
            return Err(not_found(format!("Disposal item {} not found", id)));
        }

        let payload = match state.payloads.get(&id) {
            Some(existing) => existing.clone(),
            None => {
                let minted = format!("WT1:{}:mock{}", id, state.payloads.len() + 1);
                state.payloads.insert(id, minted.clone());
                state.codes.insert(minted.clone(), id);
                minted
            }
        };

        debug!("Mock API: generate_qr({}) -> {}", id, payload);

        Ok(GenerateQrResponse {
            image: format!("PNG:{}", payload).into_bytes(),
            payload,
        })
    }

    async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, ApiError> {
        self.calls.scan.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.state.lock().await;
        if let Some(scripted) = state.scan_script.pop_front() {
            return scripted;
        }

        let code = match request {
            ScanRequest::Code { code } => code.trim().to_string(),
            ScanRequest::Image { image_bytes } => String::from_utf8(image_bytes.clone())
                .map_err(|_| {
                    ApiError::rejected(400, ErrorCode::BadRequest, "No QR code found in image")
                })?,
        };

        let id = *state.codes.get(&code).ok_or_else(|| {
            ApiError::rejected(404, ErrorCode::UnknownCode, format!("Unknown code: {}", code))
        })?;

        if state.processed.contains(&id) {
            return Err(ApiError::rejected(
                409,
                ErrorCode::AlreadyProcessed,
                format!("Disposal item {} already picked up", id),
            ));
        }

        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| not_found(format!("Disposal item {} not found", id)))?;

        if item.status != DisposalStatus::Requested {
            return Err(ApiError::rejected(
                409,
                ErrorCode::StateConflict,
                format!("Disposal item {} is {}", id, item.status),
            ));
        }

        item.status = DisposalStatus::PickedUp;
        state.processed.insert(id);

        debug!("Mock API: scan -> item {} picked up", id);

        Ok(ScanResponse {
            disposal_item_id: id,
            status: DisposalStatus::PickedUp.to_string(),
            processed_at: Utc::now(),
        })
    }

    async fn update_pickup(
        &self,
        pickup_id: PickupId,
        request: &UpdatePickupRequest,
    ) -> Result<PickupStatusResponse, ApiError> {
        self.calls.update_pickup.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.state.lock().await;
        if let Some(scripted) = state.update_script.pop_front() {
            return scripted;
        }

        let pickup = state
            .pickups
            .get_mut(&pickup_id)
            .ok_or_else(|| not_found(format!("Pickup {} not found", pickup_id)))?;

        if !pickup.status.can_transition_to(request.status) {
            return Err(ApiError::rejected(
                409,
                ErrorCode::InvalidTransition,
                format!("{} -> {}", pickup.status, request.status),
            ));
        }

        pickup.status = request.status;
        debug!("Mock API: pickup {} -> {}", pickup_id, request.status);

        Ok(PickupStatusResponse {
            id: pickup_id,
            status: request.status.to_string(),
        })
    }

    async fn create_pickup(
        &self,
        request: &CreatePickupRequest,
    ) -> Result<PickupStatusResponse, ApiError> {
        self.calls.create_pickup.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let mut state = self.state.lock().await;
        if let Some(scripted) = state.create_script.pop_front() {
            return scripted;
        }

        for id in &request.disposal_item_ids {
            match state.items.get(id) {
                Some(item) if item.status == DisposalStatus::Stored => {}
                Some(item) => {
                    return Err(ApiError::rejected(
                        409,
                        ErrorCode::StateConflict,
                        format!("Disposal item {} is {}", id, item.status),
                    ))
                }
                None => return Err(not_found(format!("Disposal item {} not found", id))),
            }
        }

        for id in &request.disposal_item_ids {
            if let Some(item) = state.items.get_mut(id) {
                item.status = DisposalStatus::Requested;
            }
        }

        let id = state.next_pickup_id;
        state.next_pickup_id += 1;
        state.pickups.insert(
            id,
            PickupRequest {
                id,
                lab_id: request.lab_id,
                request_date: request.request_date,
                disposal_item_ids: request.disposal_item_ids.clone(),
                status: PickupStatus::Requested,
            },
        );

        debug!("Mock API: created pickup {}", id);

        Ok(PickupStatusResponse {
            id,
            status: PickupStatus::Requested.to_string(),
        })
    }
}
