//! QR identity cache
//!
//! Maps a disposal item to its generated QR artifact. The first request for
//! an item mints the artifact through `POST /qr`; later requests are served
//! from memory. Concurrent requests for one item share a single generation
//! call. Entries live for the whole session; [`QrIdentityCache::invalidate`]
//! drops one when its item is deleted.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wastetrack_common::wire::GenerateQrRequest;
use wastetrack_common::{DisposalItemId, QrArtifact, QrError, QrMetadata};

use crate::api::PickupApi;
use crate::flight::{FlightAborted, SingleFlight};

#[derive(Default)]
struct CacheState {
    artifacts: HashMap<DisposalItemId, QrArtifact>,
    /// Bumped on invalidation so a generation started earlier cannot
    /// repopulate the entry
    epochs: HashMap<DisposalItemId, u64>,
}

impl CacheState {
    fn epoch(&self, id: DisposalItemId) -> u64 {
        self.epochs.get(&id).copied().unwrap_or(0)
    }
}

pub struct QrIdentityCache {
    api: Arc<dyn PickupApi>,
    state: Arc<Mutex<CacheState>>,
    flight: SingleFlight<DisposalItemId, QrArtifact, QrError>,
}

impl QrIdentityCache {
    pub fn new(api: Arc<dyn PickupApi>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(CacheState::default())),
            flight: SingleFlight::new(),
        }
    }

    /// Return the item's QR artifact, generating it on first use
    pub async fn get_or_create(
        &self,
        disposal_item_id: DisposalItemId,
        metadata: &QrMetadata,
    ) -> Result<QrArtifact, QrError> {
        validate(disposal_item_id, metadata)?;

        if let Some(artifact) = self.cached(disposal_item_id).await {
            debug!("QR cache hit for disposal item {}", disposal_item_id);
            return Ok(artifact);
        }

        let api = Arc::clone(&self.api);
        let state = Arc::clone(&self.state);
        let request = GenerateQrRequest::new(disposal_item_id, metadata);

        self.flight
            .run(disposal_item_id, move || generate(api, state, request))
            .await
            .unwrap_or_else(|FlightAborted| {
                Err(QrError::GenerationFailed {
                    item_id: disposal_item_id,
                    reason: "generation task aborted".to_string(),
                })
            })
    }

    /// Drop the item's artifact; returns whether one was cached
    pub async fn invalidate(&self, disposal_item_id: DisposalItemId) -> bool {
        let mut state = self.state.lock().await;
        *state.epochs.entry(disposal_item_id).or_insert(0) += 1;
        let removed = state.artifacts.remove(&disposal_item_id).is_some();

        if removed {
            info!("Invalidated QR artifact for disposal item {}", disposal_item_id);
        }
        removed
    }

    /// Peek at the cache without generating
    pub async fn cached(&self, disposal_item_id: DisposalItemId) -> Option<QrArtifact> {
        self.state
            .lock()
            .await
            .artifacts
            .get(&disposal_item_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.artifacts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn validate(disposal_item_id: DisposalItemId, metadata: &QrMetadata) -> Result<(), QrError> {
    if disposal_item_id == 0 {
        return Err(QrError::InvalidRequest(
            "disposal item id must be positive".to_string(),
        ));
    }
    if metadata.weight <= Decimal::ZERO {
        return Err(QrError::InvalidRequest(format!(
            "weight must be positive, got {}",
            metadata.weight
        )));
    }
    if metadata.waste_type_name.trim().is_empty() {
        return Err(QrError::InvalidRequest(
            "waste type name must not be empty".to_string(),
        ));
    }
    Ok(())
}

async fn generate(
    api: Arc<dyn PickupApi>,
    state: Arc<Mutex<CacheState>>,
    request: GenerateQrRequest,
) -> Result<QrArtifact, QrError> {
    let id = request.disposal_item_id;

    // A generation that finished just before this flight started has
    // already filled the entry.
    let epoch = {
        let state = state.lock().await;
        if let Some(artifact) = state.artifacts.get(&id) {
            return Ok(artifact.clone());
        }
        state.epoch(id)
    };

    info!("Generating QR artifact for disposal item {}", id);

    let response = api.generate_qr(&request).await.map_err(|e| {
        warn!("QR generation failed for disposal item {}: {}", id, e);
        QrError::GenerationFailed {
            item_id: id,
            reason: e.to_string(),
        }
    })?;

    if response.payload.trim().is_empty() {
        return Err(QrError::GenerationFailed {
            item_id: id,
            reason: "server returned an empty payload".to_string(),
        });
    }

    let artifact = QrArtifact {
        disposal_item_id: id,
        payload: response.payload,
        image: response.image,
        generated_at: Utc::now(),
    };

    let mut state = state.lock().await;
    if state.epoch(id) == epoch {
        state.artifacts.insert(id, artifact.clone());
    } else {
        debug!(
            "Disposal item {} was invalidated during generation, not caching",
            id
        );
    }

    Ok(artifact)
}
