//! Pickup client subsystem
//!
//! QR identity and pickup confirmation for a waste pickup client.
//!
//! ## Architecture
//!
//! A lab generates a QR code for each stored disposal item and requests a
//! pickup. On site the collector scans the codes; each scan is confirmed
//! with the backend exactly once and moves the item to `PICKED_UP`.
//!
//! **Components:**
//! - `qr_cache`: Per-item QR artifact cache with single-flight generation
//! - `scan_session`: Gates decode callbacks from the capture driver
//! - `confirmation`: Scan confirmation exchange and error taxonomy
//! - `lifecycle`: Local disposal item status (`STORED -> REQUESTED -> PICKED_UP`)
//! - `pickup_status`: Pickup request status machine
//! - `api` / `api_client`: REST transport seam and its `reqwest` implementation
//! - `mock_api`: In-memory backend for development/testing
//! - `flight`: Single-flight and per-key lock primitives
//!
//! **Data Flow:**
//! 1. Lab registers items, `QrIdentityCache` mints one code per item
//! 2. Lab creates a pickup request, items move to `REQUESTED`
//! 3. Collector scans a code, `ScanSession` pauses and forwards it once
//! 4. `PickupConfirmation` posts the scan, item moves to `PICKED_UP`
//! 5. Operator advances the pickup through `PROCESSING` to `COMPLETED`

use std::sync::Arc;

pub mod api;
pub mod api_client;
pub mod config;
pub mod confirmation;
pub mod flight;
pub mod lifecycle;
pub mod mock_api;
pub mod pickup_status;
pub mod qr_cache;
pub mod scan_session;

// Re-export commonly used types
pub use api::{ApiError, PickupApi};
pub use api_client::HttpPickupApi;
pub use config::ClientConfig;
pub use confirmation::{Confirmation, PickupConfirmation, ScanInput};
pub use lifecycle::DisposalLifecycle;
pub use mock_api::MockPickupApi;
pub use pickup_status::{PickupProgress, PickupStatusMachine};
pub use qr_cache::QrIdentityCache;
pub use scan_session::{CaptureDriver, ScanOutcome, ScanSession, SessionState};

/// All components wired to one API and one shared item lifecycle
pub struct PickupSubsystem {
    pub lifecycle: Arc<DisposalLifecycle>,
    pub qr_cache: QrIdentityCache,
    pub confirmation: PickupConfirmation,
    pub pickups: PickupStatusMachine,
}

impl PickupSubsystem {
    pub fn new(api: Arc<dyn PickupApi>) -> Self {
        let lifecycle = Arc::new(DisposalLifecycle::new());

        Self {
            qr_cache: QrIdentityCache::new(Arc::clone(&api)),
            confirmation: PickupConfirmation::new(Arc::clone(&api), Arc::clone(&lifecycle)),
            pickups: PickupStatusMachine::new(api, Arc::clone(&lifecycle)),
            lifecycle,
        }
    }

    /// Open a scan session on a capture driver
    pub fn scan_session<D: CaptureDriver>(&self, driver: D) -> ScanSession<D> {
        ScanSession::new(driver)
    }
}
