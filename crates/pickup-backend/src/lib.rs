//! Pickup Backend Service
//!
//! Reference REST backend for QR identity and pickup confirmation.
//!
//! ## Architecture
//!
//! **Components:**
//! - `handlers`: REST endpoints and error mapping
//! - `storage`: Redis (or in-memory) records for items, codes and pickups
//! - `qr`: PNG rendering and still-image decoding of QR codes
//! - `config`: Configuration management
//!
//! **Endpoints:**
//! - `POST /items`, `GET /items/{id}`: register and inspect disposal items
//! - `POST /qr`: mint (once) and render an item's QR code
//! - `POST /scan`: confirm a pickup from a code or a photo of one
//! - `POST /pickups`, `GET /pickups/{id}`, `PATCH /pickups/{id}`: pickup requests

pub mod config;
pub mod handlers;
pub mod qr;
pub mod storage;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use handlers::AppState;
pub use storage::{MemoryStore, PickupStore, RedisStore};

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/items", post(handlers::register_item_handler))
        .route("/items/{id}", get(handlers::get_item_handler))
        .route("/qr", post(handlers::generate_qr_handler))
        .route("/scan", post(handlers::scan_handler))
        .route("/pickups", post(handlers::create_pickup_handler))
        .route(
            "/pickups/{id}",
            get(handlers::get_pickup_handler).patch(handlers::update_pickup_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
