//! Shared domain model for the waste pickup subsystem.
//!
//! Both the client subsystem and the reference backend speak in these
//! types: disposal items and pickup requests with their status tokens, QR
//! artifacts, the REST payload shapes, and the error taxonomy.

pub mod error;
pub mod models;
pub mod payload;
pub mod wire;

pub use error::{ConfirmError, LifecycleError, PickupError, QrError, ResumePolicy};
pub use models::{
    DisposalItem, DisposalItemId, DisposalStatus, LabId, PickupId, PickupRequest, PickupStatus,
    QrArtifact, QrMetadata, ScanEvent, WeightUnit,
};
pub use payload::QrPayload;
