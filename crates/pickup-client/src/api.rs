//! Transport seam between the subsystem and the pickup REST API

use async_trait::async_trait;
use thiserror::Error;
use wastetrack_common::wire::{
    CreatePickupRequest, ErrorCode, GenerateQrRequest, GenerateQrResponse, PickupStatusResponse,
    ScanRequest, ScanResponse, UpdatePickupRequest,
};
use wastetrack_common::PickupId;

/// Raw transport failure, classified further by each component
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned {status}: {message}")]
    Rejected {
        status: u16,
        code: Option<ErrorCode>,
        message: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn rejected(status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::Rejected {
            status,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Failures where the request may not have been handled at all
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Rejected { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            ApiError::Decode(_) => false,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ApiError::Rejected { code, .. } => *code,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// The four REST operations the subsystem depends on
#[async_trait]
pub trait PickupApi: Send + Sync {
    /// `POST /qr`
    async fn generate_qr(&self, request: &GenerateQrRequest)
        -> Result<GenerateQrResponse, ApiError>;

    /// `POST /scan`
    async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, ApiError>;

    /// `PATCH /pickups/{id}`
    async fn update_pickup(
        &self,
        pickup_id: PickupId,
        request: &UpdatePickupRequest,
    ) -> Result<PickupStatusResponse, ApiError>;

    /// `POST /pickups`
    async fn create_pickup(
        &self,
        request: &CreatePickupRequest,
    ) -> Result<PickupStatusResponse, ApiError>;
}
