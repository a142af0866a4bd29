//! HTTP client for the pickup REST API

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;
use wastetrack_common::wire::{
    CreatePickupRequest, ErrorBody, GenerateQrRequest, GenerateQrResponse, PickupStatusResponse,
    RegisterItemRequest, ScanRequest, ScanResponse, UpdatePickupRequest,
};
use wastetrack_common::{DisposalItem, DisposalItemId, PickupId, PickupRequest};

use crate::api::{ApiError, PickupApi};
use crate::config::ClientConfig;

/// `reqwest`-backed implementation of [`PickupApi`]
pub struct HttpPickupApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPickupApi {
    /// Create a new client from configuration
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) => ApiError::Rejected {
                    status: status.as_u16(),
                    code: Some(body.code),
                    message: body.error,
                },
                Err(_) => ApiError::Rejected {
                    status: status.as_u16(),
                    code: None,
                    message: if text.is_empty() {
                        status.to_string()
                    } else {
                        text
                    },
                },
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Register a disposal item (`POST /items`)
    pub async fn register_item(
        &self,
        request: &RegisterItemRequest,
    ) -> Result<DisposalItem, ApiError> {
        debug!("Registering disposal item {}", request.id);
        self.send(self.client.post(self.url("/items")).json(request))
            .await
    }

    /// Fetch a disposal item (`GET /items/{id}`)
    pub async fn get_item(&self, item_id: DisposalItemId) -> Result<DisposalItem, ApiError> {
        self.send(self.client.get(self.url(&format!("/items/{}", item_id))))
            .await
    }

    /// Fetch a pickup request (`GET /pickups/{id}`)
    pub async fn get_pickup(&self, pickup_id: PickupId) -> Result<PickupRequest, ApiError> {
        self.send(self.client.get(self.url(&format!("/pickups/{}", pickup_id))))
            .await
    }

    /// Check if the backend is reachable
    pub async fn health_check(&self) -> Result<bool, ApiError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

#[async_trait]
impl PickupApi for HttpPickupApi {
    async fn generate_qr(
        &self,
        request: &GenerateQrRequest,
    ) -> Result<GenerateQrResponse, ApiError> {
        debug!("POST /qr for disposal item {}", request.disposal_item_id);
        self.send(self.client.post(self.url("/qr")).json(request))
            .await
    }

    async fn scan(&self, request: &ScanRequest) -> Result<ScanResponse, ApiError> {
        debug!("POST /scan");
        self.send(self.client.post(self.url("/scan")).json(request))
            .await
    }

    async fn update_pickup(
        &self,
        pickup_id: PickupId,
        request: &UpdatePickupRequest,
    ) -> Result<PickupStatusResponse, ApiError> {
        debug!("PATCH /pickups/{} -> {}", pickup_id, request.status);
        self.send(
            self.client
                .patch(self.url(&format!("/pickups/{}", pickup_id)))
                .json(request),
        )
        .await
    }

    async fn create_pickup(
        &self,
        request: &CreatePickupRequest,
    ) -> Result<PickupStatusResponse, ApiError> {
        debug!(
            "POST /pickups for lab {} with {} items",
            request.lab_id,
            request.disposal_item_ids.len()
        );
        self.send(self.client.post(self.url("/pickups")).json(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_slash() {
        let config = ClientConfig {
            api_url: "http://localhost:8090/".to_string(),
            timeout_secs: 5,
        };
        let client = HttpPickupApi::new(&config).unwrap();
        assert_eq!(client.base_url, "http://localhost:8090");
        assert_eq!(client.url("/qr"), "http://localhost:8090/qr");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let config = ClientConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
        };
        let client = HttpPickupApi::new(&config).unwrap();

        let err = client
            .scan(&ScanRequest::Code {
                code: "WT1:1:abc".into(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Transport(_)));
        assert!(err.is_transient());
    }
}
