//! Configuration management for the pickup client
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the pickup REST API
    pub api_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = ClientConfig {
            api_url: env::var("PICKUP_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),

            timeout_secs: env::var("PICKUP_API_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("Invalid PICKUP_API_TIMEOUT_SECS")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("PICKUP_API_URL must be an http(s) URL");
        }

        if self.timeout_secs == 0 {
            anyhow::bail!("PICKUP_API_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
