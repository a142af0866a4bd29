//! Configuration management for the pickup backend
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL
    pub redis_url: String,

    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Pixels per QR module in rendered images
    pub qr_module_size: u32,

    /// Keep everything in process memory instead of Redis
    pub in_memory_store: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let config = Config {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            qr_module_size: env::var("QR_MODULE_SIZE")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("Invalid QR_MODULE_SIZE")?,

            in_memory_store: env::var("IN_MEMORY_STORE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid IN_MEMORY_STORE (expected true/false)")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if !(1..=64).contains(&self.qr_module_size) {
            anyhow::bail!("QR_MODULE_SIZE must be between 1 and 64");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            api_host: "127.0.0.1".to_string(),
            api_port: 9000,
            qr_module_size: 8,
            in_memory_store: true,
        }
    }

    #[test]
    fn test_api_address() {
        assert_eq!(config().api_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.api_port = 0;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.qr_module_size = 0;
        assert!(bad.validate().is_err());

        bad.qr_module_size = 65;
        assert!(bad.validate().is_err());
    }
}
