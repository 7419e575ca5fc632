//! API client library.
//!
//! Provides a Rust client for the agent's HTTP API, used by the CLI.

pub mod types;

use anyhow::{Context, Result};
use reqwest::Client as HttpClient;

pub use crate::api::v1::{ContractsResponse, MinersResponse, WorkersResponse};

/// Default API base URL, matching the default web listen address.
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3001";

/// HTTP client for the agent API.
pub struct Client {
    http: HttpClient,
    base_url: String,
}

impl Client {
    /// Create a client connecting to the default local address.
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a client connecting to a specific base URL.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: HttpClient::new(),
            base_url,
        }
    }

    /// Fetch the miner registry snapshot.
    pub async fn get_miners(&self) -> Result<MinersResponse> {
        self.get_json("api/v1/miners").await
    }

    /// Fetch the contract set snapshot.
    pub async fn get_contracts(&self) -> Result<ContractsResponse> {
        self.get_json("api/v1/contracts").await
    }

    /// Fetch the per-destination submit counters.
    pub async fn get_workers(&self) -> Result<WorkersResponse> {
        self.get_json("api/v1/workers").await
    }

    /// Raw GET returning the response body as text.
    pub async fn get_raw(&self, endpoint: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("failed to connect to agent API")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("API request failed: {}", status);
        }
        response.text().await.context("failed to read response")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("failed to connect to agent API")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("API request failed: {}", status);
        }
        response.json().await.context("failed to parse response")
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}
