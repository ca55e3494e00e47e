//! Client for the remote trust source publishing signed root manifests

use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::error::{Result, VerifierError};
use crate::root_registry::RootRegistry;
use crate::types::RootManifest;

pub struct TrustSourceClient {
    endpoint: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl TrustSourceClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.to_string(),
            client: reqwest::Client::builder().timeout(request_timeout).build()?,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            request_timeout,
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Fetch the manifest with retry logic
    pub async fn fetch_manifest(&self) -> Result<RootManifest> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            debug!("Trust source attempt {}/{} to {}", attempt, self.max_retries, self.endpoint);

            match timeout(self.request_timeout, self.fetch_once()).await {
                Ok(Ok(manifest)) => {
                    if attempt > 1 {
                        info!("Trust source request succeeded on attempt {}", attempt);
                    }
                    return Ok(manifest);
                }
                Ok(Err(e)) => {
                    warn!("Trust source request failed on attempt {}: {}", attempt, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("Trust source request timed out on attempt {}", attempt);
                    last_error = Some(VerifierError::TrustSource("Request timeout".to_string()));
                }
            }

            if attempt < self.max_retries {
                let delay = self.retry_delay * attempt;
                debug!("Waiting {:?} before retry...", delay);
                sleep(delay).await;
            }
        }

        error!("Trust source request failed after {} attempts", self.max_retries);
        Err(last_error
            .unwrap_or_else(|| VerifierError::TrustSource("All retry attempts failed".to_string())))
    }

    async fn fetch_once(&self) -> Result<RootManifest> {
        let response = self.client.get(&self.endpoint).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VerifierError::TrustSource(format!(
                "HTTP error ({}): {}",
                status, error_text
            )));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch the manifest and publish it into `registry`
    pub async fn refresh(&self, registry: &RootRegistry) -> Result<usize> {
        let manifest = self.fetch_manifest().await?;
        registry.apply_manifest(&manifest)
    }
}
