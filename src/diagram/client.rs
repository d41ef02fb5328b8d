// src/diagram/client.rs
use reqwest::Client;
use serde::Serialize;

use super::C4Model;
use crate::error::SessionError;

const ENDPOINT_NAME: &str = "diagram endpoint";

#[derive(Serialize, Debug)]
struct DiagramRequest<'a> {
    repo_url: &'a str,
}

/// Client for the service that turns a repository into a C4 model.
#[derive(Debug, Clone)]
pub struct DiagramClient {
    client: Client,
    url: String,
}

impl DiagramClient {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests the model for `repo_url`. Non-success statuses are returned
    /// as errors and never retried.
    pub async fn fetch_model(&self, repo_url: &str) -> Result<C4Model, SessionError> {
        log::info!("Requesting diagram data for {}", repo_url);
        let response = self
            .client
            .post(&self.url)
            .json(&DiagramRequest { repo_url })
            .send()
            .await
            .map_err(|e| {
                log::error!("Diagram request failed: {}", e);
                SessionError::transport(ENDPOINT_NAME, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("Diagram endpoint error: {} - {}", status, body);
            return Err(SessionError::Status {
                endpoint: ENDPOINT_NAME.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let model = response
            .json::<C4Model>()
            .await
            .map_err(|e| SessionError::protocol(ENDPOINT_NAME, format!("invalid C4 model: {}", e)))?;
        log::debug!(
            "Diagram model: {} containers, {} components, {} relationships",
            model.containers.len(),
            model.components.len(),
            model.relationships.len()
        );
        Ok(model)
    }
}
