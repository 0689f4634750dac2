//! HTTP client for the inference server's OpenAI-compatible API.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::BackendError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for communicating with the inference server.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Chat message in OpenAI format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// OpenAI-compatible chat completion request.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

/// OpenAI-compatible chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Entry of the `/v1/models` listing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// Result of probing the server's health.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub healthy: bool,
    /// Which endpoint answered: `"health"` or `"models"`.
    pub method: Option<&'static str>,
    pub error: Option<String>,
}

impl BackendClient {
    /// Create a client for the given base URL and bearer token.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    /// Create a client reusing an existing connection pool.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Create a client addressing the server described by `config`.
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.base_url(), config.api_key.clone())
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Check the server's own `/health` endpoint.
    pub async fn check_health(&self) -> Result<(), BackendError> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Api(format!("HTTP {}", response.status())))
        }
    }

    /// Check that `/v1/models` answers with 200.
    pub async fn check_models(&self) -> Result<(), BackendError> {
        let url = format!("{}/v1/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Api(format!("HTTP {}", response.status())))
        }
    }

    /// Probe `/health`, falling back to `/v1/models` for servers without it.
    pub async fn probe(&self) -> HealthReport {
        if self.check_health().await.is_ok() {
            return HealthReport {
                healthy: true,
                method: Some("health"),
                error: None,
            };
        }

        match self.check_models().await {
            Ok(()) => HealthReport {
                healthy: true,
                method: Some("models"),
                error: None,
            },
            Err(e) => HealthReport {
                healthy: false,
                method: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// List the models the server exposes.
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>, BackendError> {
        let url = format!("{}/v1/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{}: {}", status, text)));
        }

        let list: ModelList = response.json().await?;
        Ok(list.data)
    }

    /// Send a chat completion and return the first choice's content.
    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, BackendError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{}: {}", status, text)));
        }

        let completion: ChatCompletionResponse = response.json().await?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BackendError::Api("No completion returned".to_string()))
    }

    fn map_transport(&self, e: reqwest::Error) -> BackendError {
        if e.is_connect() || e.is_timeout() {
            BackendError::NotRunning(self.base_url.clone())
        } else {
            BackendError::Http(e)
        }
    }
}
