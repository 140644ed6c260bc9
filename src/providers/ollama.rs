use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::providers::{GenerationError, TextGenerator, classify_failure, endpoint};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Local Ollama `/api/generate` client.
pub struct OllamaClient {
    client: reqwest::Client,
    url: Url,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Result<Self, GenerationError> {
        let url = endpoint(base_url, "api/generate")
            .map_err(|error| GenerationError::Transport(format!("invalid base url: {error}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GenerationError::Transport(error.to_string()))?;
        Ok(Self { client, url, model })
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let res = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|error| GenerationError::Transport(error.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        res.json::<GenerateResponse>()
            .await
            .map(|parsed| parsed.response)
            .map_err(|error| GenerationError::Malformed(error.to_string()))
    }
}
