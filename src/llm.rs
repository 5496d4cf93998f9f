//! Ollama client for the chat endpoint
//!
//! Single-shot generation against a local Ollama server. Any failure
//! yields an empty reply; the chat surface degrades instead of erroring.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;

#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/generate", config.url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }

    /// Prompt -> text; empty string on any failure
    pub async fn generate(&self, prompt: &str) -> String {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let result = async {
            let resp = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await?
                .error_for_status()?;
            let body: GenerateResponse = resp.json().await?;
            Ok::<_, anyhow::Error>(body.response)
        }
        .await;

        match result {
            Ok(text) => text,
            Err(e) => {
                warn!("LLM generation failed: {:#}", e);
                String::new()
            }
        }
    }
}
