// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama vision provider (`/api/generate`)

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{encode_image, retry_delay, VisionProvider};
use crate::config::ProviderSettings;
use crate::{Result, VasortError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OllamaProvider {
    client: Client,
    model: String,
    api_url: String,
    tags_url: String,
    max_retries: u32,
    options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let timeout = settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        let api_url = settings.api_url.clone();
        let tags_url = api_url.replace("/api/generate", "/api/tags");

        Ok(Self {
            client,
            model: settings.model.clone(),
            api_url,
            tags_url,
            max_retries: settings.max_retries.max(1),
            options: settings.options.clone(),
        })
    }
}

#[async_trait]
impl VisionProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn classify_image(&self, image_path: &Path, prompt: &str) -> Result<String> {
        let b64_image = encode_image(image_path)?;

        let mut payload = json!({
            "model": self.model,
            "prompt": prompt,
            "images": [b64_image],
            "stream": false,
        });
        if let Some(map) = payload.as_object_mut() {
            for (key, value) in &self.options {
                map.insert(key.clone(), value.clone());
            }
        }

        for attempt in 0..self.max_retries {
            debug!(
                "Sending request to Ollama (attempt {}/{})",
                attempt + 1,
                self.max_retries
            );

            let response = match self.client.post(&self.api_url).json(&payload).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(
                        "Ollama network error (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(retry_delay(attempt)).await;
                        continue;
                    }
                    error!("Max retries reached for {}", image_path.display());
                    return Ok(String::new());
                }
                Err(e) => return Err(e.into()),
            };

            if !response.status().is_success() {
                return Err(VasortError::Provider(format!(
                    "Ollama returned status {} for {}",
                    response.status(),
                    image_path.display()
                )));
            }

            let result: GenerateResponse = response.json().await?;
            let text = result.response.trim().to_string();
            debug!("Ollama response: {}", text);
            return Ok(text);
        }

        Ok(String::new())
    }

    async fn check_server(&self) -> Result<bool> {
        let response = match self
            .client
            .get(&self.tags_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Ollama server not reachable: {}. Start with: ollama serve", e);
                return Ok(false);
            }
        };

        if !response.status().is_success() {
            warn!("Ollama server returned status {}", response.status());
            return Ok(false);
        }

        let tags: TagsResponse = response.json().await?;
        let models: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();

        if !models.iter().any(|m| m == &self.model) {
            warn!(
                "Model {} not found. Available models: {}",
                self.model,
                models.join(", ")
            );
            info!("Run: ollama pull {}", self.model);
            return Ok(false);
        }

        info!("Ollama server is running with model {}", self.model);
        Ok(true)
    }
}
