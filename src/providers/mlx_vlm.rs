// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! MLX VLM vision provider (`/generate`)
//!
//! The MLX server runs on the same machine and loads images itself, so the
//! request carries the image path rather than base64 data.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{retry_delay, VisionProvider};
use crate::config::ProviderSettings;
use crate::Result;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MAX_TOKENS: u64 = 100;

pub struct MlxVlmProvider {
    client: Client,
    model: String,
    api_url: String,
    base_url: String,
    max_retries: u32,
    options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: String,
}

impl MlxVlmProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let timeout = settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        let api_url = settings.api_url.clone();
        let base_url = api_url
            .trim_end_matches('/')
            .trim_end_matches("/generate")
            .to_string();

        Ok(Self {
            client,
            model: settings.model.clone(),
            api_url,
            base_url,
            max_retries: settings.max_retries.max(1),
            options: settings.options.clone(),
        })
    }
}

#[async_trait]
impl VisionProvider for MlxVlmProvider {
    fn name(&self) -> &'static str {
        "mlx_vlm"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn classify_image(&self, image_path: &Path, prompt: &str) -> Result<String> {
        let max_tokens = self
            .options
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut payload = json!({
            "model": self.model,
            "prompt": prompt,
            "image": [image_path.to_string_lossy()],
            "max_tokens": max_tokens,
            "stream": false,
        });
        if let Some(map) = payload.as_object_mut() {
            for key in ["temperature", "top_p"] {
                if let Some(value) = self.options.get(key) {
                    map.insert(key.to_string(), value.clone());
                }
            }
        }

        for attempt in 0..self.max_retries {
            debug!(
                "Sending request to MLX VLM (attempt {}/{})",
                attempt + 1,
                self.max_retries
            );

            let response = match self.client.post(&self.api_url).json(&payload).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(
                        "MLX VLM network error (attempt {}/{}): {}",
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

            let response = response.error_for_status()?;
            let result: GenerateResponse = response.json().await?;

            let text = match result.text.find("<|end|>") {
                Some(idx) => result.text[..idx].trim().to_string(),
                None => result.text.trim().to_string(),
            };
            debug!("MLX VLM response: {}", text);
            return Ok(text);
        }

        Ok(String::new())
    }

    async fn check_server(&self) -> Result<bool> {
        let response = match self
            .client
            .get(&self.base_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("MLX VLM server not reachable: {}", e);
                info!("Start it with: mlx_vlm.server --model {}", self.model);
                return Ok(false);
            }
        };

        // The server answers 404 on the base path while healthy
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            info!("MLX VLM server is running");
            Ok(true)
        } else {
            warn!("MLX VLM server returned status {}", status);
            Ok(false)
        }
    }
}
