// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! LM Studio vision provider (OpenAI-compatible `/v1/chat/completions`)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{encode_image, retry_delay, ImageLimits, VisionProvider};
use crate::config::ProviderSettings;
use crate::Result;

const DEFAULT_TIMEOUT_SECS: u64 = 45;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TOKENS: u32 = 100;

pub struct LmStudioProvider {
    client: Client,
    model: String,
    api_url: String,
    models_url: String,
    max_retries: u32,
    limits: ImageLimits,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

impl LmStudioProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let timeout = settings.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        let api_url = settings.api_url.clone();
        let models_url = api_url.replace("/chat/completions", "/models");

        Ok(Self {
            client,
            model: settings.model.clone(),
            api_url,
            models_url,
            max_retries: settings.max_retries.max(1),
            limits: ImageLimits::from_settings(settings),
        })
    }

    fn build_request(&self, prompt: &str, b64_image: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/jpeg;base64,{}", b64_image),
                        },
                    },
                ],
            }],
            max_tokens: MAX_TOKENS,
            stream: false,
        }
    }
}

#[async_trait]
impl VisionProvider for LmStudioProvider {
    fn name(&self) -> &'static str {
        "lm_studio"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn classify_image(&self, image_path: &Path, prompt: &str) -> Result<String> {
        if let Err(reason) = self.limits.validate(image_path) {
            warn!("Skipping invalid image {}: {}", image_path.display(), reason);
            return Ok(String::new());
        }

        let b64_image = encode_image(image_path)?;
        let payload = self.build_request(prompt, &b64_image);

        for attempt in 0..self.max_retries {
            debug!(
                "Sending request to LM Studio (attempt {}/{})",
                attempt + 1,
                self.max_retries
            );

            let outcome = self.client.post(&self.api_url).json(&payload).send().await;
            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        "LM Studio network error (attempt {}/{}): {}",
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
            };

            let status = response.status();
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                error!(
                    "LM Studio returned {} for {}: {}",
                    status,
                    image_path.display(),
                    detail.chars().take(200).collect::<String>()
                );

                // Bad request is almost always an unsupported image; no retry
                if status == StatusCode::BAD_REQUEST {
                    warn!("Skipping {} due to bad request", image_path.display());
                    return Ok(String::new());
                }

                if attempt + 1 < self.max_retries {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                return Ok(String::new());
            }

            let result: ChatResponse = response.json().await?;
            let text = result
                .choices
                .first()
                .map(|c| c.message.content.trim().to_string())
                .unwrap_or_default();

            if text.is_empty() {
                warn!("LM Studio returned empty response for {}", image_path.display());
                return Ok(String::new());
            }

            debug!("LM Studio response: {}", text);
            return Ok(text);
        }

        Ok(String::new())
    }

    async fn check_server(&self) -> Result<bool> {
        let response = match self
            .client
            .get(&self.models_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("LM Studio server not reachable: {}", e);
                info!("Please start LM Studio and load a vision model");
                return Ok(false);
            }
        };

        if !response.status().is_success() {
            warn!("LM Studio server returned status {}", response.status());
            return Ok(false);
        }

        info!("LM Studio server is running");
        if let Ok(models) = response.json::<ModelsResponse>().await {
            let names: Vec<String> = models.data.into_iter().map(|m| m.id).collect();
            if !names.is_empty() {
                info!("Available models: {}", names.join(", "));
            }
        }
        Ok(true)
    }
}
