//! Screenshot description through the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::VisionDescription;

pub const DEFAULT_VISION_MODEL: &str = "claude-3-haiku-20240307";
/// Tried once when the configured model is unknown to the API.
pub const FALLBACK_VISION_MODEL: &str = "claude-3-opus-20240229";

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const MAX_TOKENS: u32 = 1024;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unparseable vision response: {0}")]
    Parse(String),
}

/// Looks at a screenshot and describes the control that downloads the
/// article PDF, or says there is none.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(
        &self,
        png: &[u8],
        page_url: &str,
    ) -> Result<Option<VisionDescription>, VisionError>;
}

pub fn prompt_for(page_url: &str) -> String {
    format!(
        r#"This is a screenshot of an academic article page: {page_url}

Your task: Identify the PRIMARY PDF download button or link for the MAIN ARTICLE PDF.

Look for:
- Buttons/links with text like "PDF", "Download PDF", "Open PDF", "View PDF"
- Red PDF icons or PDF symbols
- Positioned prominently near the article title/abstract area
- In toolbars or action buttons near the article content

DO NOT identify:
- Supplementary materials
- Citation export buttons
- Related articles
- Secondary PDFs

Respond ONLY with valid JSON (no markdown, no code blocks):
{{
    "found": true or false,
    "element_text": "exact visible text on the button/link",
    "visual_description": "brief description of what it looks like",
    "position": "location on page (e.g., 'below title in article toolbar', 'top right corner')",
    "distinctive_features": ["list", "of", "features"],
    "confidence": "high", "medium", or "low"
}}"#
    )
}

/// Drop a surrounding markdown code fence, if any.
fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Deserialize)]
struct FoundFlag {
    #[serde(default)]
    found: bool,
}

/// Parse the model's text reply. `Ok(None)` when it reports no control.
pub fn parse_reply(text: &str) -> Result<Option<VisionDescription>, VisionError> {
    let json = strip_fences(text);
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| VisionError::Parse(e.to_string()))?;
    let flag: FoundFlag =
        serde_json::from_value(value.clone()).map_err(|e| VisionError::Parse(e.to_string()))?;
    if !flag.found {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| VisionError::Parse(e.to_string()))
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentPart<'a> {
    Image { source: ImageSource },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: String,
}

pub struct AnthropicVision {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl AnthropicVision {
    pub fn new(client: reqwest::Client, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client,
            api_key,
            model,
            timeout,
        }
    }

    async fn call(&self, model: &str, image_b64: &str, prompt: &str) -> Result<String, VisionError> {
        let request = MessagesRequest {
            model,
            max_tokens: MAX_TOKENS,
            messages: vec![Message {
                role: "user",
                content: vec![
                    ContentPart::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: "image/png",
                            data: image_b64.to_string(),
                        },
                    },
                    ContentPart::Text { text: prompt },
                ],
            }],
        };

        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VisionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = resp.json().await?;
        Ok(parsed
            .content
            .into_iter()
            .next()
            .map(|b| b.text)
            .unwrap_or_default())
    }
}

#[async_trait]
impl VisionDescriber for AnthropicVision {
    async fn describe(
        &self,
        png: &[u8],
        page_url: &str,
    ) -> Result<Option<VisionDescription>, VisionError> {
        let image = STANDARD.encode(png);
        let prompt = prompt_for(page_url);

        let text = match self.call(&self.model, &image, &prompt).await {
            Err(VisionError::Api { status: 404, .. }) if self.model != FALLBACK_VISION_MODEL => {
                tracing::warn!(model = %self.model, "vision model not found, trying fallback");
                self.call(FALLBACK_VISION_MODEL, &image, &prompt).await?
            }
            other => other?,
        };

        let description = parse_reply(&text)?;
        tracing::debug!(
            url = page_url,
            found = description.is_some(),
            confidence = ?description.as_ref().map(|d| d.confidence),
            "vision reply"
        );
        Ok(description)
    }
}
