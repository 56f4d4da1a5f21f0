use std::time::Duration;

use serde::{Deserialize, Serialize};
use tia_core::error::AppError;

use super::http::{non_empty, post_json};
use super::{BackendConfig, Completion, ImageInput, ModelBackend, ProviderConfig};
use crate::prompts::InstructionPayload;

const API_VERSION: &str = "2023-06-01";

/// Secondary provider: Anthropic messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Blocks(Vec<RequestBlock<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    source_type: &'a str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicBackend {
    pub fn new(provider: &ProviderConfig, api_key: &str, config: &BackendConfig) -> Result<Self, AppError> {
        let base = provider.base_url.trim().trim_end_matches('/');
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(AppError::new("CONFIG_BACKEND_URL_INVALID", "Backend base URL must be http(s)")
                .with_details(format!("base_url={base}")));
        }
        Ok(Self {
            url: format!("{base}/messages"),
            model: provider.model.clone(),
            api_key: api_key.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
        })
    }
}

/// Text blocks joined by newlines; tool and other blocks are ignored.
fn extract_text(resp: MessagesResponse) -> Option<String> {
    let parts: Vec<String> = resp
        .content
        .into_iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text)
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

impl AnthropicBackend {
    fn send(&self, system: &str, user: MessageContent<'_>) -> Result<Completion, AppError> {
        let req = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };
        let resp: MessagesResponse = post_json(
            self.name(),
            &self.url,
            &[
                ("x-api-key", self.api_key.as_str()),
                ("anthropic-version", API_VERSION),
            ],
            &req,
            self.timeout,
        )?;
        Ok(Completion {
            text: non_empty(self.name(), extract_text(resp))?,
            raw_confidence: None,
        })
    }
}

impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn complete(&self, payload: &InstructionPayload) -> Result<Completion, AppError> {
        self.send(&payload.system, MessageContent::Text(&payload.user))
    }

    /// The image block goes first, then the question.
    fn complete_with_image(
        &self,
        payload: &InstructionPayload,
        image: &ImageInput,
    ) -> Result<Completion, AppError> {
        let blocks = vec![
            RequestBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: image.media_type(),
                    data: image.data_base64(),
                },
            },
            RequestBlock::Text { text: &payload.user },
        ];
        self.send(&payload.system, MessageContent::Blocks(blocks))
    }
}
