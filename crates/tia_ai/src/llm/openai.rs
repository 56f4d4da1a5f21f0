use std::time::Duration;

use serde::{Deserialize, Serialize};
use tia_core::error::AppError;

use super::http::{non_empty, post_json};
use super::{BackendConfig, Completion, ImageInput, ModelBackend, ProviderConfig};
use crate::prompts::InstructionPayload;

/// Primary provider: OpenAI-compatible chat completions.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(provider: &ProviderConfig, api_key: &str, config: &BackendConfig) -> Result<Self, AppError> {
        let base = provider.base_url.trim().trim_end_matches('/');
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(AppError::new("CONFIG_BACKEND_URL_INVALID", "Backend base URL must be http(s)")
                .with_details(format!("base_url={base}")));
        }
        Ok(Self {
            url: format!("{base}/chat/completions"),
            model: provider.model.clone(),
            api_key: api_key.to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
        })
    }

    fn chat(&self, system: &str, user: MessageContent<'_>) -> Result<Completion, AppError> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let auth = format!("Bearer {}", self.api_key);
        let resp: ChatResponse = post_json(
            self.name(),
            &self.url,
            &[("Authorization", auth.as_str())],
            &req,
            self.timeout,
        )?;
        let text = resp.choices.into_iter().next().and_then(|c| c.message.content);
        Ok(Completion {
            text: non_empty(self.name(), text)?,
            raw_confidence: None,
        })
    }
}

impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn complete(&self, payload: &InstructionPayload) -> Result<Completion, AppError> {
        self.chat(&payload.system, MessageContent::Text(&payload.user))
    }

    fn complete_with_image(
        &self,
        payload: &InstructionPayload,
        image: &ImageInput,
    ) -> Result<Completion, AppError> {
        let parts = vec![
            ContentPart::Text { text: &payload.user },
            ContentPart::ImageUrl {
                image_url: ImageUrl { url: image.data_url() },
            },
        ];
        self.chat(&payload.system, MessageContent::Parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_derived_from_base_url() {
        let provider = ProviderConfig {
            base_url: "https://llm.example.org/v1/".to_string(),
            model: "gpt-4o".to_string(),
        };
        let backend = OpenAiBackend::new(&provider, "k", &BackendConfig::default()).expect("backend");
        assert_eq!(backend.url, "https://llm.example.org/v1/chat/completions");
    }

    #[test]
    fn image_turn_carries_text_then_data_url() {
        let image = ImageInput::from_bytes("image/png", b"\x89PNG").expect("image");
        let message = ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "what is this spot" },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: image.data_url() },
                },
            ]),
        };
        let json = serde_json::to_value(&message).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "what is this spot"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,iVBORw=="}}
                ]
            })
        );
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let provider = ProviderConfig {
            base_url: "llm.example.org".to_string(),
            model: "gpt-4o".to_string(),
        };
        let err = OpenAiBackend::new(&provider, "k", &BackendConfig::default()).expect_err("invalid");
        assert_eq!(err.code, "CONFIG_BACKEND_URL_INVALID");
    }
}
