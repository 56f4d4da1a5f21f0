use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tia_core::error::AppError;
use tracing::info;

use crate::prompts::{self, InstructionPayload};

pub mod anthropic;
mod http;
mod image;
pub mod openai;

pub use anthropic::AnthropicBackend;
pub use image::ImageInput;
pub use openai::OpenAiBackend;

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub raw_confidence: Option<f32>,
}

/// Conversational handle created from an evidence blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantSession {
    pub id: String,
    pub instructions: String,
    pub context: String,
}

/// A free-form completion provider.
///
/// Implementations surface every transport, status, quota or decode failure as a
/// `BACKEND_*` error and never retry or fall back on their own.
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, payload: &InstructionPayload) -> Result<Completion, AppError>;

    /// Single turn over a photo; the image travels with `payload.user`.
    fn complete_with_image(
        &self,
        _payload: &InstructionPayload,
        _image: &ImageInput,
    ) -> Result<Completion, AppError> {
        Err(AppError::new("BACKEND_VISION_UNSUPPORTED", "Backend does not accept images")
            .with_details(format!("backend={}", self.name())))
    }

    fn create_assistant_session(&self, evidence_blob: &str) -> Result<AssistantSession, AppError> {
        let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::digest(evidence_blob.as_bytes());
        Ok(AssistantSession {
            id: format!("{}-{}-{seq}", self.name(), &hex::encode(digest)[..12]),
            instructions: prompts::assistant_instructions(),
            context: evidence_blob.to_string(),
        })
    }

    /// `turn` already carries the reference text and the question.
    fn run_assistant_turn(&self, session: &AssistantSession, turn: &str) -> Result<String, AppError> {
        let completion = self.complete(&InstructionPayload {
            system: session.instructions.clone(),
            user: turn.to_string(),
        })?;
        Ok(completion.text)
    }

    fn close_assistant_session(&self, _session: AssistantSession) {}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_openai")]
    pub openai: ProviderConfig,
    #[serde(default = "default_anthropic")]
    pub anthropic: ProviderConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_openai() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o".to_string(),
    }
}

fn default_anthropic() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://api.anthropic.com/v1".to_string(),
        model: "claude-3-5-sonnet-latest".to_string(),
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            openai: default_openai(),
            anthropic: default_anthropic(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Provider credentials, read from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub primary_api_key: Option<String>,
    pub secondary_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            primary_api_key: read("OPENAI_API_KEY"),
            secondary_api_key: read("ANTHROPIC_API_KEY"),
        }
    }
}

/// Pick the process-wide backend once: secondary credential, then primary, else fail.
pub fn select_backend(
    config: &BackendConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn ModelBackend>, AppError> {
    if let Some(key) = credentials.secondary_api_key.as_deref() {
        let backend = AnthropicBackend::new(&config.anthropic, key, config)?;
        info!(backend = backend.name(), model = %config.anthropic.model, "model backend selected");
        return Ok(Arc::new(backend));
    }
    if let Some(key) = credentials.primary_api_key.as_deref() {
        let backend = OpenAiBackend::new(&config.openai, key, config)?;
        info!(backend = backend.name(), model = %config.openai.model, "model backend selected");
        return Ok(Arc::new(backend));
    }
    Err(AppError::new(
        "CONFIG_NO_BACKEND",
        "No model backend configured; set ANTHROPIC_API_KEY or OPENAI_API_KEY",
    ))
}
