//! Photo analysis with its own fallback chain: vision over the regional tables, plain
//! vision, then a static apology.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tia_core::domain::Locale;
use tia_core::error::AppError;
use tracing::{info, warn};

use crate::corpus::CorpusCache;
use crate::llm::{ImageInput, ModelBackend};
use crate::prompts;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VisionTier {
    CorpusVision,
    BasicVision,
    StaticFallback,
}

impl VisionTier {
    pub fn confidence(&self) -> f32 {
        match self {
            VisionTier::CorpusVision => 0.9,
            VisionTier::BasicVision => 0.8,
            VisionTier::StaticFallback => 0.0,
        }
    }

    pub fn source_label(&self) -> &'static str {
        match self {
            VisionTier::CorpusVision => "vision_corpus",
            VisionTier::BasicVision => "vision_basic",
            VisionTier::StaticFallback => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAnalysis {
    pub text: String,
    pub tier: VisionTier,
    pub confidence: f32,
    pub source: String,
    /// The question the analysis answered, after defaulting.
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisionConfig {
    /// Characters of linearized reference tables sent along with the photo.
    #[serde(default = "default_corpus_char_budget")]
    pub corpus_char_budget: usize,
}

fn default_corpus_char_budget() -> usize {
    24_000
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            corpus_char_budget: default_corpus_char_budget(),
        }
    }
}

struct VisionContext<'a> {
    image: &'a ImageInput,
    question: &'a str,
    locale: Locale,
}

type VisionHandler = fn(&ImageAnalyzer, &VisionContext<'_>) -> Result<String, AppError>;

const VISION_CHAIN: [(VisionTier, VisionHandler); 2] = [
    (VisionTier::CorpusVision, corpus_vision as VisionHandler),
    (VisionTier::BasicVision, basic_vision as VisionHandler),
];

pub struct ImageAnalyzer {
    corpus: Arc<CorpusCache>,
    backend: Arc<dyn ModelBackend>,
    config: VisionConfig,
}

impl ImageAnalyzer {
    pub fn new(corpus: Arc<CorpusCache>, backend: Arc<dyn ModelBackend>, config: VisionConfig) -> Self {
        Self {
            corpus,
            backend,
            config,
        }
    }

    /// Always produces an analysis; a blank question falls back to a generic request.
    pub fn analyze(&self, image: &ImageInput, question: Option<&str>, locale: Locale) -> ImageAnalysis {
        let question = question
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| prompts::default_image_question(locale));
        let ctx = VisionContext {
            image,
            question,
            locale,
        };

        let mut answered: Option<(VisionTier, String)> = None;
        for (tier, handler) in VISION_CHAIN.iter() {
            match handler(self, &ctx) {
                Ok(text) if !text.trim().is_empty() => {
                    answered = Some((*tier, text));
                    break;
                }
                Ok(_) => warn!(tier = ?tier, "vision tier returned empty text; falling through"),
                Err(e) => warn!(
                    tier = ?tier,
                    code = %e.code,
                    details = ?e.details,
                    "vision tier failed; falling through"
                ),
            }
        }
        let (tier, text) = answered.unwrap_or_else(|| {
            (
                VisionTier::StaticFallback,
                prompts::image_apology(locale).to_string(),
            )
        });

        info!(tier = ?tier, media_type = image.media_type(), "image analyzed");
        ImageAnalysis {
            text,
            tier,
            confidence: tier.confidence(),
            source: tier.source_label().to_string(),
            question: question.to_string(),
        }
    }
}

fn corpus_vision(analyzer: &ImageAnalyzer, ctx: &VisionContext<'_>) -> Result<String, AppError> {
    let corpus = analyzer.corpus.get_or_load();
    let reference = corpus.text_within(analyzer.config.corpus_char_budget);
    if reference.trim().is_empty() {
        return Err(AppError::evidence_unavailable("Reference tables are empty"));
    }
    let payload = prompts::vision_with_corpus(&reference, ctx.question, ctx.locale);
    Ok(analyzer.backend.complete_with_image(&payload, ctx.image)?.text)
}

fn basic_vision(analyzer: &ImageAnalyzer, ctx: &VisionContext<'_>) -> Result<String, AppError> {
    let payload = prompts::vision_basic(ctx.question, ctx.locale);
    Ok(analyzer.backend.complete_with_image(&payload, ctx.image)?.text)
}
