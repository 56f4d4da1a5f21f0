use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use tia_ai::corpus::{CorpusCache, CorpusConfig, CorpusLoader, SupplementaryCorpus};
use tia_ai::llm::{Completion, ImageInput, ModelBackend};
use tia_ai::prompts::{self, InstructionPayload};
use tia_ai::vision::{ImageAnalyzer, VisionConfig, VisionTier};
use tia_core::domain::Locale;
use tia_core::error::AppError;

/// Records every image turn; fails the turns whose system text contains a marker.
struct VisionBackend {
    fail_when_system_contains: Vec<&'static str>,
    seen: Mutex<Vec<InstructionPayload>>,
}

impl VisionBackend {
    fn new(fail_when_system_contains: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            fail_when_system_contains: fail_when_system_contains.to_vec(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<InstructionPayload> {
        self.seen.lock().expect("lock").clone()
    }
}

impl ModelBackend for VisionBackend {
    fn name(&self) -> &str {
        "vision"
    }

    fn complete(&self, _payload: &InstructionPayload) -> Result<Completion, AppError> {
        Err(AppError::backend_unavailable("text turns are not expected here"))
    }

    fn complete_with_image(
        &self,
        payload: &InstructionPayload,
        image: &ImageInput,
    ) -> Result<Completion, AppError> {
        self.seen.lock().expect("lock").push(payload.clone());
        if self
            .fail_when_system_contains
            .iter()
            .any(|m| payload.system.contains(m))
        {
            return Err(AppError::backend_unavailable("vision quota exceeded"));
        }
        Ok(Completion {
            text: format!("leaf blight on a {} photo", image.media_type()),
            raw_confidence: None,
        })
    }
}

/// Implements text completion only.
struct TextOnlyBackend;

impl ModelBackend for TextOnlyBackend {
    fn name(&self) -> &str {
        "text-only"
    }

    fn complete(&self, _payload: &InstructionPayload) -> Result<Completion, AppError> {
        Ok(Completion {
            text: "text answer".to_string(),
            raw_confidence: None,
        })
    }
}

fn shipped_corpus() -> Arc<CorpusCache> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/corpus");
    Arc::new(CorpusCache::new(CorpusLoader::new(CorpusConfig {
        dir,
        ..CorpusConfig::default()
    })))
}

fn photo() -> ImageInput {
    ImageInput::from_bytes("image/jpeg", b"\xff\xd8\xff\xe0 jpeg").expect("image")
}

#[test]
fn photo_is_analyzed_against_the_regional_tables() {
    let backend = VisionBackend::new(&[]);
    let analyzer = ImageAnalyzer::new(shipped_corpus(), backend.clone(), VisionConfig::default());

    let out = analyzer.analyze(&photo(), Some("brown spots on leaves"), Locale::En);
    assert_eq!(out.tier, VisionTier::CorpusVision);
    assert_eq!(out.confidence, 0.9);
    assert_eq!(out.source, "vision_corpus");
    assert_eq!(out.text, "leaf blight on a image/jpeg photo");

    let seen = backend.seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].system.contains("=== CCPRampal.csv ==="));
    assert!(seen[0].user.contains("brown spots on leaves"));
}

#[test]
fn grounded_failure_falls_back_to_basic_vision() {
    let backend = VisionBackend::new(&["Reference information"]);
    let analyzer = ImageAnalyzer::new(shipped_corpus(), backend.clone(), VisionConfig::default());

    let out = analyzer.analyze(&photo(), None, Locale::Bn);
    assert_eq!(out.tier, VisionTier::BasicVision);
    assert_eq!(out.confidence, 0.8);
    assert_eq!(out.question, prompts::default_image_question(Locale::Bn));
    assert_eq!(backend.seen().len(), 2);
}

#[test]
fn empty_tables_skip_the_grounded_tier() {
    let backend = VisionBackend::new(&[]);
    let analyzer = ImageAnalyzer::new(
        Arc::new(CorpusCache::preloaded(SupplementaryCorpus::default())),
        backend.clone(),
        VisionConfig::default(),
    );

    let out = analyzer.analyze(&photo(), Some("  "), Locale::En);
    assert_eq!(out.tier, VisionTier::BasicVision);
    assert_eq!(out.question, "Analyze this image and give agricultural advice.");
    assert_eq!(backend.seen().len(), 1);
}

#[test]
fn total_outage_gives_localized_apology() {
    let backend = VisionBackend::new(&["Tia Apa"]);
    let analyzer = ImageAnalyzer::new(shipped_corpus(), backend, VisionConfig::default());

    let out = analyzer.analyze(&photo(), None, Locale::Bn);
    assert_eq!(out.tier, VisionTier::StaticFallback);
    assert_eq!(out.confidence, 0.0);
    assert_eq!(out.source, "error");
    assert_eq!(out.text, prompts::image_apology(Locale::Bn));
}

#[test]
fn backends_without_image_input_end_in_apology() {
    let analyzer = ImageAnalyzer::new(shipped_corpus(), Arc::new(TextOnlyBackend), VisionConfig::default());
    let out = analyzer.analyze(&photo(), Some("what is this"), Locale::En);
    assert_eq!(out.tier, VisionTier::StaticFallback);
    assert_eq!(out.text, prompts::image_apology(Locale::En));
}
