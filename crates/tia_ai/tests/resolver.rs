use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use tia_ai::corpus::{CorpusCache, CorpusConfig, CorpusLoader, SupplementaryCorpus};
use tia_ai::evidence::{EvidenceAggregator, EvidenceConfig};
use tia_ai::knowledge::KnowledgeStore;
use tia_ai::llm::{AssistantSession, Completion, ModelBackend};
use tia_ai::prompts::{self, InstructionPayload};
use tia_ai::resolve::{AnswerResolver, Requester, ResolverConfig, Tier};
use tia_ai::web::{StaticWebDirectory, WebEvidenceProvider, WebSnippet};
use tia_core::domain::{Locale, Modality, Query};
use tia_core::error::AppError;
use tia_core::querylog::{QueryLog, QueryLogConfig, QueryLogWriter};
use tia_core::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Rag,
    Assistant,
    Direct,
}

/// Answers every call with a fixed reply unless the call's stage is scripted to fail
/// or to come back blank.
#[derive(Default)]
struct ScriptedBackend {
    fail: Vec<Stage>,
    blank: Vec<Stage>,
    calls: Mutex<Vec<Stage>>,
    closed_sessions: AtomicUsize,
}

impl ScriptedBackend {
    fn failing(fail: &[Stage]) -> Self {
        Self {
            fail: fail.to_vec(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Stage> {
        self.calls.lock().expect("lock").clone()
    }
}

fn stage_of(payload: &InstructionPayload) -> Stage {
    if payload.user.starts_with("Here is some agricultural reference information") {
        Stage::Assistant
    } else if payload.user.starts_with("Please provide detailed agricultural advice") {
        Stage::Direct
    } else {
        Stage::Rag
    }
}

impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, payload: &InstructionPayload) -> Result<Completion, AppError> {
        let stage = stage_of(payload);
        self.calls.lock().expect("lock").push(stage);
        if self.fail.contains(&stage) {
            return Err(AppError::backend_unavailable("quota exceeded").with_details(format!("{stage:?}")));
        }
        let text = if self.blank.contains(&stage) {
            "   ".to_string()
        } else {
            format!("advice from {stage:?}")
        };
        Ok(Completion {
            text,
            raw_confidence: None,
        })
    }

    fn close_assistant_session(&self, _session: AssistantSession) {
        self.closed_sessions.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingWeb;

impl WebEvidenceProvider for FailingWeb {
    fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSnippet>, AppError> {
        Err(AppError::evidence_unavailable("connection refused"))
    }
}

fn fixture_corpus() -> Arc<CorpusCache> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../data/corpus");
    Arc::new(CorpusCache::new(CorpusLoader::new(CorpusConfig {
        dir,
        ..CorpusConfig::default()
    })))
}

fn resolver(
    backend: Arc<ScriptedBackend>,
    web: Arc<dyn WebEvidenceProvider>,
    corpus: Arc<CorpusCache>,
) -> AnswerResolver {
    let aggregator = EvidenceAggregator::new(
        Arc::new(KnowledgeStore::builtin()),
        web,
        Arc::clone(&corpus),
        EvidenceConfig::default(),
    );
    AnswerResolver::new(aggregator, corpus, backend, ResolverConfig::default())
}

fn query(text: &str, locale: Locale) -> Query {
    Query::at(text, locale, Modality::Text, "Rampal", "2026-03-01T10:00:00Z").expect("query")
}

fn requester() -> Requester {
    Requester {
        user_contact: "01711000000".to_string(),
        clinic_or_region: "Rampal".to_string(),
    }
}

#[test]
fn healthy_backend_answers_at_first_tier() {
    let backend = Arc::new(ScriptedBackend::default());
    let r = resolver(Arc::clone(&backend), Arc::new(StaticWebDirectory::default()), fixture_corpus());

    let res = r.resolve(&query("rice turning yellow", Locale::En));
    assert_eq!(res.answer.tier, Tier::EnhancedRag);
    assert_eq!(res.answer.confidence, 0.98);
    assert_eq!(res.answer.source, "enhanced_rag");
    assert_eq!(res.answer.text, "advice from Rag");
    assert!(res.answer.metadata.local_evidence_count >= 1);
    assert_eq!(res.answer.metadata.web_evidence_count, 1);
    assert_eq!(res.signal.tier, Tier::EnhancedRag);
    assert!(!res.signal.storage_degraded);
    assert_eq!(backend.calls(), vec![Stage::Rag]);
}

#[test]
fn web_outage_does_not_block_first_tier() {
    let backend = Arc::new(ScriptedBackend::default());
    let r = resolver(Arc::clone(&backend), Arc::new(FailingWeb), fixture_corpus());

    let res = r.resolve(&query("rice turning yellow", Locale::Bn));
    assert_eq!(res.answer.tier, Tier::EnhancedRag);
    assert_eq!(res.answer.metadata.web_evidence_count, 0);
}

#[test]
fn completion_outage_falls_back_to_assistant_over_tables() {
    let backend = Arc::new(ScriptedBackend::failing(&[Stage::Rag]));
    let r = resolver(Arc::clone(&backend), Arc::new(StaticWebDirectory::default()), fixture_corpus());

    let res = r.resolve(&query("rice turning yellow", Locale::En));
    assert_eq!(res.answer.tier, Tier::AssistantWithCorpus);
    assert_eq!(res.answer.confidence, 0.85);
    assert_eq!(res.answer.source, "assistant_corpus");
    assert!(res.answer.metadata.local_evidence_count >= 1);
    assert_eq!(backend.calls(), vec![Stage::Rag, Stage::Assistant]);
    assert_eq!(backend.closed_sessions.load(Ordering::SeqCst), 1);
}

#[test]
fn assistant_session_is_closed_even_when_the_turn_fails() {
    let backend = Arc::new(ScriptedBackend::failing(&[Stage::Rag, Stage::Assistant]));
    let r = resolver(Arc::clone(&backend), Arc::new(FailingWeb), fixture_corpus());

    let res = r.resolve(&query("jute stem rot", Locale::En));
    assert_eq!(res.answer.tier, Tier::DirectCompletion);
    assert_eq!(res.answer.confidence, 0.75);
    assert_eq!(res.answer.source, "direct_completion");
    assert_eq!(backend.closed_sessions.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_tables_skip_the_assistant_tier() {
    let backend = Arc::new(ScriptedBackend::failing(&[Stage::Rag]));
    let corpus = Arc::new(CorpusCache::preloaded(SupplementaryCorpus::default()));
    let r = resolver(Arc::clone(&backend), Arc::new(FailingWeb), corpus);

    let res = r.resolve(&query("rice turning yellow", Locale::En));
    assert_eq!(res.answer.tier, Tier::DirectCompletion);
    assert_eq!(backend.calls(), vec![Stage::Rag, Stage::Direct]);
    assert_eq!(backend.closed_sessions.load(Ordering::SeqCst), 0);
}

#[test]
fn blank_model_text_counts_as_failure() {
    let backend = Arc::new(ScriptedBackend {
        blank: vec![Stage::Rag],
        ..ScriptedBackend::default()
    });
    let r = resolver(Arc::clone(&backend), Arc::new(FailingWeb), fixture_corpus());

    let res = r.resolve(&query("rice turning yellow", Locale::En));
    assert_eq!(res.answer.tier, Tier::AssistantWithCorpus);
    assert_eq!(res.answer.text, "advice from Assistant");
}

#[test]
fn total_outage_returns_localized_apology() {
    for locale in [Locale::Bn, Locale::En] {
        let backend = Arc::new(ScriptedBackend::failing(&[Stage::Rag, Stage::Assistant, Stage::Direct]));
        let r = resolver(Arc::clone(&backend), Arc::new(FailingWeb), fixture_corpus());

        let res = r.resolve(&query("ধানের পাতা হলুদ", locale));
        assert_eq!(res.answer.tier, Tier::StaticFallback);
        assert_eq!(res.answer.confidence, 0.0);
        assert_eq!(res.answer.source, "error");
        assert_eq!(res.answer.text, prompts::apology(locale));
        assert!(!res.answer.text.is_empty());
        // Each tier is attempted exactly once.
        assert_eq!(backend.calls(), vec![Stage::Rag, Stage::Assistant, Stage::Direct]);
    }
}

#[test]
fn resolved_queries_are_written_to_the_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_cfg = QueryLogConfig {
        path: dir.path().join("user_data.csv"),
        replace_retry: RetryPolicy::immediate(3),
        append_retry: RetryPolicy::immediate(3),
        ..QueryLogConfig::default()
    };
    let writer = QueryLogWriter::spawn(QueryLog::open(&log_cfg), 16).expect("spawn");

    let backend = Arc::new(ScriptedBackend::default());
    let r = resolver(backend, Arc::new(FailingWeb), fixture_corpus()).with_query_log(writer.sink());

    let q = Query::at("rice turning yellow", Locale::En, Modality::Voice, "", "2026-03-01T10:00:00Z")
        .expect("query");
    let res = r.resolve_and_record(&q, &requester());
    assert_eq!(res.answer.tier, Tier::EnhancedRag);
    assert!(!res.signal.storage_degraded);

    let stats = writer.shutdown().expect("shutdown");
    assert_eq!(stats.replaced, 1);

    let rows = QueryLog::open(&log_cfg).read_all().expect("read");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, 1);
    assert_eq!(rows[0].modality, "Voice");
    assert_eq!(rows[0].query_text, "rice turning yellow");
    assert_eq!(rows[0].answer_text, "advice from Rag");
    assert_eq!(rows[0].clinic_or_region, "Rampal");
}

#[test]
fn storage_failure_is_signalled_without_changing_the_answer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, "x").expect("write");
    let log_cfg = QueryLogConfig {
        path: blocker.join("user_data.csv"),
        replace_retry: RetryPolicy::immediate(2),
        append_retry: RetryPolicy::immediate(2),
        ..QueryLogConfig::default()
    };
    let writer = QueryLogWriter::spawn(QueryLog::open(&log_cfg), 16).expect("spawn");

    let backend = Arc::new(ScriptedBackend::default());
    let r = resolver(backend, Arc::new(FailingWeb), fixture_corpus()).with_query_log(writer.sink());
    let q = query("rice turning yellow", Locale::En);

    let first = r.resolve_and_record(&q, &requester());
    writer.flush().expect("flush");
    let second = r.resolve_and_record(&q, &requester());

    assert!(second.signal.storage_degraded);
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.answer.tier, Tier::EnhancedRag);

    let stats = writer.shutdown().expect("shutdown");
    assert_eq!(stats.diagnostics_only, 2);
}

#[test]
fn records_missing_required_fields_surface_in_diagnostics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_cfg = QueryLogConfig {
        path: dir.path().join("user_data.csv"),
        replace_retry: RetryPolicy::immediate(3),
        append_retry: RetryPolicy::immediate(3),
        ..QueryLogConfig::default()
    };
    let writer = QueryLogWriter::spawn(QueryLog::open(&log_cfg), 16).expect("spawn");
    let r = resolver(Arc::new(ScriptedBackend::default()), Arc::new(FailingWeb), fixture_corpus())
        .with_query_log(writer.sink());

    let anonymous = Requester {
        user_contact: String::new(),
        clinic_or_region: " ".to_string(),
    };
    let res = r.resolve_and_record(&query("rice turning yellow", Locale::En), &anonymous);

    assert_eq!(res.answer.tier, Tier::EnhancedRag);
    assert!(res.signal.storage_degraded);
    assert_eq!(writer.health().lost_records(), 1);

    let stats = writer.shutdown().expect("shutdown");
    assert_eq!(stats.replaced + stats.appended, 0);
    assert!(QueryLog::open(&log_cfg).read_all().expect("read").is_empty());
}
