//! Fallback chain that turns a question into exactly one answer.
//!
//! Tiers run strictly in order and none is retried within one resolution:
//! enhanced retrieval, assistant over the reference tables, direct completion, and a
//! static apology that cannot fail.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tia_core::domain::{now_rfc3339_utc, NewLogRecord, Query};
use tia_core::error::AppError;
use tia_core::querylog::{QueryLogSink, SubmitOutcome};
use tracing::{info, warn};

use crate::corpus::CorpusCache;
use crate::evidence::{AggregatedEvidence, EvidenceAggregator};
use crate::llm::ModelBackend;
use crate::prompts;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Tier {
    EnhancedRag,
    AssistantWithCorpus,
    DirectCompletion,
    StaticFallback,
}

impl Tier {
    /// Fixed per tier; never derived from model output.
    pub fn confidence(&self) -> f32 {
        match self {
            Tier::EnhancedRag => 0.98,
            Tier::AssistantWithCorpus => 0.85,
            Tier::DirectCompletion => 0.75,
            Tier::StaticFallback => 0.0,
        }
    }

    pub fn source_label(&self) -> &'static str {
        match self {
            Tier::EnhancedRag => "enhanced_rag",
            Tier::AssistantWithCorpus => "assistant_corpus",
            Tier::DirectCompletion => "direct_completion",
            Tier::StaticFallback => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerMetadata {
    pub local_evidence_count: usize,
    pub web_evidence_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub tier: Tier,
    pub confidence: f32,
    pub source: String,
    pub metadata: AnswerMetadata,
}

/// Per-resolution signal for operator dashboards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionSignal {
    pub tier: Tier,
    pub local_evidence_count: usize,
    pub web_evidence_count: usize,
    pub storage_degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub answer: Answer,
    pub signal: ResolutionSignal,
}

/// Who asked, for the query log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub user_contact: String,
    pub clinic_or_region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolverConfig {
    /// Characters of linearized reference tables handed to the assistant tier.
    #[serde(default = "default_assistant_char_budget")]
    pub assistant_char_budget: usize,
}

fn default_assistant_char_budget() -> usize {
    24_000
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            assistant_char_budget: default_assistant_char_budget(),
        }
    }
}

struct TierContext<'a> {
    query: &'a Query,
    evidence: &'a AggregatedEvidence,
}

type TierHandler = fn(&AnswerResolver, &TierContext<'_>) -> Result<String, AppError>;

const FALLBACK_CHAIN: [(Tier, TierHandler); 3] = [
    (Tier::EnhancedRag, enhanced_rag as TierHandler),
    (Tier::AssistantWithCorpus, assistant_with_corpus as TierHandler),
    (Tier::DirectCompletion, direct_completion as TierHandler),
];

pub struct AnswerResolver {
    aggregator: EvidenceAggregator,
    corpus: Arc<CorpusCache>,
    backend: Arc<dyn ModelBackend>,
    config: ResolverConfig,
    query_log: Option<QueryLogSink>,
}

impl AnswerResolver {
    pub fn new(
        aggregator: EvidenceAggregator,
        corpus: Arc<CorpusCache>,
        backend: Arc<dyn ModelBackend>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            aggregator,
            corpus,
            backend,
            config,
            query_log: None,
        }
    }

    pub fn with_query_log(mut self, sink: QueryLogSink) -> Self {
        self.query_log = Some(sink);
        self
    }

    /// Always produces an answer; the worst case is the static apology.
    pub fn resolve(&self, query: &Query) -> Resolution {
        let evidence = self.aggregator.aggregate(query.text());
        let ctx = TierContext {
            query,
            evidence: &evidence,
        };
        let metadata = AnswerMetadata {
            local_evidence_count: evidence.local_count,
            web_evidence_count: evidence.web_count,
        };

        let mut answered: Option<(Tier, String)> = None;
        for (tier, handler) in FALLBACK_CHAIN.iter() {
            match handler(self, &ctx) {
                Ok(text) if !text.trim().is_empty() => {
                    answered = Some((*tier, text));
                    break;
                }
                Ok(_) => warn!(tier = ?tier, "tier returned empty text; falling through"),
                Err(e) => warn!(
                    tier = ?tier,
                    code = %e.code,
                    kind = ?e.kind(),
                    details = ?e.details,
                    "tier failed; falling through"
                ),
            }
        }
        let (tier, text) = answered.unwrap_or_else(|| {
            (
                Tier::StaticFallback,
                prompts::apology(query.locale()).to_string(),
            )
        });

        info!(
            tier = ?tier,
            local = metadata.local_evidence_count,
            web = metadata.web_evidence_count,
            "query resolved"
        );
        Resolution {
            answer: Answer {
                text,
                tier,
                confidence: tier.confidence(),
                source: tier.source_label().to_string(),
                metadata,
            },
            signal: ResolutionSignal {
                tier,
                local_evidence_count: metadata.local_evidence_count,
                web_evidence_count: metadata.web_evidence_count,
                storage_degraded: self.storage_degraded(),
            },
        }
    }

    /// Resolve, then hand the transaction to the query log. The answer is final before
    /// the record is submitted, so storage trouble never changes it.
    pub fn resolve_and_record(&self, query: &Query, requester: &Requester) -> Resolution {
        let mut resolution = self.resolve(query);
        if self.query_log.is_some() {
            resolution.signal.storage_degraded = self.record(query, requester, &resolution.answer.text);
        }
        resolution
    }

    /// Submit one question/answer pair and report whether storage is degraded. A record
    /// the store would reject still surfaces in diagnostics.
    pub fn record(&self, query: &Query, requester: &Requester, answer_text: &str) -> bool {
        let Some(sink) = self.query_log.as_ref() else {
            return false;
        };
        let record = NewLogRecord {
            user_contact: requester.user_contact.clone(),
            clinic_or_region: requester.clinic_or_region.clone(),
            modality: query.modality(),
            query_text: query.text().to_string(),
            answer_text: answer_text.to_string(),
            created_at: now_rfc3339_utc().unwrap_or_else(|_| query.asked_at().to_string()),
        };
        match record.validate() {
            Ok(()) => {
                if sink.submit(record) == SubmitOutcome::Dropped {
                    warn!("query log submission dropped");
                }
            }
            Err(e) => sink.divert(&record, &e),
        }
        sink.is_degraded()
    }

    fn storage_degraded(&self) -> bool {
        self.query_log.as_ref().map(|s| s.is_degraded()).unwrap_or(false)
    }
}

fn enhanced_rag(resolver: &AnswerResolver, ctx: &TierContext<'_>) -> Result<String, AppError> {
    let payload = prompts::compose(ctx.query, &ctx.evidence.items, ctx.query.locale());
    Ok(resolver.backend.complete(&payload)?.text)
}

fn assistant_with_corpus(resolver: &AnswerResolver, ctx: &TierContext<'_>) -> Result<String, AppError> {
    let corpus = resolver.corpus.get_or_load();
    let reference = corpus.text_within(resolver.config.assistant_char_budget);
    if reference.trim().is_empty() {
        return Err(AppError::evidence_unavailable("Reference tables are empty"));
    }
    let session = resolver.backend.create_assistant_session(&reference)?;
    let turn = prompts::assistant_turn(&session.context, ctx.query, ctx.query.locale());
    let result = resolver.backend.run_assistant_turn(&session, &turn);
    resolver.backend.close_assistant_session(session);
    result
}

fn direct_completion(resolver: &AnswerResolver, ctx: &TierContext<'_>) -> Result<String, AppError> {
    let payload = prompts::direct_completion(ctx.query, ctx.query.locale());
    Ok(resolver.backend.complete(&payload)?.text)
}
