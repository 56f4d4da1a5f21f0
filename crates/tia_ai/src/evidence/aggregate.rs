use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::model::{AggregatedEvidence, EvidenceItem, EvidenceOrigin, EvidenceSource};
use super::rank::{clamp_relevance, sort_evidence, token_overlap};
use crate::corpus::{CorpusCache, SupplementaryCorpus};
use crate::knowledge::KnowledgeStore;
use crate::web::WebEvidenceProvider;

const DEFAULT_WEB_RELEVANCE: f32 = 0.6;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceConfig {
    #[serde(default = "default_local_top_k")]
    pub local_top_k: usize,
    #[serde(default = "default_web_top_k")]
    pub web_top_k: usize,
    #[serde(default = "default_corpus_top_k")]
    pub corpus_top_k: usize,
    /// Upper bound on characters of corpus text offered as evidence.
    #[serde(default = "default_corpus_char_budget")]
    pub corpus_char_budget: usize,
    /// Scores at or below this are discarded.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    #[serde(default = "default_web_timeout_ms")]
    pub web_timeout_ms: u64,
}

fn default_local_top_k() -> usize {
    3
}

fn default_web_top_k() -> usize {
    2
}

fn default_corpus_top_k() -> usize {
    3
}

fn default_corpus_char_budget() -> usize {
    6_000
}

fn default_min_relevance() -> f32 {
    0.1
}

fn default_web_timeout_ms() -> u64 {
    4_000
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            local_top_k: default_local_top_k(),
            web_top_k: default_web_top_k(),
            corpus_top_k: default_corpus_top_k(),
            corpus_char_budget: default_corpus_char_budget(),
            min_relevance: default_min_relevance(),
            web_timeout_ms: default_web_timeout_ms(),
        }
    }
}

/// Blends the field guide, web snippets and reference tables into one ranked list.
#[derive(Clone)]
pub struct EvidenceAggregator {
    knowledge: Arc<KnowledgeStore>,
    web: Arc<dyn WebEvidenceProvider>,
    corpus: Arc<CorpusCache>,
    config: EvidenceConfig,
}

impl EvidenceAggregator {
    pub fn new(
        knowledge: Arc<KnowledgeStore>,
        web: Arc<dyn WebEvidenceProvider>,
        corpus: Arc<CorpusCache>,
        config: EvidenceConfig,
    ) -> Self {
        Self {
            knowledge,
            web,
            corpus,
            config,
        }
    }

    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    /// Never fails: every source that errors contributes nothing.
    pub fn aggregate(&self, query: &str) -> AggregatedEvidence {
        let local = self.rank_local(query);
        let web = self.search_web(query);
        let corpus = self.rank_corpus(query, &self.corpus.get_or_load());

        let (local_count, web_count, corpus_count) = (local.len(), web.len(), corpus.len());
        let mut items = Vec::with_capacity(local_count + web_count + corpus_count);
        items.extend(local);
        items.extend(corpus);
        items.extend(web);
        sort_evidence(&mut items);

        debug!(local_count, web_count, corpus_count, "evidence aggregated");
        AggregatedEvidence {
            items,
            local_count,
            web_count,
            corpus_count,
        }
    }

    fn rank_local(&self, query: &str) -> Vec<EvidenceItem> {
        let mut scored: Vec<EvidenceItem> = self
            .knowledge
            .entries()
            .iter()
            .map(|entry| EvidenceItem {
                source: EvidenceSource::LocalKb,
                content: format!("{}: {}", entry.topic, entry.content),
                relevance: token_overlap(query, &entry.searchable_text()),
                origin: EvidenceOrigin::KbEntry { id: entry.id },
            })
            .filter(|item| item.relevance > self.config.min_relevance)
            .collect();
        sort_evidence(&mut scored);
        scored.truncate(self.config.local_top_k);
        scored
    }

    fn search_web(&self, query: &str) -> Vec<EvidenceItem> {
        if self.config.web_top_k == 0 {
            return Vec::new();
        }
        let snippets = match self.web.search(query, self.config.web_top_k) {
            Ok(s) => s,
            Err(e) => {
                warn!(code = %e.code, details = ?e.details, "web evidence unavailable");
                return Vec::new();
            }
        };
        snippets
            .into_iter()
            .filter(|s| !(s.title.trim().is_empty() && s.snippet.trim().is_empty()))
            .take(self.config.web_top_k)
            .map(|s| EvidenceItem {
                source: EvidenceSource::Web,
                content: format!("{}: {}", s.title.trim(), s.snippet.trim()),
                relevance: clamp_relevance(s.relevance.unwrap_or(DEFAULT_WEB_RELEVANCE)),
                origin: EvidenceOrigin::Url { url: s.url },
            })
            .collect()
    }

    fn rank_corpus(&self, query: &str, corpus: &SupplementaryCorpus) -> Vec<EvidenceItem> {
        let mut scored: Vec<EvidenceItem> = corpus
            .rows
            .iter()
            .map(|row| EvidenceItem {
                source: EvidenceSource::SupplementaryCorpus,
                content: row.fields
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join("; "),
                relevance: token_overlap(query, &row.searchable_text()),
                origin: EvidenceOrigin::CorpusRow {
                    file: row.file.clone(),
                    row: row.row,
                },
            })
            .filter(|item| item.relevance > self.config.min_relevance)
            .collect();
        sort_evidence(&mut scored);

        let mut budget = self.config.corpus_char_budget;
        let mut out = Vec::new();
        for mut item in scored.into_iter().take(self.config.corpus_top_k) {
            if budget == 0 {
                break;
            }
            let len = item.content.chars().count();
            if len > budget {
                item.content = item.content.chars().take(budget).collect();
            }
            budget = budget.saturating_sub(len);
            out.push(item);
        }
        out
    }
}
