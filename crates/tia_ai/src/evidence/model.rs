use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    LocalKb,
    SupplementaryCorpus,
    Web,
}

impl EvidenceSource {
    /// Tie-break rank when relevance is equal; lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            EvidenceSource::LocalKb => 0,
            EvidenceSource::SupplementaryCorpus => 1,
            EvidenceSource::Web => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceOrigin {
    KbEntry { id: u32 },
    CorpusRow { file: String, row: u32 },
    Url { url: String },
}

/// A scored snippet offered as grounding context. Request-scoped, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub source: EvidenceSource,
    pub content: String,
    /// In `[0, 1]`.
    pub relevance: f32,
    pub origin: EvidenceOrigin,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregatedEvidence {
    pub items: Vec<EvidenceItem>,
    pub local_count: usize,
    pub web_count: usize,
    pub corpus_count: usize,
}
