pub mod aggregate;
pub mod model;
pub mod rank;

pub use aggregate::{EvidenceAggregator, EvidenceConfig};
pub use model::{AggregatedEvidence, EvidenceItem, EvidenceOrigin, EvidenceSource};
