pub mod codec;
pub mod counts;
pub mod error;
pub mod metrics;
pub mod scan;
pub mod scores;
pub mod stream;
pub mod validate;

/// PubMed identifier of a citation.
pub type DocId = u32;
/// Identifier of a MeSH term or journal feature, dense in `[0, num_features)`.
pub type FeatureId = u32;
/// Record completion date as a YYYYMMDD integer, e.g. 20050102.
pub type Date = u32;

pub use counts::{count_features, FeatureCounts};
pub use error::{Error, Result};
pub use metrics::PerformanceStats;
pub use scan::{scan, ScanConfig, ScoredDoc};
pub use scores::{FeatureScores, Smoothing, TrainConfig};
pub use stream::{FeatureIndexReader, FeatureIndexWriter, Record};
pub use validate::{cross_validate, CrossValidation, ValidationConfig};
