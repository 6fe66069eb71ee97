pub mod config;
pub mod dedup;
pub mod document;
pub mod error;
pub mod harvest;
pub mod logging;
pub mod resilience;
pub mod search;
pub mod sources;

pub use config::Config;
pub use dedup::{ClusterPolicy, DedupReport, Deduplicator, DuplicateClassifier, RuleTable};
pub use document::{Doi, Document, DocumentId, Source};
pub use error::{Error, ErrorCategory, Result};
pub use harvest::{HarvestOutcome, HarvestReport, Harvester, SourceStatus};
pub use resilience::{RateLimiter, RetryConfig, RetryPolicy};
pub use search::{Search, SearchResults};
pub use sources::{build_sources, MemorySource, SourceAdapter};
