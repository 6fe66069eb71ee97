//! Source adapters: one per external literature provider, all behind
//! [`SourceAdapter`].

pub mod arxiv;
pub mod core_ac;
pub mod crossref;
pub mod http;
pub mod memory;
pub mod openalex;
pub mod traits;

pub use arxiv::ArxivSource;
pub use core_ac::CoreSource;
pub use crossref::CrossrefSource;
pub use memory::MemorySource;
pub use openalex::OpenAlexSource;
pub use traits::{Page, PageCursor, ProviderError, SourceAdapter};

use crate::config::Config;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Names accepted by [`build_sources`]
pub const SOURCE_NAMES: [&str; 4] = ["crossref", "openalex", "arxiv", "core"];

/// Build the adapters to harvest from.
///
/// With an empty `names` every enabled provider is used, in configuration
/// order. Explicitly named providers are built even when disabled.
pub fn build_sources(config: &Config, names: &[String]) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    let selected: Vec<&str> = if names.is_empty() {
        config
            .sources
            .entries()
            .into_iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(name, _)| name)
            .collect()
    } else {
        names.iter().map(|name| name.trim()).collect()
    };

    for name in selected {
        let http = &config.http;
        let adapter: Arc<dyn SourceAdapter> = match name.to_ascii_lowercase().as_str() {
            "crossref" => Arc::new(CrossrefSource::new(http, config.sources.crossref.clone())?),
            "openalex" => Arc::new(OpenAlexSource::new(http, config.sources.openalex.clone())?),
            "arxiv" => Arc::new(ArxivSource::new(http, config.sources.arxiv.clone())?),
            "core" => Arc::new(CoreSource::new(http, config.sources.core.clone())?),
            other => {
                return Err(Error::InvalidInput {
                    field: "source".to_string(),
                    reason: format!("unknown source '{other}', expected one of {SOURCE_NAMES:?}"),
                })
            }
        };
        sources.push(adapter);
    }

    info!(
        "Built {} source adapters: {:?}",
        sources.len(),
        sources.iter().map(|s| s.source().to_string()).collect::<Vec<_>>()
    );

    Ok(sources)
}
