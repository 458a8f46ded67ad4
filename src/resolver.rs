use tracing::{debug, warn};

use crate::catalog::CatalogApi;
use crate::error::Result;
use crate::web_scraper::ChartEntry;

/// Outcome of resolving a chart against the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Track URIs in chart order.
    pub uris: Vec<String>,
    /// Entries the catalog had no match for.
    pub not_found: Vec<ChartEntry>,
}

/// Searches every entry in order and keeps the first hit of each.
///
/// Entries without a hit are skipped; a failed search aborts the whole batch.
pub async fn resolve_tracks(catalog: &dyn CatalogApi, entries: &[ChartEntry]) -> Result<Resolution> {
    let mut resolution = Resolution::default();

    for entry in entries {
        let query = entry.search_query();
        match catalog.search_track(&query).await? {
            Some(uri) => {
                debug!("Resolved '{}' to {}", query, uri);
                resolution.uris.push(uri);
            }
            None => {
                warn!("No catalog match for '{}' by '{}'", entry.title, entry.artist);
                resolution.not_found.push(entry.clone());
            }
        }
    }

    Ok(resolution)
}
