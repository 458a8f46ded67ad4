use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::catalog::CatalogApi;
use crate::config::DescriptionTemplate;
use crate::error::{Result, SyncError};
use crate::resolver::resolve_tracks;
use crate::web_scraper::{ChartEntry, ChartSource};

/// Canonical serialization of a chart, used only for change detection.
pub fn fingerprint(entries: &[ChartEntry]) -> Result<String> {
    serde_json::to_string(entries).map_err(|e| SyncError::Fetch(format!("cannot serialize chart: {}", e)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    NoPlaylist,
    Unchanged,
    Updated { resolved: usize, total: usize },
}

/// Minutes since the last poll and minutes until the next one.
///
/// `remaining` goes negative when a poll is overdue.
pub fn update_timing(last_sync: DateTime<Utc>, now: DateTime<Utc>, interval_minutes: i64) -> (i64, i64) {
    let elapsed = (now - last_sync).num_seconds().div_euclid(60);
    (elapsed, interval_minutes.saturating_sub(elapsed))
}

/// Keeps one playlist in step with the chart.
pub struct PlaylistSynchronizer {
    chart: Arc<dyn ChartSource>,
    catalog: Arc<dyn CatalogApi>,
    template: DescriptionTemplate,
    update_interval_minutes: i64,
    /// Playlist and chart fingerprint of the last committed write.
    last_written: Option<(String, String)>,
    last_sync: Option<DateTime<Utc>>,
}

impl PlaylistSynchronizer {
    pub fn new(
        chart: Arc<dyn ChartSource>,
        catalog: Arc<dyn CatalogApi>,
        template: DescriptionTemplate,
        update_interval_minutes: i64,
    ) -> Self {
        PlaylistSynchronizer {
            chart,
            catalog,
            template,
            update_interval_minutes,
            last_written: None,
            last_sync: None,
        }
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    #[cfg(test)]
    pub fn fingerprint(&self) -> Option<&str> {
        self.last_written.as_ref().map(|(_, f)| f.as_str())
    }

    /// Polls the chart and rewrites the playlist when the chart moved.
    ///
    /// On error nothing is remembered, so the next call starts over.
    pub async fn sync(&mut self, playlist_id: Option<&str>, now: DateTime<Utc>) -> Result<SyncOutcome> {
        let Some(playlist_id) = playlist_id else {
            return Ok(SyncOutcome::NoPlaylist);
        };

        let songs = self.chart.fetch().await?;
        let current = fingerprint(&songs)?;

        let unchanged = matches!(
            &self.last_written,
            Some((written_to, known)) if written_to == playlist_id && *known == current
        );
        if unchanged {
            debug!("Chart unchanged, {} entries", songs.len());
            self.last_sync = Some(now);
            return Ok(SyncOutcome::Unchanged);
        }

        let resolution = resolve_tracks(self.catalog.as_ref(), &songs).await?;
        self.catalog
            .replace_playlist_tracks(playlist_id, &resolution.uris)
            .await?;

        info!(
            "Playlist {} updated with {} tracks, {} chart entries not found",
            playlist_id,
            resolution.uris.len(),
            resolution.not_found.len()
        );

        self.last_written = Some((playlist_id.to_string(), current));
        self.last_sync = Some(now);

        Ok(SyncOutcome::Updated {
            resolved: resolution.uris.len(),
            total: songs.len(),
        })
    }

    /// Pushes the freshness text to the playlist description.
    /// Returns `false` when there was nothing to describe yet.
    pub async fn update_description(&self, playlist_id: Option<&str>, now: DateTime<Utc>) -> Result<bool> {
        let (Some(playlist_id), Some(last_sync)) = (playlist_id, self.last_sync) else {
            return Ok(false);
        };

        let (elapsed, remaining) = update_timing(last_sync, now, self.update_interval_minutes);
        let description = self.template.render(elapsed, remaining);

        self.catalog
            .set_playlist_description(playlist_id, &description)
            .await?;
        debug!("Description of {} set: {}", playlist_id, description);
        Ok(true)
    }
}
