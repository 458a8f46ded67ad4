use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use rspotify::model::{PlayableId, PlaylistId, SearchResult, SearchType, SimplifiedPlaylist, TrackId};
use rspotify::prelude::*;
use rspotify::{AuthCodeSpotify, ClientError, Token};
use tracing::{debug, info};

use crate::catalog::{CatalogApi, PlaylistSummary, Session, UserProfile};
use crate::error::{Result, SyncError};
use crate::spotify_auth::TokenStore;

/// Tracks per replace/add request accepted by the Web API.
const MAX_ITEMS_PER_REQUEST: usize = 100;

/// Tokens closer than this to expiry are refreshed before a cycle.
const REFRESH_MARGIN_SECS: i64 = 300;

pub struct SpotifyCatalog {
    client: AuthCodeSpotify,
    tokens: TokenStore,
    timeout: Duration,
}

impl SpotifyCatalog {
    pub fn new(client: AuthCodeSpotify, tokens: TokenStore, timeout: Duration) -> Self {
        SpotifyCatalog {
            client,
            tokens,
            timeout,
        }
    }

    /// Installs the persisted session, if any. Returns whether one was found.
    pub async fn restore_session(&self) -> Result<bool> {
        let Some(token) = self.tokens.load() else {
            return Ok(false);
        };
        self.set_token(Some(token)).await?;
        info!("Resumed stored session");
        Ok(true)
    }

    async fn current_token(&self) -> Result<Option<Token>> {
        let guard = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| SyncError::Auth("token lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    async fn set_token(&self, token: Option<Token>) -> Result<()> {
        let mut guard = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| SyncError::Auth("token lock poisoned".to_string()))?;
        *guard = token;
        Ok(())
    }

    async fn persist_current_token(&self) -> Result<()> {
        match self.current_token().await? {
            Some(token) => Ok(self.tokens.save(&token)?),
            None => Err(SyncError::Auth("no token after authorization".to_string())),
        }
    }
}

/// Runs a remote call under the per-call timeout, mapping both failure kinds
/// into the caller's error category.
async fn bounded<T, F>(limit: Duration, call: F, category: fn(String) -> SyncError) -> Result<T>
where
    F: Future<Output = std::result::Result<T, ClientError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(|e| category(e.to_string())),
        Err(_) => Err(category(format!("no response within {:?}", limit))),
    }
}

fn playlist_id(id: &str) -> Result<PlaylistId<'_>> {
    PlaylistId::from_id_or_uri(id).map_err(|e| SyncError::RemoteWrite(format!("bad playlist id '{}': {}", id, e)))
}

/// Splits a full overwrite into the replacing batch and the batches appended
/// after it, each at most `size` items long.
fn plan_batches<T: Clone>(items: &[T], size: usize) -> (Vec<T>, Vec<Vec<T>>) {
    let mut chunks = items.chunks(size.max(1));
    let first = chunks.next().map(<[T]>::to_vec).unwrap_or_default();
    (first, chunks.map(<[T]>::to_vec).collect())
}

fn summarize(playlist: SimplifiedPlaylist) -> PlaylistSummary {
    PlaylistSummary {
        id: playlist.id.id().to_string(),
        name: playlist.name,
        track_count: playlist.tracks.total,
    }
}

#[async_trait]
impl Session for SpotifyCatalog {
    fn authorize_url(&self) -> Result<String> {
        self.client
            .get_authorize_url(false)
            .map_err(|e| SyncError::Auth(e.to_string()))
    }

    async fn login(&self, code: &str) -> Result<()> {
        bounded(self.timeout, self.client.request_token(code.trim()), SyncError::Auth).await?;
        self.persist_current_token().await?;
        info!("Signed in, session stored");
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.set_token(None).await?;
        self.tokens.clear()?;
        info!("Signed out, session cleared");
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        matches!(self.current_token().await, Ok(Some(token)) if !token.access_token.is_empty())
    }
}

#[async_trait]
impl CatalogApi for SpotifyCatalog {
    async fn ensure_fresh_session(&self) -> Result<bool> {
        let Some(token) = self.current_token().await? else {
            return Ok(false);
        };
        if token.access_token.is_empty() {
            return Ok(false);
        }

        let expiring = token
            .expires_at
            .map(|at| (at - Utc::now()).num_seconds() < REFRESH_MARGIN_SECS)
            .unwrap_or(false);

        if expiring {
            debug!("Access token close to expiry, refreshing");
            bounded(self.timeout, self.client.refresh_token(), SyncError::Auth).await?;
            self.persist_current_token().await?;
            info!("Access token refreshed");
        }

        Ok(true)
    }

    async fn search_track(&self, query: &str) -> Result<Option<String>> {
        let result = bounded(
            self.timeout,
            self.client.search(query, SearchType::Track, None, None, Some(1), None),
            SyncError::Resolution,
        )
        .await?;

        match result {
            SearchResult::Tracks(page) => Ok(page
                .items
                .into_iter()
                .next()
                .and_then(|track| track.id)
                .map(|id| id.uri())),
            _ => Ok(None),
        }
    }

    async fn replace_playlist_tracks(&self, playlist: &str, uris: &[String]) -> Result<()> {
        let ids = uris
            .iter()
            .map(|uri| {
                TrackId::from_id_or_uri(uri)
                    .map(|id| PlayableId::Track(id.into_static()))
                    .map_err(|e| SyncError::RemoteWrite(format!("bad track uri '{}': {}", uri, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        // first request replaces, an empty chart empties the playlist
        let (first, rest) = plan_batches(&ids, MAX_ITEMS_PER_REQUEST);
        bounded(
            self.timeout,
            self.client.playlist_replace_items(playlist_id(playlist)?, first),
            SyncError::RemoteWrite,
        )
        .await?;

        for batch in rest {
            debug!("Appending batch of {} tracks", batch.len());
            bounded(
                self.timeout,
                self.client.playlist_add_items(playlist_id(playlist)?, batch, None),
                SyncError::RemoteWrite,
            )
            .await?;
        }

        Ok(())
    }

    async fn set_playlist_description(&self, playlist: &str, description: &str) -> Result<()> {
        bounded(
            self.timeout,
            self.client
                .playlist_change_detail(playlist_id(playlist)?, None, None, Some(description), None),
            SyncError::RemoteWrite,
        )
        .await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<UserProfile> {
        let user = bounded(self.timeout, self.client.current_user(), SyncError::Auth).await?;
        Ok(UserProfile {
            id: user.id.id().to_string(),
            display_name: user.display_name,
        })
    }

    async fn user_playlists(&self) -> Result<Vec<PlaylistSummary>> {
        let user = self.current_user().await?;

        let playlists: Vec<SimplifiedPlaylist> = bounded(
            self.timeout,
            self.client.current_user_playlists().try_collect(),
            SyncError::Auth,
        )
        .await?;

        Ok(playlists
            .into_iter()
            .filter(|playlist| playlist.owner.id.id() == user.id)
            .map(summarize)
            .collect())
    }
}
