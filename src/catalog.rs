use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub track_count: u32,
}

/// Remote catalog and playlist operations the sync loop depends on.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Refreshes the access token when it is about to expire.
    /// Returns `false` when there is no session at all.
    async fn ensure_fresh_session(&self) -> Result<bool>;

    /// URI of the first track matching a free-text query, if any.
    async fn search_track(&self, query: &str) -> Result<Option<String>>;

    /// Overwrites the playlist with exactly `uris`, in order.
    async fn replace_playlist_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()>;

    async fn set_playlist_description(&self, playlist_id: &str, description: &str) -> Result<()>;

    async fn current_user(&self) -> Result<UserProfile>;

    /// Playlists owned by the current user.
    async fn user_playlists(&self) -> Result<Vec<PlaylistSummary>>;
}

/// Sign-in state behind the login routes.
#[async_trait]
pub trait Session: Send + Sync {
    fn authorize_url(&self) -> Result<String>;

    /// Exchanges an authorization code and keeps the resulting session.
    async fn login(&self, code: &str) -> Result<()>;

    async fn logout(&self) -> Result<()>;

    async fn is_authenticated(&self) -> bool;
}
