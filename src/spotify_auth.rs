use std::sync::Arc;

use chrono::{DateTime, Utc};
use rspotify::{scopes, AuthCodeSpotify, Credentials, OAuth, Token};
use tracing::warn;

use crate::config::SpotifyConfig;
use crate::store::{JsonStore, StoreError, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY};

/// Builds the API client. Token caching and auto-refresh stay off: the
/// session is persisted explicitly through [`TokenStore`].
pub fn build_client(config: &SpotifyConfig) -> AuthCodeSpotify {
    let scopes = scopes!(
        "playlist-read-private",
        "playlist-modify-public",
        "playlist-modify-private"
    );

    let oauth = OAuth {
        scopes,
        redirect_uri: config.redirect_uri.clone(),
        ..Default::default()
    };

    let creds = Credentials::new(config.client_id.as_str(), config.client_secret.as_str());

    let spotify_config = rspotify::Config {
        token_cached: false,
        token_refreshing: false,
        ..Default::default()
    };

    AuthCodeSpotify::with_config(creds, oauth, spotify_config)
}

/// Persists the OAuth session in the key-value store.
#[derive(Debug, Clone)]
pub struct TokenStore {
    store: Arc<JsonStore>,
}

impl TokenStore {
    pub fn new(store: Arc<JsonStore>) -> Self {
        TokenStore { store }
    }

    pub fn load(&self) -> Option<Token> {
        let access_token = self.store.get(ACCESS_TOKEN_KEY)?;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY);

        let expires_at = self.store.get(EXPIRES_AT_KEY).and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => Some(at.with_timezone(&Utc)),
                Err(e) => {
                    warn!("Ignoring stored token expiry '{}': {}", raw, e);
                    None
                }
            }
        });

        Some(Token {
            access_token,
            refresh_token,
            expires_in: expires_at
                .map(|at| at - Utc::now())
                .unwrap_or_else(chrono::Duration::zero),
            expires_at,
            ..Default::default()
        })
    }

    pub fn save(&self, token: &Token) -> Result<(), StoreError> {
        self.store.set(ACCESS_TOKEN_KEY, &token.access_token)?;

        // refreshes may omit the refresh token, the old one stays valid
        if let Some(refresh) = &token.refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, refresh)?;
        }

        match token.expires_at {
            Some(at) => self.store.set(EXPIRES_AT_KEY, &at.to_rfc3339()),
            None => self.store.remove(EXPIRES_AT_KEY),
        }
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)?;
        self.store.remove(EXPIRES_AT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token_store() -> (tempfile::TempDir, TokenStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path().join("data.json")).unwrap();
        (dir, TokenStore::new(Arc::new(store)))
    }

    #[test]
    fn empty_store_has_no_session() {
        let (_dir, tokens) = token_store();
        assert!(tokens.load().is_none());
    }

    #[test]
    fn saved_token_is_restored() {
        let (_dir, tokens) = token_store();
        let expires_at = Utc::now() + Duration::minutes(50);
        let token = Token {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Some(expires_at),
            ..Default::default()
        };

        tokens.save(&token).unwrap();
        let restored = tokens.load().unwrap();

        assert_eq!(restored.access_token, "access");
        assert_eq!(restored.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(restored.expires_at.map(|at| at.timestamp()), Some(expires_at.timestamp()));
    }

    #[test]
    fn refresh_without_new_refresh_token_keeps_the_old_one() {
        let (_dir, tokens) = token_store();
        tokens
            .save(&Token {
                access_token: "first".to_string(),
                refresh_token: Some("refresh".to_string()),
                ..Default::default()
            })
            .unwrap();
        tokens
            .save(&Token {
                access_token: "second".to_string(),
                refresh_token: None,
                ..Default::default()
            })
            .unwrap();

        let restored = tokens.load().unwrap();
        assert_eq!(restored.access_token, "second");
        assert_eq!(restored.refresh_token.as_deref(), Some("refresh"));
    }

    #[test]
    fn clear_forgets_the_session() {
        let (_dir, tokens) = token_store();
        tokens
            .save(&Token {
                access_token: "access".to_string(),
                ..Default::default()
            })
            .unwrap();

        tokens.clear().unwrap();
        assert!(tokens.load().is_none());
    }
}
