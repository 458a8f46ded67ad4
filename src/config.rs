use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_CHART_URL: &str = "https://www.eska.pl/goraca20/";
pub const DEFAULT_DESCRIPTION: &str = "Radio ESKA 🎵 Zautomatyzowana playlista z piosenkami z Gorącej 20. Następna aktualizacja za {next} minut, ostatnia aktualizacja {last} minut temu.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("CHART_URL is not a valid URL: {0}")]
    ChartUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub spotify: SpotifyConfig,
    pub bind_address: String,
    pub port: u16,
    pub chart_url: Url,
    /// Minutes between chart polls.
    pub update_interval_minutes: i64,
    pub tick: Duration,
    pub request_timeout: Duration,
    pub data_file: PathBuf,
    pub description: DescriptionTemplate,
    pub open_browser: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = get("CLIENT_ID").ok_or(ConfigError::Missing("CLIENT_ID"))?;
        let client_secret = get("CLIENT_SECRET").ok_or(ConfigError::Missing("CLIENT_SECRET"))?;

        let port = parse_or(get("PORT"), "PORT", 88u16)?;
        let redirect_uri =
            get("REDIRECT").unwrap_or_else(|| format!("http://localhost:{}/callback", port));

        let chart_url = Url::parse(get("CHART_URL").as_deref().unwrap_or(DEFAULT_CHART_URL))?;

        let update_interval_minutes = parse_or(get("UPDATE_INTERVAL"), "UPDATE_INTERVAL", 10i64)?;
        if update_interval_minutes < 1 {
            return Err(ConfigError::Invalid {
                key: "UPDATE_INTERVAL",
                value: update_interval_minutes.to_string(),
            });
        }

        let tick_seconds = parse_or(get("TICK_SECONDS"), "TICK_SECONDS", 60u64)?;
        if tick_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "TICK_SECONDS",
                value: "0".to_string(),
            });
        }

        let timeout_seconds = parse_or(get("REQUEST_TIMEOUT_SECS"), "REQUEST_TIMEOUT_SECS", 30u64)?;

        Ok(Config {
            spotify: SpotifyConfig {
                client_id,
                client_secret,
                redirect_uri,
            },
            bind_address: get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            chart_url,
            update_interval_minutes,
            tick: Duration::from_secs(tick_seconds),
            request_timeout: Duration::from_secs(timeout_seconds),
            data_file: get("DATA_FILE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data.json")),
            description: DescriptionTemplate::new(
                get("DESCRIPTION").unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            ),
            open_browser: parse_or(get("OPEN_BROWSER"), "OPEN_BROWSER", false)?,
        })
    }

    /// Number of loop ticks between two chart polls, at least one.
    pub fn poll_every_ticks(&self) -> u32 {
        let interval = (self.update_interval_minutes.max(1) as u64).saturating_mul(60);
        (interval / self.tick.as_secs().max(1)).clamp(1, u32::MAX as u64) as u32
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
    }
}

/// Playlist description with `{next}` and `{last}` placeholders, filled with
/// the minutes until the next poll and since the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionTemplate(String);

impl DescriptionTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        DescriptionTemplate(template.into())
    }

    pub fn render(&self, last_minutes: i64, next_minutes: i64) -> String {
        self.0
            .replace("{next}", &next_minutes.to_string())
            .replace("{last}", &last_minutes.to_string())
    }
}

impl Default for DescriptionTemplate {
    fn default() -> Self {
        DescriptionTemplate::new(DEFAULT_DESCRIPTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_follow_the_eska_setup() {
        let config = Config::from_lookup(lookup(&[("CLIENT_ID", "id"), ("CLIENT_SECRET", "secret")])).unwrap();

        assert_eq!(config.port, 88);
        assert_eq!(config.spotify.redirect_uri, "http://localhost:88/callback");
        assert_eq!(config.chart_url.as_str(), DEFAULT_CHART_URL);
        assert_eq!(config.update_interval_minutes, 10);
        assert_eq!(config.tick, Duration::from_secs(60));
        assert_eq!(config.poll_every_ticks(), 10);
        assert!(!config.open_browser);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = Config::from_lookup(lookup(&[("CLIENT_ID", "id")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CLIENT_SECRET")));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("UPDATE_INTERVAL", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "UPDATE_INTERVAL", .. }));
    }

    #[test]
    fn poll_cadence_never_drops_below_one_tick() {
        let config = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("UPDATE_INTERVAL", "1"),
            ("TICK_SECONDS", "300"),
        ]))
        .unwrap();
        assert_eq!(config.poll_every_ticks(), 1);
    }

    #[test]
    fn huge_update_interval_saturates() {
        let config = Config::from_lookup(lookup(&[
            ("CLIENT_ID", "id"),
            ("CLIENT_SECRET", "secret"),
            ("UPDATE_INTERVAL", "9223372036854775807"),
        ]))
        .unwrap();
        assert_eq!(config.poll_every_ticks(), u32::MAX);
    }

    #[test]
    fn template_fills_both_placeholders() {
        let template = DescriptionTemplate::new("next in {next}, last {last} ago");
        assert_eq!(template.render(3, 7), "next in 7, last 3 ago");
        assert_eq!(template.render(15, -5), "next in -5, last 15 ago");
    }
}
