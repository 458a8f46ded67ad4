use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Rank text of the last chart row worth collecting. Best effort only: if the
/// page never shows it, every row is collected.
const LAST_RANK: &str = "20";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartEntry {
    pub title: String,
    pub artist: String,
}

impl ChartEntry {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        ChartEntry {
            title: title.into(),
            artist: artist.into(),
        }
    }

    /// Free-text catalog query for this entry.
    pub fn search_query(&self) -> String {
        format!("{} {}", self.title, self.artist)
    }
}

#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ChartEntry>>;
}

/// Scrapes the weekly chart page over plain HTTP.
pub struct EskaChart {
    client: reqwest::Client,
    url: String,
}

impl EskaChart {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        Ok(EskaChart {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ChartSource for EskaChart {
    async fn fetch(&self) -> Result<Vec<ChartEntry>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?;

        let songs = parse_chart(&body)?;
        debug!("Scraped {} chart entries from {}", songs.len(), self.url);
        Ok(songs)
    }
}

pub fn parse_chart(html: &str) -> Result<Vec<ChartEntry>> {
    let document = Html::parse_document(html);
    let row_selector = selector("div.single-hit")?;
    let position_selector = selector(".single-hit__position")?;

    let mut songs = Vec::new();

    for element in document.select(&row_selector) {
        // promoted radio slots share the row markup
        if has_class(element, "radio--hook") {
            continue;
        }

        let mut title = String::new();
        let mut artists = Vec::new();

        for info in child_elements(element).filter(|e| has_class(*e, "single-hit__info")) {
            for child in child_elements(info) {
                if has_class(child, "single-hit__title") {
                    title.push_str(&child.text().collect::<String>());
                } else if child.value().name() == "ul" {
                    artists.extend(
                        child_elements(child).map(|artist| artist.text().collect::<String>().trim().to_string()),
                    );
                }
            }
        }

        let title = title.trim().to_string();
        let artist = artists.join(" ").trim().to_string();

        if !title.is_empty() || !artist.is_empty() {
            songs.push(ChartEntry::new(title, artist));
        }

        let position: String = element
            .select(&position_selector)
            .flat_map(|p| p.text())
            .collect();
        if position.trim() == LAST_RANK {
            break;
        }
    }

    Ok(songs)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| SyncError::Fetch(format!("bad selector {}: {}", css, e)))
}

fn child_elements(element: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    element.children().filter_map(ElementRef::wrap)
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}
