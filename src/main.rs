mod catalog;
mod config;
mod error;
mod http;
mod resolver;
mod scheduler;
mod spotify;
mod spotify_auth;
mod store;
mod sync;
mod web_scraper;

use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::scheduler::LoopController;
use crate::spotify::SpotifyCatalog;
use crate::spotify_auth::{build_client, TokenStore};
use crate::store::JsonStore;
use crate::sync::PlaylistSynchronizer;
use crate::web_scraper::EskaChart;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,goraca20_sync=debug")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;

    let store = Arc::new(
        JsonStore::open(&config.data_file)
            .with_context(|| format!("cannot open store {:?}", config.data_file))?,
    );
    info!("Store loaded from {:?}", store.path());

    let spotify = Arc::new(SpotifyCatalog::new(
        build_client(&config.spotify),
        TokenStore::new(store.clone()),
        config.request_timeout,
    ));
    let signed_in = spotify.restore_session().await?;

    let chart = Arc::new(EskaChart::new(config.chart_url.as_str(), config.request_timeout)?);
    let synchronizer = PlaylistSynchronizer::new(
        chart,
        spotify.clone(),
        config.description.clone(),
        config.update_interval_minutes,
    );

    let controller = LoopController::new(
        synchronizer,
        spotify.clone(),
        store.clone(),
        config.tick,
        config.poll_every_ticks(),
    );

    let server = http::start_server(
        config.bind_address.clone(),
        config.port,
        controller.clone(),
        spotify.clone(),
        spotify.clone(),
    );

    if !signed_in {
        let login_url = format!("http://localhost:{}/login", config.port);
        info!("No stored session, sign in at {}", login_url);
        if config.open_browser && webbrowser::open(&login_url).is_err() {
            warn!("Failed to open a browser, please visit {} manually", login_url);
        }
    }

    controller.start();

    server.await.context("HTTP server task failed")?;
    Ok(())
}
