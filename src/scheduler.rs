use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::catalog::CatalogApi;
use crate::error::{ErrorInfo, Result, SyncError};
use crate::store::{JsonStore, PLAYLIST_ID_KEY};
use crate::sync::{PlaylistSynchronizer, SyncOutcome};

/// What the control surface may read about the loop. Stale reads are fine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStatus {
    pub last_update: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorInfo>,
    pub playlist_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    NotAuthenticated,
    Ran {
        polled: Option<SyncOutcome>,
        described: bool,
    },
    Failed(ErrorInfo),
}

/// State only ever touched by the cycle currently holding the lock.
struct CycleState {
    synchronizer: PlaylistSynchronizer,
    ticks_since_poll: u32,
}

struct Shared {
    cycle: Mutex<CycleState>,
    status: RwLock<LoopStatus>,
    catalog: Arc<dyn CatalogApi>,
    store: Arc<JsonStore>,
    trigger: Notify,
    started: AtomicBool,
    tick: Duration,
    poll_every_ticks: u32,
}

/// Drives sync cycles on a fixed tick and on demand, one at a time.
///
/// Cycles are serialized by the cycle lock: a trigger that arrives while a
/// cycle runs is remembered and served right after it, never alongside it.
#[derive(Clone)]
pub struct LoopController {
    shared: Arc<Shared>,
}

impl LoopController {
    pub fn new(
        synchronizer: PlaylistSynchronizer,
        catalog: Arc<dyn CatalogApi>,
        store: Arc<JsonStore>,
        tick: Duration,
        poll_every_ticks: u32,
    ) -> Self {
        let status = LoopStatus {
            playlist_id: store.get(PLAYLIST_ID_KEY),
            ..Default::default()
        };

        LoopController {
            shared: Arc::new(Shared {
                cycle: Mutex::new(CycleState {
                    synchronizer,
                    ticks_since_poll: 0,
                }),
                status: RwLock::new(status),
                catalog,
                store,
                trigger: Notify::new(),
                started: AtomicBool::new(false),
                tick,
                poll_every_ticks: poll_every_ticks.max(1),
            }),
        }
    }

    /// Runs a first cycle right away, then keeps ticking. Only the first call
    /// spawns the loop.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            debug!("Loop already running");
            return None;
        }

        let controller = self.clone();
        Some(tokio::spawn(async move { controller.run().await }))
    }

    /// Asks for an immediate cycle. The pending tick is dropped; a cycle that
    /// is already running finishes first.
    pub fn trigger_now(&self) {
        self.shared.trigger.notify_one();
    }

    pub fn status(&self) -> LoopStatus {
        self.shared
            .status
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.status().last_update
    }

    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.status().last_error
    }

    pub fn playlist_id(&self) -> Option<String> {
        self.status().playlist_id
    }

    /// Selecting the active playlist again turns syncing off; any other id
    /// becomes the new target. Persists the choice and triggers a cycle.
    pub fn select_playlist(&self, requested: &str) -> Result<Option<String>> {
        let current = self.playlist_id();
        let next = if current.as_deref() == Some(requested) {
            None
        } else {
            Some(requested.to_string())
        };

        match &next {
            Some(id) => self.shared.store.set(PLAYLIST_ID_KEY, id)?,
            None => self.shared.store.remove(PLAYLIST_ID_KEY)?,
        }
        self.update_status(|s| s.playlist_id = next.clone());

        info!("Target playlist is now {:?}", next);
        self.trigger_now();
        Ok(next)
    }

    async fn run(&self) {
        info!(
            "Sync loop started, tick {:?}, chart poll every {} ticks",
            self.shared.tick, self.shared.poll_every_ticks
        );

        self.run_cycle(true).await;

        loop {
            let forced = tokio::select! {
                _ = tokio::time::sleep(self.shared.tick) => false,
                _ = self.shared.trigger.notified() => true,
            };
            self.run_cycle(forced).await;
        }
    }

    /// One cycle: session check, chart poll when due, description refresh.
    /// Errors are recorded, never propagated.
    pub async fn run_cycle(&self, forced: bool) -> CycleReport {
        let mut cycle = self.shared.cycle.lock().await;

        let authenticated = match self.shared.catalog.ensure_fresh_session().await {
            Ok(authenticated) => authenticated,
            Err(e) => return self.record_failure(e),
        };
        if !authenticated {
            debug!("Not signed in, skipping cycle");
            return CycleReport::NotAuthenticated;
        }

        cycle.ticks_since_poll = cycle.ticks_since_poll.saturating_add(1);
        let poll_due = forced || cycle.ticks_since_poll >= self.shared.poll_every_ticks;
        let playlist_id = self.playlist_id();
        let now = Utc::now();

        let mut polled = None;
        if poll_due {
            match cycle.synchronizer.sync(playlist_id.as_deref(), now).await {
                Ok(outcome) => {
                    match &outcome {
                        SyncOutcome::NoPlaylist => debug!("No target playlist, nothing to sync"),
                        SyncOutcome::Unchanged => info!("Chart unchanged, playlist left as is"),
                        SyncOutcome::Updated { resolved, total } => {
                            info!("Playlist synced, {} of {} chart entries found", resolved, total)
                        }
                    }
                    cycle.ticks_since_poll = 0;
                    let last_sync = cycle.synchronizer.last_sync();
                    self.update_status(|s| s.last_update = last_sync);
                    polled = Some(outcome);
                }
                Err(e) => {
                    cycle.ticks_since_poll = self.shared.poll_every_ticks;
                    return self.record_failure(e);
                }
            }
        }

        match cycle.synchronizer.update_description(playlist_id.as_deref(), now).await {
            Ok(described) => CycleReport::Ran { polled, described },
            Err(e) => self.record_failure(e),
        }
    }

    fn record_failure(&self, err: SyncError) -> CycleReport {
        error!("Sync cycle failed: {}", err);
        let info = ErrorInfo::new(&err, Utc::now());
        self.update_status(|s| s.last_error = Some(info.clone()));
        CycleReport::Failed(info)
    }

    fn update_status(&self, apply: impl FnOnce(&mut LoopStatus)) {
        match self.shared.status.write() {
            Ok(mut status) => apply(&mut status),
            Err(poisoned) => apply(&mut poisoned.into_inner()),
        }
    }
}
