//! The display sync agent.
//!
//! Keeps one push channel open to the server for the life of the display.
//! Every `initial` and `settings_update` goes through the same apply path;
//! emergency and dismissal messages go straight to the surface. When the
//! channel drops the agent waits a fixed delay and reconnects, forever.
//!
//! Fallback chain, taken at most once per outage: if the channel fails
//! before anything was ever applied, or fails `fallback_after_failures`
//! times in a row without reaching `initial`, fetch the snapshot once; if
//! that fails too, apply the local cache.

use std::sync::Arc;

use beacon_core::{BroadcastMessage, ClientError, SettingsSnapshot, TagSet};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::config::AgentConfig;
use crate::identity::DisplayIdentity;
use crate::poll::{Pollers, SequenceGate};
use crate::source::{MessageStream, SettingsSource};
use crate::state::{DisplayState, StateChanges, SyncState};
use crate::surface::DisplaySurface;

/// Why a push channel attempt ended.
#[derive(Debug)]
enum ChannelEnd {
    /// The server announced it is going away.
    Shutdown,
    /// The stream ended without an error.
    Closed,
    Failed(ClientError),
}

struct ChannelOutcome {
    reached_initial: bool,
    end: ChannelEnd,
}

pub struct SyncAgent {
    source: Arc<dyn SettingsSource>,
    surface: Arc<dyn DisplaySurface>,
    identity: DisplayIdentity,
    cache: Option<SnapshotCache>,
    config: AgentConfig,
    state: Arc<RwLock<DisplayState>>,
    /// Shared with the dismissal poller; pushes supersede polls in flight.
    dismissal_gate: Arc<SequenceGate>,
    status: watch::Sender<SyncState>,
}

impl SyncAgent {
    pub fn new(
        source: Arc<dyn SettingsSource>,
        surface: Arc<dyn DisplaySurface>,
        identity: DisplayIdentity,
        config: AgentConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncState::Connecting);
        Self {
            source,
            surface,
            identity,
            cache: None,
            config,
            state: Arc::new(RwLock::new(DisplayState::new())),
            dismissal_gate: Arc::new(SequenceGate::new()),
            status,
        }
    }

    pub fn with_cache(mut self, cache: SnapshotCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Follow connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.status.subscribe()
    }

    /// Shared view of the render state, readable while the agent runs.
    pub fn state(&self) -> Arc<RwLock<DisplayState>> {
        Arc::clone(&self.state)
    }

    pub fn identity(&self) -> &DisplayIdentity {
        &self.identity
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut pollers = self.config.pollers.then(|| {
            Pollers::new(
                Arc::clone(&self.source),
                Arc::clone(&self.surface),
                Arc::clone(&self.state),
                Arc::clone(&self.dismissal_gate),
                self.config.bell_tick(),
                &cancel,
            )
        });
        let mut failures: u32 = 0;
        let mut fell_back = false;

        info!(
            display_id = %self.identity.display_id,
            provisioning_tags = ?self.identity.tags,
            "sync agent starting"
        );

        loop {
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.run_channel(pollers.as_mut()) => outcome,
            };

            if outcome.reached_initial {
                failures = 0;
                fell_back = false;
            } else {
                failures = failures.saturating_add(1);
            }
            match &outcome.end {
                ChannelEnd::Shutdown => info!("server shutting down, will reconnect"),
                ChannelEnd::Closed => warn!(failures, "push channel closed"),
                ChannelEnd::Failed(e) => {
                    warn!(error = %e, kind = e.error_kind(), failures, "push channel failed");
                }
            }
            self.set_status(SyncState::Reconnecting);

            let applied = self.state.read().is_applied();
            if !fell_back && (!applied || failures >= self.config.fallback_after_failures) {
                fell_back = true;
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = self.fallback(pollers.as_mut()) => {}
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
            if *self.status.borrow() == SyncState::FailedFallback {
                self.set_status(SyncState::Reconnecting);
            }
        }

        if let Some(pollers) = pollers.as_mut() {
            pollers.stop_all();
        }
        info!("sync agent stopped");
    }

    async fn run_channel(&self, pollers: Option<&mut Pollers>) -> ChannelOutcome {
        match self.source.open_channel(&self.identity).await {
            Ok(channel) => self.consume(channel, pollers).await,
            Err(e) => ChannelOutcome {
                reached_initial: false,
                end: ChannelEnd::Failed(e),
            },
        }
    }

    async fn consume(
        &self,
        mut channel: MessageStream,
        mut pollers: Option<&mut Pollers>,
    ) -> ChannelOutcome {
        let mut reached_initial = false;
        while let Some(item) = channel.next().await {
            let message = match item {
                Ok(message) => message,
                Err(ClientError::Decode(e)) => {
                    warn!(error = %e, "skipping malformed push frame");
                    continue;
                }
                Err(e) => {
                    return ChannelOutcome {
                        reached_initial,
                        end: ChannelEnd::Failed(e),
                    }
                }
            };
            debug!(kind = message.kind(), "push message");

            match message {
                BroadcastMessage::Initial {
                    settings,
                    display_tags,
                } => {
                    self.apply(&settings, Some(&display_tags), true, pollers.as_deref_mut())
                        .await;
                    reached_initial = true;
                    self.set_status(SyncState::Connected);
                }
                BroadcastMessage::SettingsUpdate { settings, key } => {
                    debug!(?key, "settings update");
                    self.apply(&settings, None, true, pollers.as_deref_mut()).await;
                }
                BroadcastMessage::EmergencyAlert { alert } => {
                    self.state.write().emergency = Some(alert.clone());
                    self.surface.show_emergency(&alert);
                }
                BroadcastMessage::EmergencyCancel => {
                    self.state.write().emergency = None;
                    self.surface.clear_emergency();
                }
                BroadcastMessage::DismissalStart { dismissal }
                | BroadcastMessage::DismissalUpdate { dismissal } => {
                    self.dismissal_gate.supersede(|| {
                        self.state.write().dismissal = Some(dismissal.clone());
                        self.surface.show_dismissal(&dismissal);
                    });
                }
                BroadcastMessage::DismissalEnd => {
                    self.dismissal_gate.supersede(|| {
                        self.state.write().dismissal = None;
                        self.surface.end_dismissal();
                    });
                }
                BroadcastMessage::ServerShutdown => {
                    return ChannelOutcome {
                        reached_initial,
                        end: ChannelEnd::Shutdown,
                    }
                }
            }
        }

        ChannelOutcome {
            reached_initial,
            end: ChannelEnd::Closed,
        }
    }

    /// Shared apply path for pushes, the one-shot fetch, and the cache.
    async fn apply(
        &self,
        snapshot: &SettingsSnapshot,
        server_tags: Option<&TagSet>,
        persist: bool,
        pollers: Option<&mut Pollers>,
    ) -> StateChanges {
        let (changes, rendered) = {
            let mut state = self.state.write();
            let changes = state.apply_snapshot(snapshot, server_tags, &self.identity.display_id);
            (changes, changes.any().then(|| state.clone()))
        };
        if let Some(rendered) = rendered {
            self.surface.render(&rendered);
        }
        if let Some(pollers) = pollers {
            pollers.update(&changes);
        }
        if persist {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.save(snapshot).await {
                    warn!(error = %e, "could not cache snapshot");
                }
            }
        }
        changes
    }

    async fn fallback(&self, mut pollers: Option<&mut Pollers>) {
        match self.source.fetch_snapshot().await {
            Ok(snapshot) => {
                info!(keys = snapshot.len(), "applied snapshot from one-shot fetch");
                self.apply(&snapshot, None, true, pollers.as_deref_mut()).await;
            }
            Err(e) => {
                warn!(error = %e, "one-shot fetch failed, trying local cache");
                match self.cache.as_ref() {
                    Some(cache) => match cache.load().await {
                        Ok(Some(snapshot)) => {
                            info!(keys = snapshot.len(), "applied cached snapshot");
                            self.apply(&snapshot, None, false, pollers.as_deref_mut()).await;
                        }
                        Ok(None) => warn!("no cached snapshot"),
                        Err(e) => warn!(error = %e, "could not read snapshot cache"),
                    },
                    None => warn!("no snapshot cache configured"),
                }
            }
        }
        self.set_status(SyncState::FailedFallback);
    }

    fn set_status(&self, next: SyncState) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(state = %next, "sync state");
        }
    }
}
