//! Periodic background checks that run beside the push channel.
//!
//! Each poller ticks on its own task and runs every fetch as a separate,
//! cancellable task. Responses pass through a [`SequenceGate`]: only the
//! response to the most recently issued request is applied, so a slow
//! response can never overwrite a newer one. The dismissal gate is shared
//! with the push channel, so a pushed dismissal change also outranks any
//! poll already in flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::settings::{BellSchedule, LivestreamSettings};
use beacon_core::{ClientError, DismissalStatus};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::source::{SettingsSource, REQUEST_TIMEOUT};
use crate::state::{DisplayState, StateChanges};
use crate::surface::DisplaySurface;

/// Monotonic request numbering for one polled resource.
#[derive(Debug, Default)]
pub struct SequenceGate {
    latest: Mutex<u64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the next request. Supersedes every earlier one.
    pub fn issue(&self) -> u64 {
        let mut latest = self.latest.lock();
        *latest += 1;
        *latest
    }

    pub fn is_latest(&self, seq: u64) -> bool {
        *self.latest.lock() == seq
    }

    /// Run `apply` if `seq` is still the latest. Nothing can be issued while
    /// it runs.
    pub fn apply_if_latest(&self, seq: u64, apply: impl FnOnce()) -> bool {
        let latest = self.latest.lock();
        if *latest != seq {
            return false;
        }
        apply();
        true
    }

    /// Invalidate every outstanding request and run `apply` before any of
    /// them can land.
    pub fn supersede(&self, apply: impl FnOnce()) {
        let mut latest = self.latest.lock();
        *latest += 1;
        apply();
    }
}

/// A running poller. Dropping it cancels the ticker and any in-flight fetch.
pub struct PollTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTask {
    /// Run `fetch` every `every` (first run immediately) and hand fresh
    /// results to `apply`. Failed fetches are logged and skipped.
    pub fn spawn<F, Fut, T, A>(
        name: &'static str,
        every: Duration,
        parent: &CancellationToken,
        fetch: F,
        apply: A,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
        T: Send + 'static,
        A: Fn(T) + Send + Sync + 'static,
    {
        Self::spawn_gated(name, every, parent, Arc::new(SequenceGate::new()), fetch, apply)
    }

    /// [`PollTask::spawn`] with a gate other writers can supersede.
    pub fn spawn_gated<F, Fut, T, A>(
        name: &'static str,
        every: Duration,
        parent: &CancellationToken,
        gate: Arc<SequenceGate>,
        fetch: F,
        apply: A,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
        T: Send + 'static,
        A: Fn(T) + Send + Sync + 'static,
    {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let apply = Arc::new(apply);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let seq = gate.issue();
                let request = fetch();
                let gate = Arc::clone(&gate);
                let apply = Arc::clone(&apply);
                let token = token.clone();
                drop(tokio::spawn(async move {
                    let result = tokio::select! {
                        () = token.cancelled() => return,
                        result = request => result,
                    };
                    match result {
                        Ok(value) => {
                            if !gate.apply_if_latest(seq, || apply(value)) {
                                debug!(poller = name, seq, "discarding stale poll response");
                            }
                        }
                        Err(e) => debug!(poller = name, seq, error = %e, "poll failed"),
                    }
                }));
            }
            debug!(poller = name, "poller stopped");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// HEAD the stream URL. Anything but a 2xx, including no answer, is "down".
pub async fn check_livestream(http: &reqwest::Client, url: &str) -> bool {
    match http.head(url).timeout(REQUEST_TIMEOUT).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(url, error = %e, "livestream check failed");
            false
        }
    }
}

/// The display's three built-in pollers, restarted as settings change.
pub struct Pollers {
    root: CancellationToken,
    source: Arc<dyn SettingsSource>,
    surface: Arc<dyn DisplaySurface>,
    state: Arc<RwLock<DisplayState>>,
    http: reqwest::Client,
    bell_tick: Duration,
    dismissal_gate: Arc<SequenceGate>,
    dismissal: Option<PollTask>,
    livestream: Option<PollTask>,
    bell: Option<PollTask>,
}

impl Pollers {
    pub fn new(
        source: Arc<dyn SettingsSource>,
        surface: Arc<dyn DisplaySurface>,
        state: Arc<RwLock<DisplayState>>,
        dismissal_gate: Arc<SequenceGate>,
        bell_tick: Duration,
        root: &CancellationToken,
    ) -> Self {
        Self {
            root: root.child_token(),
            source,
            surface,
            state,
            http: reqwest::Client::new(),
            bell_tick,
            dismissal_gate,
            dismissal: None,
            livestream: None,
            bell: None,
        }
    }

    /// Restart whichever pollers the last apply touched.
    pub fn update(&mut self, changes: &StateChanges) {
        let (poll_secs, livestream, bell) = {
            let state = self.state.read();
            (
                state.dismissal_poll_secs,
                state.livestream.clone(),
                state.bell_schedule.clone(),
            )
        };
        if changes.dismissal_poll {
            self.restart_dismissal(poll_secs);
        }
        if changes.livestream {
            self.restart_livestream(livestream);
        }
        if changes.bell_schedule {
            self.restart_bell(bell);
        }
    }

    /// Names of the pollers currently running.
    pub fn running(&self) -> Vec<&'static str> {
        [&self.dismissal, &self.livestream, &self.bell]
            .into_iter()
            .flatten()
            .map(PollTask::name)
            .collect()
    }

    pub fn stop_all(&mut self) {
        self.root.cancel();
        self.dismissal = None;
        self.livestream = None;
        self.bell = None;
    }

    fn restart_dismissal(&mut self, every_secs: u64) {
        self.dismissal = None;
        if every_secs == 0 {
            return;
        }
        let source = Arc::clone(&self.source);
        let surface = Arc::clone(&self.surface);
        let state = Arc::clone(&self.state);
        self.dismissal = Some(PollTask::spawn_gated(
            "dismissal",
            Duration::from_secs(every_secs),
            &self.root,
            Arc::clone(&self.dismissal_gate),
            move || {
                let source = Arc::clone(&source);
                async move { source.fetch_dismissal().await }
            },
            move |status: Option<DismissalStatus>| {
                let status = status.filter(|s| s.active);
                {
                    let mut state = state.write();
                    if state.dismissal == status {
                        return;
                    }
                    state.dismissal.clone_from(&status);
                }
                debug!(active = status.is_some(), "dismissal changed by poll");
                match status {
                    Some(status) => surface.show_dismissal(&status),
                    None => surface.end_dismissal(),
                }
            },
        ));
    }

    fn restart_livestream(&mut self, settings: LivestreamSettings) {
        self.livestream = None;
        let url = match settings.url {
            Some(url) if settings.enabled => url,
            _ => return,
        };
        let http = self.http.clone();
        let surface = Arc::clone(&self.surface);
        let last: Mutex<Option<bool>> = Mutex::new(None);
        self.livestream = Some(PollTask::spawn(
            "livestream",
            Duration::from_secs(settings.check_interval_secs.max(1)),
            &self.root,
            move || {
                let http = http.clone();
                let url = url.clone();
                async move { Ok::<_, ClientError>(check_livestream(&http, &url).await) }
            },
            move |live: bool| {
                if last.lock().replace(live) != Some(live) {
                    surface.livestream_status(live);
                }
            },
        ));
    }

    fn restart_bell(&mut self, schedule: BellSchedule) {
        self.bell = None;
        if !schedule.enabled || schedule.periods.is_empty() {
            return;
        }
        let surface = Arc::clone(&self.surface);
        let last: Mutex<Option<Option<String>>> = Mutex::new(None);
        self.bell = Some(PollTask::spawn(
            "bell",
            self.bell_tick,
            &self.root,
            || async { Ok::<_, ClientError>(chrono::Local::now().time()) },
            move |now| {
                let period = schedule.current_period(now);
                let name = period.map(|p| p.name.clone());
                if last.lock().replace(name.clone()) != Some(name) {
                    surface.bell_period(period);
                }
            },
        ));
    }
}

impl Drop for Pollers {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
