//! Deterministic source and surface for driving the sync agent in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::settings::BellPeriod;
use beacon_core::{BroadcastMessage, ClientError, DismissalStatus, EmergencyAlert, SettingsSnapshot};
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;

use crate::identity::DisplayIdentity;
use crate::source::{MessageStream, SettingsSource};
use crate::state::DisplayState;
use crate::surface::DisplaySurface;

/// One scripted push-channel attempt.
#[derive(Clone, Debug)]
pub enum ScriptedChannel {
    /// `open_channel` itself fails.
    Refuse(ClientError),
    /// Yield the messages, then close cleanly.
    Messages(Vec<BroadcastMessage>),
    /// Yield the messages, then fail.
    MessagesThenError(Vec<BroadcastMessage>, ClientError),
    /// Yield the messages, then stay open forever.
    Hold(Vec<BroadcastMessage>),
    /// Yield each message after waiting `Duration`, then stay open.
    Paced(Duration, Vec<BroadcastMessage>),
}

/// Source that plays back scripted channels in order. Once the script runs
/// out every further attempt is refused.
pub struct ScriptedSource {
    channels: Mutex<VecDeque<ScriptedChannel>>,
    snapshot: Mutex<Result<SettingsSnapshot, ClientError>>,
    dismissal: Mutex<Option<DismissalStatus>>,
    dismissal_delay: Duration,
    opens: AtomicUsize,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(channels: Vec<ScriptedChannel>) -> Self {
        Self {
            channels: Mutex::new(channels.into()),
            snapshot: Mutex::new(Err(ClientError::Network("no snapshot scripted".into()))),
            dismissal: Mutex::new(None),
            dismissal_delay: Duration::ZERO,
            opens: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    /// What `fetch_snapshot` returns.
    pub fn with_snapshot(self, snapshot: Result<SettingsSnapshot, ClientError>) -> Self {
        *self.snapshot.lock() = snapshot;
        self
    }

    /// Make `fetch_dismissal` answer slowly with the status current at
    /// request time.
    pub fn with_dismissal_delay(mut self, delay: Duration) -> Self {
        self.dismissal_delay = delay;
        self
    }

    pub fn set_dismissal(&self, dismissal: Option<DismissalStatus>) {
        *self.dismissal.lock() = dismissal;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SettingsSource for ScriptedSource {
    async fn open_channel(&self, _identity: &DisplayIdentity) -> Result<MessageStream, ClientError> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let next = self.channels.lock().pop_front();
        let channel = next.unwrap_or_else(|| {
            ScriptedChannel::Refuse(ClientError::Network("script exhausted".into()))
        });
        let stream: MessageStream = match channel {
            ScriptedChannel::Refuse(e) => return Err(e),
            ScriptedChannel::Messages(msgs) => {
                Box::pin(stream::iter(msgs.into_iter().map(Ok::<_, ClientError>)))
            }
            ScriptedChannel::MessagesThenError(msgs, e) => Box::pin(stream::iter(
                msgs.into_iter().map(Ok::<_, ClientError>).chain(std::iter::once(Err(e))),
            )),
            ScriptedChannel::Hold(msgs) => Box::pin(
                stream::iter(msgs.into_iter().map(Ok::<_, ClientError>)).chain(stream::pending()),
            ),
            ScriptedChannel::Paced(every, msgs) => Box::pin(
                stream::iter(msgs)
                    .then(move |msg| async move {
                        tokio::time::sleep(every).await;
                        Ok::<_, ClientError>(msg)
                    })
                    .chain(stream::pending()),
            ),
        };
        Ok(stream)
    }

    async fn fetch_snapshot(&self) -> Result<SettingsSnapshot, ClientError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.snapshot.lock().clone()
    }

    async fn fetch_dismissal(&self) -> Result<Option<DismissalStatus>, ClientError> {
        let status = self.dismissal.lock().clone();
        if !self.dismissal_delay.is_zero() {
            tokio::time::sleep(self.dismissal_delay).await;
        }
        Ok(status)
    }
}

/// Everything a [`RecordingSurface`] was asked to do.
#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceEvent {
    Render(DisplayState),
    Emergency(EmergencyAlert),
    EmergencyCleared,
    Dismissal(DismissalStatus),
    DismissalEnded,
    Livestream(bool),
    BellPeriod(Option<String>),
}

#[derive(Debug, Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().clone()
    }

    pub fn last_render(&self) -> Option<DisplayState> {
        self.events.lock().iter().rev().find_map(|e| match e {
            SurfaceEvent::Render(state) => Some(state.clone()),
            _ => None,
        })
    }

    pub fn count(&self, pred: impl Fn(&SurfaceEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn push(&self, event: SurfaceEvent) {
        self.events.lock().push(event);
    }
}

impl DisplaySurface for RecordingSurface {
    fn render(&self, state: &DisplayState) {
        self.push(SurfaceEvent::Render(state.clone()));
    }

    fn show_emergency(&self, alert: &EmergencyAlert) {
        self.push(SurfaceEvent::Emergency(alert.clone()));
    }

    fn clear_emergency(&self) {
        self.push(SurfaceEvent::EmergencyCleared);
    }

    fn show_dismissal(&self, status: &DismissalStatus) {
        self.push(SurfaceEvent::Dismissal(status.clone()));
    }

    fn end_dismissal(&self) {
        self.push(SurfaceEvent::DismissalEnded);
    }

    fn livestream_status(&self, live: bool) {
        self.push(SurfaceEvent::Livestream(live));
    }

    fn bell_period(&self, period: Option<&BellPeriod>) {
        self.push(SurfaceEvent::BellPeriod(period.map(|p| p.name.clone())));
    }
}
