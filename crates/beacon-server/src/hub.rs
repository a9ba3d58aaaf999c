//! Commit-then-broadcast coordination between the settings store and the
//! display registry.
//!
//! Attaching a display and committing a write are serialized by one lock, so
//! a display's `initial` snapshot is never older than a `settings_update` it
//! could have missed. Emergency and dismissal messages bypass the store and
//! only live in memory; each change to them is broadcast under the same lock
//! that covers a display's registration and replay, so every display sees
//! them in the order they happened.

use std::sync::Arc;

use beacon_core::settings::keys;
use beacon_core::{
    BroadcastMessage, DismissalStatus, DisplayInfo, EmergencyAlert, SettingsSnapshot, TagSet,
};
use beacon_store::{SettingsStore, StoreError};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

use crate::registry::{ConnectionGuard, DisplayRegistry, Frame};

/// A freshly attached display: its queue and the guard that unregisters it.
pub struct Attachment {
    pub guard: ConnectionGuard,
    pub receiver: mpsc::Receiver<Frame>,
    pub tags: TagSet,
}

/// In-memory state outside the settings snapshot.
#[derive(Debug, Default)]
struct SideChannels {
    emergency: Option<EmergencyAlert>,
    dismissal: Option<DismissalStatus>,
}

pub struct BroadcastHub {
    store: Arc<SettingsStore>,
    registry: Arc<DisplayRegistry>,
    commit_lock: Mutex<()>,
    /// Held across every side channel change and its broadcast.
    side: parking_lot::Mutex<SideChannels>,
}

impl BroadcastHub {
    pub fn new(store: Arc<SettingsStore>, registry: Arc<DisplayRegistry>) -> Self {
        Self {
            store,
            registry,
            commit_lock: Mutex::new(()),
            side: parking_lot::Mutex::new(SideChannels::default()),
        }
    }

    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<DisplayRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        self.store.get_all()
    }

    /// Register a display and queue its `initial` message.
    ///
    /// Tags come from the stored `displayTags` assignment when one exists.
    /// Otherwise non-empty `provisioning_tags` become the assignment; that
    /// commit is not broadcast, since only this display reads it.
    #[instrument(skip_all, fields(display_id = %info.display_id))]
    pub async fn attach(&self, info: DisplayInfo, provisioning_tags: TagSet) -> Attachment {
        let _commit = self.commit_lock.lock().await;

        let mut snapshot = self.store.get_all();
        let tags = match snapshot.tags_for_display(info.display_id.as_str()) {
            Some(assigned) => assigned,
            None if !provisioning_tags.is_empty() => {
                match self
                    .assign_tags(&snapshot, info.display_id.as_str(), &provisioning_tags)
                    .await
                {
                    Ok(committed) => snapshot = committed,
                    // The display still gets its tags for this session.
                    Err(e) => warn!(error = %e, "failed to persist provisioning tags"),
                }
                provisioning_tags
            }
            None => TagSet::new(),
        };

        let side = self.side.lock();
        let (conn, receiver) = self.registry.register(info, tags.clone());
        let guard = ConnectionGuard::new(Arc::clone(&self.registry), &conn);

        let _ = conn.send_message(&BroadcastMessage::Initial {
            settings: (*snapshot).clone(),
            display_tags: tags.clone(),
        });
        if let Some(alert) = side.emergency.clone() {
            let _ = conn.send_message(&BroadcastMessage::EmergencyAlert { alert });
        }
        if let Some(dismissal) = side.dismissal.clone() {
            let _ = conn.send_message(&BroadcastMessage::DismissalUpdate { dismissal });
        }
        drop(side);

        info!(
            connection_id = %conn.connection_id,
            tags = ?tags,
            displays = self.registry.count(),
            "display attached"
        );
        Attachment {
            guard,
            receiver,
            tags,
        }
    }

    async fn assign_tags(
        &self,
        snapshot: &SettingsSnapshot,
        display_id: &str,
        tags: &TagSet,
    ) -> Result<Arc<SettingsSnapshot>, StoreError> {
        self.store
            .set(keys::DISPLAY_TAGS, snapshot.display_tags_with(display_id, tags))
            .await
    }

    /// Commit one key, then push the full snapshot to every display.
    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: Value) -> Result<usize, StoreError> {
        let _commit = self.commit_lock.lock().await;
        let committed = self.store.set(key, value).await?;
        let clients = self.registry.broadcast(&BroadcastMessage::SettingsUpdate {
            settings: (*committed).clone(),
            key: Some(key.to_owned()),
        });
        info!(clients, "setting updated");
        Ok(clients)
    }

    /// Replace the whole snapshot, then push it to every display.
    #[instrument(skip_all, fields(keys = snapshot.len()))]
    pub async fn set_all(&self, snapshot: SettingsSnapshot) -> Result<usize, StoreError> {
        let _commit = self.commit_lock.lock().await;
        let committed = self.store.set_all(snapshot).await?;
        let clients = self.registry.broadcast(&BroadcastMessage::SettingsUpdate {
            settings: (*committed).clone(),
            key: None,
        });
        info!(clients, "settings replaced");
        Ok(clients)
    }

    pub fn current_emergency(&self) -> Option<EmergencyAlert> {
        self.side.lock().emergency.clone()
    }

    pub fn current_dismissal(&self) -> Option<DismissalStatus> {
        self.side.lock().dismissal.clone()
    }

    pub fn emergency_alert(&self, alert: EmergencyAlert) -> usize {
        let mut side = self.side.lock();
        side.emergency = Some(alert.clone());
        let title = alert.title.clone();
        let clients = self
            .registry
            .broadcast(&BroadcastMessage::EmergencyAlert { alert });
        warn!(clients, title = %title, "emergency alert issued");
        clients
    }

    pub fn emergency_cancel(&self) -> usize {
        let mut side = self.side.lock();
        side.emergency = None;
        let clients = self.registry.broadcast(&BroadcastMessage::EmergencyCancel);
        info!(clients, "emergency cancelled");
        clients
    }

    pub fn dismissal_start(&self, message: Option<String>) -> usize {
        let dismissal = DismissalStatus::started(message, Utc::now());
        let mut side = self.side.lock();
        side.dismissal = Some(dismissal.clone());
        let clients = self
            .registry
            .broadcast(&BroadcastMessage::DismissalStart { dismissal });
        info!(clients, "dismissal started");
        clients
    }

    /// Replace the called list. Starts a dismissal if none is active.
    pub fn dismissal_update(&self, called: Vec<String>, message: Option<String>) -> usize {
        let now = Utc::now();
        let mut side = self.side.lock();
        let dismissal = {
            let status = side
                .dismissal
                .get_or_insert_with(|| DismissalStatus::started(None, now));
            status.called = called;
            if message.is_some() {
                status.message = message;
            }
            status.updated_at = now;
            status.clone()
        };
        let called = dismissal.called.len();
        let clients = self
            .registry
            .broadcast(&BroadcastMessage::DismissalUpdate { dismissal });
        info!(clients, called, "dismissal updated");
        clients
    }

    pub fn dismissal_end(&self) -> usize {
        let mut side = self.side.lock();
        side.dismissal = None;
        let clients = self.registry.broadcast(&BroadcastMessage::DismissalEnd);
        info!(clients, "dismissal ended");
        clients
    }

    /// Tell every display the server is going away, then close all streams.
    pub fn shutdown(&self) -> usize {
        let clients = self.registry.broadcast(&BroadcastMessage::ServerShutdown);
        let closed = self.registry.clear();
        info!(clients, closed, "display streams closed for shutdown");
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::settings::Slide;
    use beacon_core::{AlertLevel, DisplayId};
    use serde_json::json;

    fn hub() -> (BroadcastHub, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.json")).unwrap();
        let hub = BroadcastHub::new(Arc::new(store), Arc::new(DisplayRegistry::new(32)));
        (hub, dir)
    }

    fn info(id: &str) -> DisplayInfo {
        DisplayInfo::new(DisplayId::from_raw(id))
    }

    fn recv(rx: &mut mpsc::Receiver<Frame>) -> BroadcastMessage {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&frame).unwrap()
    }

    fn alert() -> EmergencyAlert {
        EmergencyAlert {
            level: AlertLevel::Critical,
            title: "Lockdown".into(),
            message: "Stay in place".into(),
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn attach_sends_initial_with_current_snapshot() {
        let (hub, _dir) = hub();
        let _ = hub.set("motd", json!("hello")).await.unwrap();

        let mut att = hub.attach(info("d1"), TagSet::new()).await;
        match recv(&mut att.receiver) {
            BroadcastMessage::Initial { settings, display_tags } => {
                assert_eq!(settings.get("motd"), Some(&json!("hello")));
                assert!(display_tags.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(hub.registry().count(), 1);
    }

    #[tokio::test]
    async fn set_broadcasts_full_snapshot_to_all() {
        let (hub, _dir) = hub();
        let mut a = hub.attach(info("a"), TagSet::new()).await;
        let mut b = hub.attach(info("b"), TagSet::new()).await;
        let _ = recv(&mut a.receiver);
        let _ = recv(&mut b.receiver);

        let _ = hub.set("first", json!(1)).await.unwrap();
        let clients = hub.set("second", json!(2)).await.unwrap();
        assert_eq!(clients, 2);

        let _ = recv(&mut a.receiver);
        match recv(&mut a.receiver) {
            BroadcastMessage::SettingsUpdate { settings, key } => {
                assert_eq!(key.as_deref(), Some("second"));
                assert_eq!(settings.get("first"), Some(&json!(1)));
                assert_eq!(settings.get("second"), Some(&json!(2)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_write_broadcasts_nothing() {
        let (hub, _dir) = hub();
        let mut a = hub.attach(info("a"), TagSet::new()).await;
        let _ = recv(&mut a.receiver);
        let err = hub.set("slides", json!("nope")).await.unwrap_err();
        assert!(err.is_validation());
        assert!(a.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn set_all_replaces_and_broadcasts_without_key() {
        let (hub, _dir) = hub();
        let _ = hub.set("old", json!(true)).await.unwrap();
        let mut a = hub.attach(info("a"), TagSet::new()).await;
        let _ = recv(&mut a.receiver);

        let next = SettingsSnapshot::from_value(json!({"new": true})).unwrap();
        assert_eq!(hub.set_all(next).await.unwrap(), 1);
        match recv(&mut a.receiver) {
            BroadcastMessage::SettingsUpdate { settings, key } => {
                assert!(key.is_none());
                assert!(settings.get("old").is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn provisioning_tags_apply_on_first_connection_only() {
        let (hub, _dir) = hub();
        let gym: TagSet = ["gym".to_string()].into();
        let att = hub.attach(info("d1"), gym.clone()).await;
        assert_eq!(att.tags, gym);
        assert_eq!(hub.snapshot().tags_for_display("d1"), Some(gym.clone()));
        drop(att);

        // Second connection with different provisioning tags keeps the stored ones.
        let library: TagSet = ["library".to_string()].into();
        let mut att = hub.attach(info("d1"), library).await;
        assert_eq!(att.tags, gym);
        match recv(&mut att.receiver) {
            BroadcastMessage::Initial { display_tags, settings } => {
                assert_eq!(display_tags, gym);
                assert!(settings.get(keys::DISPLAY_TAGS).is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn provisioning_commit_is_not_broadcast() {
        let (hub, _dir) = hub();
        let mut watcher = hub.attach(info("watcher"), TagSet::new()).await;
        let _ = recv(&mut watcher.receiver);
        let _att = hub.attach(info("new"), ["gym".to_string()].into()).await;
        assert!(watcher.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn admin_assigned_tags_win() {
        let (hub, _dir) = hub();
        let _ = hub
            .set(keys::DISPLAY_TAGS, json!({"d1": ["Front-Office"]}))
            .await
            .unwrap();
        let att = hub.attach(info("d1"), ["gym".to_string()].into()).await;
        assert_eq!(att.tags, ["front-office".to_string()].into());
    }

    #[tokio::test]
    async fn dropping_attachment_unregisters() {
        let (hub, _dir) = hub();
        let att = hub.attach(info("d1"), TagSet::new()).await;
        assert_eq!(hub.registry().count(), 1);
        drop(att);
        assert_eq!(hub.registry().count(), 0);
    }

    #[tokio::test]
    async fn active_emergency_replayed_on_attach() {
        let (hub, _dir) = hub();
        assert_eq!(hub.emergency_alert(alert()), 0);

        let mut att = hub.attach(info("late"), TagSet::new()).await;
        assert!(matches!(recv(&mut att.receiver), BroadcastMessage::Initial { .. }));
        assert!(matches!(
            recv(&mut att.receiver),
            BroadcastMessage::EmergencyAlert { alert } if alert.title == "Lockdown"
        ));

        assert_eq!(hub.emergency_cancel(), 1);
        assert!(hub.current_emergency().is_none());
        assert!(matches!(recv(&mut att.receiver), BroadcastMessage::EmergencyCancel));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_attach_never_resurrects_cancelled_emergency() {
        let (hub, _dir) = hub();
        let hub = Arc::new(hub);

        let toggler = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for _ in 0..8 {
                    let _ = hub.emergency_alert(alert());
                    tokio::task::yield_now().await;
                    let _ = hub.emergency_cancel();
                    tokio::task::yield_now().await;
                }
            })
        };
        let mut attachments = Vec::new();
        for i in 0..12 {
            attachments.push(hub.attach(info(&format!("d{i}")), TagSet::new()).await);
            tokio::task::yield_now().await;
        }
        toggler.await.unwrap();

        assert!(hub.current_emergency().is_none());
        for att in &mut attachments {
            let mut showing = false;
            while let Ok(frame) = att.receiver.try_recv() {
                match serde_json::from_str::<BroadcastMessage>(&frame).unwrap() {
                    BroadcastMessage::EmergencyAlert { .. } => showing = true,
                    BroadcastMessage::EmergencyCancel => showing = false,
                    _ => {}
                }
            }
            assert!(!showing, "display left showing a cancelled alert");
        }
    }

    #[tokio::test]
    async fn emergency_does_not_touch_store() {
        let (hub, _dir) = hub();
        let before = hub.snapshot();
        let _ = hub.emergency_alert(alert());
        assert_eq!(*hub.snapshot(), *before);
    }

    #[tokio::test]
    async fn dismissal_lifecycle() {
        let (hub, _dir) = hub();
        let mut att = hub.attach(info("d1"), TagSet::new()).await;
        let _ = recv(&mut att.receiver);

        assert_eq!(hub.dismissal_start(Some("Buses".into())), 1);
        assert!(matches!(recv(&mut att.receiver), BroadcastMessage::DismissalStart { .. }));

        let _ = hub.dismissal_update(vec!["Bus 4".into(), "Bus 9".into()], None);
        match recv(&mut att.receiver) {
            BroadcastMessage::DismissalUpdate { dismissal } => {
                assert_eq!(dismissal.called, ["Bus 4", "Bus 9"]);
                assert_eq!(dismissal.message.as_deref(), Some("Buses"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let _ = hub.dismissal_end();
        assert!(matches!(recv(&mut att.receiver), BroadcastMessage::DismissalEnd));
        assert!(hub.current_dismissal().is_none());
    }

    #[tokio::test]
    async fn dismissal_update_without_start_creates_one() {
        let (hub, _dir) = hub();
        let _ = hub.dismissal_update(vec!["Car 12".into()], None);
        let status = hub.current_dismissal().unwrap();
        assert!(status.active);
        assert_eq!(status.called, ["Car 12"]);
    }

    #[tokio::test]
    async fn shutdown_notifies_then_closes() {
        let (hub, _dir) = hub();
        let mut att = hub.attach(info("d1"), TagSet::new()).await;
        let _ = recv(&mut att.receiver);
        assert_eq!(hub.shutdown(), 1);
        assert_eq!(hub.registry().count(), 0);
        assert!(matches!(
            att.receiver.recv().await,
            Some(f) if f.contains("server_shutdown")
        ));
        assert!(att.receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_attach_and_set_stay_consistent() {
        let (hub, _dir) = hub();
        let hub = Arc::new(hub);
        let slides = json!([Slide::new(json!("x"))]);

        let writer = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                for i in 0..20 {
                    let _ = hub.set("counter", json!(i)).await.unwrap();
                }
            })
        };
        let mut attachments = Vec::new();
        for i in 0..10 {
            attachments.push(hub.attach(info(&format!("d{i}")), TagSet::new()).await);
        }
        writer.await.unwrap();
        let _ = hub.set("slides", slides).await.unwrap();

        // Whatever each display saw first, its last message matches the store.
        let expected = hub.snapshot();
        for att in &mut attachments {
            let mut last = None;
            while let Ok(frame) = att.receiver.try_recv() {
                last = Some(serde_json::from_str::<BroadcastMessage>(&frame).unwrap());
            }
            let last = last.unwrap();
            assert_eq!(last.snapshot().unwrap(), &*expected);
        }
    }
}
