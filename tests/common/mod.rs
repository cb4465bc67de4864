//! Scripted in-memory media provider for driving the watcher and island.

#![allow(dead_code)]

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use halo::error::ProviderError;
use halo::provider::{
    Callback, Listeners, MediaProperties, MediaProvider, MediaSession, PlaybackInfo,
    ProviderResult, SessionId, SessionManager, Subscription, TimelineProperties,
};
use halo::watcher::{EventSink, SessionWatcher, WatcherEvent};
use halo::{Config, MediaSnapshot, PlaybackStatus};

#[derive(Debug, Clone)]
pub struct FakeTrack {
    pub status: PlaybackStatus,
    pub title: String,
    pub artist: String,
    pub position_ms: u64,
    pub duration_ms: u64,
    /// Number of property reads answered with blank metadata before the real one.
    pub blank_reads: usize,
    /// Session was closed underneath the watcher.
    pub stale: bool,
}

impl FakeTrack {
    pub fn playing(title: &str) -> Self {
        Self {
            status: PlaybackStatus::Playing,
            title: title.to_string(),
            artist: "Artist".to_string(),
            position_ms: 1_000,
            duration_ms: 200_000,
            blank_reads: 0,
            stale: false,
        }
    }

    pub fn paused(title: &str) -> Self {
        Self {
            status: PlaybackStatus::Paused,
            ..Self::playing(title)
        }
    }
}

#[derive(Default)]
pub struct FakeState {
    pub requests: AtomicUsize,
    pub failing_requests: AtomicUsize,
    pub fail_commands: AtomicBool,
    /// Session deregistration reports an error and leaves the callback registered.
    pub failing_unsubscribe: AtomicBool,
    pub leaked: Mutex<Vec<Subscription>>,
    pub current: Mutex<Option<String>>,
    pub tracks: Mutex<HashMap<String, FakeTrack>>,
    pub gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    pub property_reads: Mutex<HashMap<String, usize>>,
    pub commands: Mutex<Vec<(String, String)>>,
    pub manager_listeners: Listeners<()>,
    pub session_listeners: Listeners<String>,
}

#[derive(Clone, Default)]
pub struct FakeProvider {
    pub state: Arc<FakeState>,
}

impl FakeProvider {
    pub fn with_session(id: &str, track: FakeTrack) -> Self {
        let provider = Self::default();
        provider.set_track(id, track);
        *provider.state.current.lock() = Some(id.to_string());
        provider
    }

    pub fn set_track(&self, id: &str, track: FakeTrack) {
        self.state.tracks.lock().insert(id.to_string(), track);
    }

    pub fn update_track(&self, id: &str, update: impl FnOnce(&mut FakeTrack)) {
        if let Some(track) = self.state.tracks.lock().get_mut(id) {
            update(track);
        }
    }

    /// Switch the foreground session without telling anyone.
    pub fn set_current_silently(&self, id: Option<&str>) {
        *self.state.current.lock() = id.map(str::to_string);
    }

    /// Switch the foreground session and fire the session-changed callback.
    pub fn switch_to(&self, id: Option<&str>) {
        self.set_current_silently(id);
        self.state.manager_listeners.notify(&());
    }

    /// Fire the change callbacks registered on `id`.
    pub fn notify_session(&self, id: &str) {
        self.state.session_listeners.notify(&id.to_string());
    }

    /// Hold every property read of `id` until [`FakeProvider::open_gate`].
    pub fn close_gate(&self, id: &str) {
        self.state
            .gates
            .lock()
            .insert(id.to_string(), Arc::new(Semaphore::new(0)));
    }

    pub fn open_gate(&self, id: &str) {
        if let Some(gate) = self.state.gates.lock().get(id) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn subscriptions(&self, id: &str) -> usize {
        self.state.session_listeners.count(&id.to_string())
    }

    pub fn manager_subscriptions(&self) -> usize {
        self.state.manager_listeners.count(&())
    }

    pub fn property_reads(&self, id: &str) -> usize {
        self.state
            .property_reads
            .lock()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.commands.lock().clone()
    }
}

impl MediaProvider for FakeProvider {
    fn request_session_manager(&self) -> BoxFuture<'_, ProviderResult<Arc<dyn SessionManager>>> {
        Box::pin(async move {
            self.state.requests.fetch_add(1, Ordering::SeqCst);
            let failing = self.state.failing_requests.load(Ordering::SeqCst);
            if failing > 0 {
                self.state.failing_requests.store(failing - 1, Ordering::SeqCst);
                return Err(ProviderError::Unavailable("fake manager offline".to_string()));
            }
            let manager: Arc<dyn SessionManager> = Arc::new(FakeManager {
                state: self.state.clone(),
            });
            Ok(manager)
        })
    }
}

struct FakeManager {
    state: Arc<FakeState>,
}

impl SessionManager for FakeManager {
    fn current_session(&self) -> ProviderResult<Option<Arc<dyn MediaSession>>> {
        Ok(self.state.current.lock().clone().map(|id| {
            let session: Arc<dyn MediaSession> = Arc::new(FakeSession {
                id,
                state: self.state.clone(),
            });
            session
        }))
    }

    fn on_current_session_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        Ok(self.state.manager_listeners.register((), callback))
    }
}

struct FakeSession {
    id: String,
    state: Arc<FakeState>,
}

impl FakeSession {
    fn track(&self) -> ProviderResult<FakeTrack> {
        match self.state.tracks.lock().get(&self.id) {
            Some(track) if !track.stale => Ok(track.clone()),
            _ => Err(ProviderError::SessionStale(self.id.clone())),
        }
    }

    fn register(&self, callback: Callback) -> ProviderResult<Subscription> {
        let registration = self.state.session_listeners.register(self.id.clone(), callback);
        if !self.state.failing_unsubscribe.load(Ordering::SeqCst) {
            return Ok(registration);
        }

        let state = self.state.clone();
        let id = self.id.clone();
        Ok(Subscription::new(move || {
            state.leaked.lock().push(registration);
            Err(ProviderError::SessionStale(id))
        }))
    }

    fn record(&self, command: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let command = command.to_string();
        Box::pin(async move {
            self.state
                .commands
                .lock()
                .push((self.id.clone(), command.clone()));
            if self.state.fail_commands.load(Ordering::SeqCst) {
                return Err(ProviderError::command_failed(command, "fake refusal"));
            }
            Ok(())
        })
    }
}

impl MediaSession for FakeSession {
    fn id(&self) -> SessionId {
        SessionId::new(self.id.clone())
    }

    fn playback_info(&self) -> ProviderResult<PlaybackInfo> {
        Ok(PlaybackInfo {
            status: self.track()?.status,
        })
    }

    fn media_properties(&self) -> BoxFuture<'_, ProviderResult<Option<MediaProperties>>> {
        Box::pin(async move {
            let gate = self.state.gates.lock().get(&self.id).cloned();
            if let Some(gate) = gate {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| ProviderError::Io(e.to_string()))?;
            }

            let read = {
                let mut reads = self.state.property_reads.lock();
                let count = reads.entry(self.id.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let track = self.track()?;
            if read <= track.blank_reads {
                return Ok(Some(MediaProperties::default()));
            }
            Ok(Some(MediaProperties {
                title: track.title,
                artist: track.artist,
                thumbnail: None,
            }))
        })
    }

    fn timeline_properties(&self) -> ProviderResult<TimelineProperties> {
        let track = self.track()?;
        Ok(TimelineProperties {
            position_ms: track.position_ms,
            duration_ms: track.duration_ms,
        })
    }

    fn on_properties_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        self.register(callback)
    }

    fn on_playback_info_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        self.register(callback)
    }

    fn on_timeline_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        self.register(callback)
    }

    fn play(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.record("play")
    }

    fn pause(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.record("pause")
    }

    fn seek(&self, ticks: i64) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move { self.record(&format!("seek:{}", ticks)).await })
    }

    fn skip_next(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.record("skip_next")
    }

    fn skip_previous(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.record("skip_previous")
    }
}

pub fn test_config() -> Config {
    Config {
        refresh_timeout: Duration::from_secs(60),
        ..Config::default()
    }
}

/// A watcher whose events land on a channel the test drains by hand.
pub struct Harness {
    pub watcher: SessionWatcher,
    pub events: mpsc::UnboundedReceiver<WatcherEvent>,
}

impl Harness {
    pub fn new(provider: &FakeProvider, config: &Config) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let sink: EventSink = Arc::new(move |event: WatcherEvent| {
            let _ = tx.send(event);
        });
        Self {
            watcher: SessionWatcher::new(Arc::new(provider.clone()), sink, config),
            events,
        }
    }

    /// Feed events back into the watcher until nothing arrives for a while.
    /// Returns the snapshots it published.
    pub async fn pump(&mut self) -> Vec<MediaSnapshot> {
        let mut published = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(1), self.events.recv()).await
        {
            if let Some(snapshot) = self.watcher.handle(event) {
                published.push(snapshot);
            }
        }
        published
    }

    pub async fn start(&mut self) -> Vec<MediaSnapshot> {
        self.watcher.start();
        self.pump().await
    }
}
