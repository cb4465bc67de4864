//! Normalizes the provider's push notifications and the poll fallback into a
//! de-duplicated stream of [`MediaSnapshot`]s.
//!
//! The watcher never blocks on the provider. Every asynchronous call is
//! spawned onto the tokio runtime and its result comes back through the
//! [`EventSink`] as a new [`WatcherEvent`], which the owner feeds into
//! [`SessionWatcher::handle`]. All state is only touched from `handle` and the
//! other `&mut self` entry points, so the owner decides the serialization.
//!
//! Provider failures stop here: they are logged and turned into "no media".

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::Config;
use crate::error::ProviderError;
use crate::provider::{
    ms_to_ticks, Callback, MediaProperties, MediaProvider, MediaSession, ProviderResult,
    SessionId, SessionManager, Subscription, TimelineProperties,
};
use crate::types::{MediaSnapshot, PlaybackStatus, ProviderStatus, TransportCommand};

/// Where the watcher posts events that must come back to it.
pub type EventSink = Arc<dyn Fn(WatcherEvent) + Send + Sync>;

/// Identifies which session (and which subscription generation) a refresh was for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTag {
    pub session: SessionId,
    pub generation: u64,
}

pub enum WatcherEvent {
    ManagerResolved(ProviderResult<Arc<dyn SessionManager>>),
    /// The provider reported a new foreground session.
    SessionChanged,
    /// Properties, playback info or timeline of a session changed.
    SessionUpdated { session: SessionId, generation: u64 },
    RefreshCompleted { tag: RefreshTag, snapshot: MediaSnapshot },
    CommandCompleted {
        command: TransportCommand,
        result: ProviderResult<()>,
    },
    PollTick,
}

impl fmt::Debug for WatcherEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherEvent::ManagerResolved(Ok(_)) => write!(f, "ManagerResolved(Ok)"),
            WatcherEvent::ManagerResolved(Err(e)) => write!(f, "ManagerResolved(Err({}))", e),
            WatcherEvent::SessionChanged => write!(f, "SessionChanged"),
            WatcherEvent::SessionUpdated {
                session,
                generation,
            } => write!(f, "SessionUpdated({}, gen {})", session, generation),
            WatcherEvent::RefreshCompleted { tag, snapshot } => write!(
                f,
                "RefreshCompleted({}, gen {}, {:?} playing={})",
                tag.session, tag.generation, snapshot.title, snapshot.is_playing
            ),
            WatcherEvent::CommandCompleted { command, result } => {
                write!(f, "CommandCompleted({}, ok={})", command, result.is_ok())
            }
            WatcherEvent::PollTick => write!(f, "PollTick"),
        }
    }
}

struct ActiveSession {
    id: SessionId,
    session: Arc<dyn MediaSession>,
    subscriptions: Vec<Subscription>,
    refresh_in_flight: bool,
    refresh_pending: bool,
}

pub struct SessionWatcher {
    provider: Arc<dyn MediaProvider>,
    sink: EventSink,
    metadata_retry_delay: Duration,
    refresh_timeout: Duration,
    manager: Option<Arc<dyn SessionManager>>,
    manager_subscription: Option<Subscription>,
    starting: bool,
    active: Option<ActiveSession>,
    generation: u64,
    last_emitted: Option<MediaSnapshot>,
    status: ProviderStatus,
}

impl SessionWatcher {
    pub fn new(provider: Arc<dyn MediaProvider>, sink: EventSink, config: &Config) -> Self {
        Self {
            provider,
            sink,
            metadata_retry_delay: config.metadata_retry_delay,
            refresh_timeout: config.refresh_timeout,
            manager: None,
            manager_subscription: None,
            starting: false,
            active: None,
            generation: 0,
            last_emitted: None,
            status: ProviderStatus::Disconnected,
        }
    }

    pub fn status(&self) -> ProviderStatus {
        self.status.clone()
    }

    pub fn current_session(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|active| &active.id)
    }

    pub fn last_snapshot(&self) -> Option<&MediaSnapshot> {
        self.last_emitted.as_ref()
    }

    /// Number of live change subscriptions on the active session.
    pub fn subscription_count(&self) -> usize {
        self.active
            .as_ref()
            .map(|active| active.subscriptions.len())
            .unwrap_or(0)
    }

    /// Request the provider's session manager. Idempotent.
    pub fn start(&mut self) {
        if self.manager.is_some() || self.starting {
            return;
        }

        log::info!("Requesting media session manager");
        self.starting = true;
        self.status = ProviderStatus::Connecting;

        let provider = self.provider.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let result = provider.request_session_manager().await;
            sink(WatcherEvent::ManagerResolved(result));
        });
    }

    /// Apply one event. Returns a snapshot when one should be published.
    pub fn handle(&mut self, event: WatcherEvent) -> Option<MediaSnapshot> {
        match event {
            WatcherEvent::ManagerResolved(result) => self.on_manager_resolved(result),
            WatcherEvent::SessionChanged => self.on_provider_session_changed(),
            WatcherEvent::SessionUpdated {
                session,
                generation,
            } => self.on_session_updated(&session, generation),
            WatcherEvent::RefreshCompleted { tag, snapshot } => {
                self.on_refresh_completed(tag, snapshot)
            }
            WatcherEvent::CommandCompleted { command, result } => {
                match result {
                    Ok(()) => log::debug!("Transport command {} accepted", command),
                    Err(e) => log::warn!("Transport command {} failed: {}", command, e),
                }
                None
            }
            WatcherEvent::PollTick => self.poll_tick(),
        }
    }

    fn on_manager_resolved(
        &mut self,
        result: ProviderResult<Arc<dyn SessionManager>>,
    ) -> Option<MediaSnapshot> {
        self.starting = false;

        let manager = match result {
            Ok(manager) => manager,
            Err(e) => {
                log::warn!("{}; retrying on next poll", e);
                self.status = ProviderStatus::Disconnected;
                return self.emit(MediaSnapshot::empty());
            }
        };

        log::info!("Media session manager acquired");
        let sink = self.sink.clone();
        let callback: Callback = Arc::new(move || sink(WatcherEvent::SessionChanged));
        match manager.on_current_session_changed(callback) {
            Ok(subscription) => self.manager_subscription = Some(subscription),
            Err(e) => log::warn!(
                "Could not subscribe to session changes, relying on polling: {}",
                e
            ),
        }

        self.manager = Some(manager);
        self.status = ProviderStatus::Connected;
        self.on_provider_session_changed()
    }

    /// Re-read the foreground session from the manager and switch to it.
    pub fn on_provider_session_changed(&mut self) -> Option<MediaSnapshot> {
        let manager = self.manager.clone()?;
        match manager.current_session() {
            Ok(next) => self.on_session_changed(next),
            Err(e) => self.lose_manager(e),
        }
    }

    /// Replace the active session: unsubscribe the old one, subscribe the new one, refresh.
    pub fn on_session_changed(
        &mut self,
        next: Option<Arc<dyn MediaSession>>,
    ) -> Option<MediaSnapshot> {
        self.release_session();
        self.generation += 1;

        let Some(session) = next else {
            log::info!("No active media session");
            self.status = ProviderStatus::NoSession;
            return self.emit(MediaSnapshot::empty());
        };

        let id = session.id();
        let subscriptions = match self.subscribe(session.as_ref(), &id) {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                log::warn!("Media session {} rejected subscriptions: {}", id, e);
                self.status = ProviderStatus::NoSession;
                return self.emit(MediaSnapshot::empty());
            }
        };

        log::info!("Following media session {}", id);
        self.status = ProviderStatus::Connected;
        self.active = Some(ActiveSession {
            id,
            session,
            subscriptions,
            refresh_in_flight: false,
            refresh_pending: false,
        });
        self.refresh()
    }

    fn subscribe(
        &self,
        session: &dyn MediaSession,
        id: &SessionId,
    ) -> ProviderResult<Vec<Subscription>> {
        let callback = || -> Callback {
            let sink = self.sink.clone();
            let session = id.clone();
            let generation = self.generation;
            Arc::new(move || {
                sink(WatcherEvent::SessionUpdated {
                    session: session.clone(),
                    generation,
                })
            })
        };

        // Partial failures drop the earlier subscriptions, which deregisters them.
        Ok(vec![
            session.on_properties_changed(callback())?,
            session.on_playback_info_changed(callback())?,
            session.on_timeline_changed(callback())?,
        ])
    }

    fn release_session(&mut self) {
        if let Some(active) = self.active.take() {
            for subscription in active.subscriptions {
                if let Err(e) = subscription.cancel() {
                    log::debug!(
                        "Ignoring failed unsubscribe from session {}: {}",
                        active.id,
                        e
                    );
                }
            }
        }
    }

    fn lose_manager(&mut self, err: ProviderError) -> Option<MediaSnapshot> {
        log::warn!("Lost media session manager: {}", err);
        self.release_manager();
        self.emit(MediaSnapshot::empty())
    }

    fn release_manager(&mut self) {
        self.release_session();
        self.generation += 1;
        if let Some(subscription) = self.manager_subscription.take() {
            if let Err(e) = subscription.cancel() {
                log::debug!("Ignoring failed unsubscribe from session manager: {}", e);
            }
        }
        self.manager = None;
        self.status = ProviderStatus::Disconnected;
    }

    /// Query the active session. At most one refresh runs per session; requests
    /// arriving meanwhile collapse into a single follow-up.
    pub fn refresh(&mut self) -> Option<MediaSnapshot> {
        let generation = self.generation;
        let Some(active) = self.active.as_mut() else {
            return self.emit(MediaSnapshot::empty());
        };

        if active.refresh_in_flight {
            active.refresh_pending = true;
            return None;
        }
        active.refresh_in_flight = true;
        active.refresh_pending = false;

        let tag = RefreshTag {
            session: active.id.clone(),
            generation,
        };
        let session = active.session.clone();
        let sink = self.sink.clone();
        let retry_delay = self.metadata_retry_delay;
        let timeout = self.refresh_timeout;

        tokio::spawn(async move {
            let snapshot =
                match tokio::time::timeout(timeout, fetch_snapshot(session.as_ref(), retry_delay))
                    .await
                {
                    Ok(snapshot) => snapshot,
                    Err(_) => {
                        log::warn!(
                            "Refresh of session {} timed out after {:?}",
                            tag.session,
                            timeout
                        );
                        MediaSnapshot::empty()
                    }
                };
            sink(WatcherEvent::RefreshCompleted { tag, snapshot });
        });

        None
    }

    fn on_refresh_completed(
        &mut self,
        tag: RefreshTag,
        snapshot: MediaSnapshot,
    ) -> Option<MediaSnapshot> {
        let generation = self.generation;
        let active = match self.active.as_mut() {
            Some(active) if active.id == tag.session && generation == tag.generation => active,
            _ => {
                log::debug!(
                    "Discarding stale refresh for session {} (gen {})",
                    tag.session,
                    tag.generation
                );
                return None;
            }
        };

        active.refresh_in_flight = false;
        let follow_up = active.refresh_pending;

        let emitted = self.emit(snapshot);
        if follow_up {
            self.refresh();
        }
        emitted
    }

    fn on_session_updated(&mut self, session: &SessionId, generation: u64) -> Option<MediaSnapshot> {
        let current = self
            .active
            .as_ref()
            .is_some_and(|active| &active.id == session && generation == self.generation);
        if !current {
            log::debug!("Ignoring change notification from old session {}", session);
            return None;
        }
        self.refresh()
    }

    /// Reconcile against the provider; push notifications are not fully reliable.
    pub fn poll_tick(&mut self) -> Option<MediaSnapshot> {
        let Some(manager) = self.manager.clone() else {
            self.start();
            return None;
        };

        match manager.current_session() {
            Err(e) => self.lose_manager(e),
            Ok(next) => {
                let next_id = next.as_ref().map(|session| session.id());
                let cached = self.current_session().cloned();
                if next_id != cached {
                    log::debug!(
                        "Poll found session change: {:?} -> {:?}",
                        cached.as_ref().map(SessionId::as_str),
                        next_id.as_ref().map(SessionId::as_str)
                    );
                    self.on_session_changed(next)
                } else {
                    self.refresh()
                }
            }
        }
    }

    /// Forward a transport command. Failures are logged when the result comes back.
    pub fn send_command(&mut self, command: TransportCommand) {
        let Some(active) = self.active.as_ref() else {
            log::warn!("No active media session for {}", command);
            return;
        };

        let command = match command {
            TransportCommand::TogglePlayPause => {
                let playing = self
                    .last_emitted
                    .as_ref()
                    .is_some_and(|snapshot| snapshot.is_playing);
                if playing {
                    TransportCommand::Pause
                } else {
                    TransportCommand::Play
                }
            }
            other => other,
        };

        log::debug!("Sending {} to session {}", command, active.id);
        let session = active.session.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let result = match command {
                TransportCommand::Play | TransportCommand::TogglePlayPause => session.play().await,
                TransportCommand::Pause => session.pause().await,
                TransportCommand::Seek { position_ms } => {
                    session.seek(ms_to_ticks(position_ms)).await
                }
                TransportCommand::SkipNext => session.skip_next().await,
                TransportCommand::SkipPrevious => session.skip_previous().await,
            };
            sink(WatcherEvent::CommandCompleted { command, result });
        });
    }

    pub fn play(&mut self) {
        self.send_command(TransportCommand::Play);
    }

    pub fn pause(&mut self) {
        self.send_command(TransportCommand::Pause);
    }

    pub fn seek(&mut self, position_ms: u64) {
        self.send_command(TransportCommand::Seek { position_ms });
    }

    pub fn skip_next(&mut self) {
        self.send_command(TransportCommand::SkipNext);
    }

    pub fn skip_previous(&mut self) {
        self.send_command(TransportCommand::SkipPrevious);
    }

    /// Drop every provider registration.
    pub fn shutdown(&mut self) {
        log::info!("Session watcher shutting down");
        self.release_manager();
    }

    fn emit(&mut self, snapshot: MediaSnapshot) -> Option<MediaSnapshot> {
        if let Some(last) = &self.last_emitted {
            if last.same_content(&snapshot) {
                log::debug!("Suppressing unchanged snapshot");
                return None;
            }
        }
        self.last_emitted = Some(snapshot.clone());
        Some(snapshot)
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        self.release_manager();
    }
}

async fn read_properties(session: &dyn MediaSession) -> Option<MediaProperties> {
    match session.media_properties().await {
        Ok(properties) => properties,
        Err(e) => {
            log::debug!("Media properties of {} unavailable: {}", session.id(), e);
            None
        }
    }
}

/// Query one snapshot of `session`. Never fails: missing pieces default to empty/zero.
///
/// Providers sometimes answer before metadata is populated, so blank
/// properties are re-queried once after `retry_delay`.
pub async fn fetch_snapshot(session: &dyn MediaSession, retry_delay: Duration) -> MediaSnapshot {
    let info = match session.playback_info() {
        Ok(info) => info,
        Err(e) => {
            log::debug!("Session {} unusable, reporting no media: {}", session.id(), e);
            return MediaSnapshot::empty();
        }
    };

    let mut properties = read_properties(session).await;
    if !properties.as_ref().is_some_and(MediaProperties::has_metadata) {
        tokio::time::sleep(retry_delay).await;
        match read_properties(session).await {
            Some(retried) if retried.has_metadata() || properties.is_none() => {
                properties = Some(retried)
            }
            _ => log::debug!(
                "Session {}: {}, using what is available",
                session.id(),
                ProviderError::MetadataIncomplete
            ),
        }
    }

    let timeline = session.timeline_properties().unwrap_or_else(|e| {
        log::debug!("Timeline of {} unavailable: {}", session.id(), e);
        TimelineProperties::default()
    });
    let position_ms = if timeline.duration_ms > 0 {
        timeline.position_ms.min(timeline.duration_ms)
    } else {
        timeline.position_ms
    };

    let properties = properties.unwrap_or_default();
    MediaSnapshot {
        title: properties.title,
        artist: properties.artist,
        is_playing: info.status == PlaybackStatus::Playing,
        duration_ms: timeline.duration_ms,
        position_ms,
        album_art: properties
            .thumbnail
            .filter(|bytes| !bytes.is_empty())
            .map(Arc::from),
        observed_at: SystemTime::now(),
    }
}
