//! Interface to the OS media-session provider.
//!
//! The watcher only ever talks to these traits. Change notifications are
//! registered as callbacks and hand back a [`Subscription`]; dropping or
//! cancelling it deregisters the callback.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::ProviderError;
use crate::types::PlaybackStatus;

pub mod sidecar;
#[cfg(windows)]
pub mod windows;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Change-notification callback. Providers may invoke it from any thread.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Provider ticks are 100ns units.
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

pub fn ms_to_ticks(ms: u64) -> i64 {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| ms.checked_mul(TICKS_PER_MILLISECOND))
        .unwrap_or(i64::MAX)
}

pub fn ticks_to_ms(ticks: i64) -> u64 {
    u64::try_from(ticks / TICKS_PER_MILLISECOND).unwrap_or(0)
}

/// Identity of a provider session (the source application id).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackInfo {
    pub status: PlaybackStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaProperties {
    pub title: String,
    pub artist: String,
    pub thumbnail: Option<Vec<u8>>,
}

impl MediaProperties {
    /// Providers answer with blank properties while a track is still loading.
    pub fn has_metadata(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineProperties {
    pub position_ms: u64,
    pub duration_ms: u64,
}

pub trait MediaProvider: Send + Sync {
    fn request_session_manager(&self) -> BoxFuture<'_, ProviderResult<Arc<dyn SessionManager>>>;
}

pub trait SessionManager: Send + Sync {
    fn current_session(&self) -> ProviderResult<Option<Arc<dyn MediaSession>>>;

    fn on_current_session_changed(&self, callback: Callback) -> ProviderResult<Subscription>;
}

pub trait MediaSession: Send + Sync {
    fn id(&self) -> SessionId;

    fn playback_info(&self) -> ProviderResult<PlaybackInfo>;

    fn media_properties(&self) -> BoxFuture<'_, ProviderResult<Option<MediaProperties>>>;

    fn timeline_properties(&self) -> ProviderResult<TimelineProperties>;

    fn on_properties_changed(&self, callback: Callback) -> ProviderResult<Subscription>;

    fn on_playback_info_changed(&self, callback: Callback) -> ProviderResult<Subscription>;

    fn on_timeline_changed(&self, callback: Callback) -> ProviderResult<Subscription>;

    fn play(&self) -> BoxFuture<'_, ProviderResult<()>>;

    fn pause(&self) -> BoxFuture<'_, ProviderResult<()>>;

    fn seek(&self, ticks: i64) -> BoxFuture<'_, ProviderResult<()>>;

    fn skip_next(&self) -> BoxFuture<'_, ProviderResult<()>>;

    fn skip_previous(&self) -> BoxFuture<'_, ProviderResult<()>>;
}

type CancelFn = Box<dyn FnOnce() -> ProviderResult<()> + Send>;

/// Deregistration handle for a change-notification callback.
///
/// Dropping it deregisters as well; a failure on that path is logged and swallowed.
#[must_use = "dropping a Subscription deregisters its callback"]
pub struct Subscription {
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() -> ProviderResult<()> + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) -> ProviderResult<()> {
        match self.cancel.take() {
            Some(cancel) => cancel(),
            None => Ok(()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            if let Err(e) = cancel() {
                log::debug!("Ignoring failed deregistration on drop: {}", e);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct ListenerTable<K> {
    next_id: u64,
    entries: Vec<(u64, K, Callback)>,
}

/// Callback registry keyed by topic, for providers that fan out their own events.
pub struct Listeners<K> {
    table: Arc<Mutex<ListenerTable<K>>>,
}

impl<K> Clone for Listeners<K> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K> Default for Listeners<K> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<K> Listeners<K>
where
    K: PartialEq + Send + 'static,
{
    pub fn register(&self, key: K, callback: Callback) -> Subscription {
        let id = {
            let mut table = self.table.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, key, callback));
            id
        };

        let table: Weak<Mutex<ListenerTable<K>>> = Arc::downgrade(&self.table);
        Subscription::new(move || {
            if let Some(table) = table.upgrade() {
                table.lock().entries.retain(|(entry_id, _, _)| *entry_id != id);
            }
            Ok(())
        })
    }

    /// Invoke every callback registered for `key`. Callbacks run outside the lock.
    pub fn notify(&self, key: &K) {
        let callbacks: Vec<Callback> = self
            .table
            .lock()
            .entries
            .iter()
            .filter(|(_, k, _)| k == key)
            .map(|(_, _, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            callback();
        }
    }

    pub fn count(&self, key: &K) -> usize {
        self.table
            .lock()
            .entries
            .iter()
            .filter(|(_, k, _)| k == key)
            .count()
    }

    pub fn clear(&self) {
        self.table.lock().entries.clear();
    }
}
