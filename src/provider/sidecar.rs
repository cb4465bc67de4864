//! Provider backed by a helper process that speaks JSON lines.
//!
//! The helper reports media sessions on stdout and receives transport
//! commands on stdin; its stderr is forwarded to the log. The provider keeps
//! a cache of what the helper last reported and answers queries from it.

use anyhow::{Context, Result};
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use super::{
    ticks_to_ms, Callback, Listeners, MediaProperties, MediaProvider, MediaSession, PlaybackInfo,
    ProviderResult, SessionId, SessionManager, Subscription, TimelineProperties,
};
use crate::config::SidecarConfig;
use crate::error::ProviderError;
use crate::types::PlaybackStatus;
use futures::future::BoxFuture;

/// Messages the helper writes to stdout, one JSON object per line.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarMessage {
    Session {
        session_id: Option<String>,
    },
    Properties {
        session_id: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        artist: String,
        /// Base64, optionally as a `data:` URL.
        #[serde(default)]
        thumbnail: Option<String>,
    },
    Playback {
        session_id: String,
        status: PlaybackStatus,
    },
    Timeline {
        session_id: String,
        position_ms: u64,
        duration_ms: u64,
    },
    Closed {
        session_id: String,
    },
    Error {
        message: String,
    },
}

/// Commands written to the helper's stdin.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarCommand<'a> {
    Play { session_id: &'a str },
    Pause { session_id: &'a str },
    Seek { session_id: &'a str, position_ms: u64 },
    SkipNext { session_id: &'a str },
    SkipPrevious { session_id: &'a str },
}

impl SidecarCommand<'_> {
    fn name(&self) -> &'static str {
        match self {
            SidecarCommand::Play { .. } => "play",
            SidecarCommand::Pause { .. } => "pause",
            SidecarCommand::Seek { .. } => "seek",
            SidecarCommand::SkipNext { .. } => "skip_next",
            SidecarCommand::SkipPrevious { .. } => "skip_previous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionTopic {
    Properties,
    Playback,
    Timeline,
}

#[derive(Debug, Clone, Default)]
struct CachedSession {
    status: PlaybackStatus,
    properties: Option<MediaProperties>,
    timeline: TimelineProperties,
}

#[derive(Debug, Default)]
struct SessionCache {
    /// Bumped on every spawn; output from an older process is dropped.
    generation: u64,
    current: Option<SessionId>,
    sessions: HashMap<SessionId, CachedSession>,
    exited: bool,
}

/// Who to tell about a message once the cache lock is released.
enum Notice {
    Nobody,
    SessionChanged,
    Session(SessionId, SessionTopic),
}

/// Commands queued for the stdin writer before `send` gives up.
const COMMAND_QUEUE_DEPTH: usize = 64;

struct SidecarProcess {
    child: Child,
    commands: SyncSender<String>,
}

struct SidecarInner {
    config: SidecarConfig,
    process: Mutex<Option<SidecarProcess>>,
    cache: Mutex<SessionCache>,
    session_changed: Listeners<()>,
    session_events: Listeners<(SessionId, SessionTopic)>,
}

/// Manages the helper process and exposes it as a [`MediaProvider`].
#[derive(Clone)]
pub struct SidecarProvider {
    inner: Arc<SidecarInner>,
}

impl SidecarProvider {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            inner: Arc::new(SidecarInner {
                config,
                process: Mutex::new(None),
                cache: Mutex::new(SessionCache::default()),
                session_changed: Listeners::default(),
                session_events: Listeners::default(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Stop the helper: SIGTERM, then SIGKILL after two seconds.
    pub fn stop(&self) -> Result<()> {
        self.inner.stop()
    }
}

impl MediaProvider for SidecarProvider {
    fn request_session_manager(&self) -> BoxFuture<'_, ProviderResult<Arc<dyn SessionManager>>> {
        Box::pin(async move {
            // Restarting a wedged helper can wait on it for a couple of seconds.
            let inner = self.inner.clone();
            tokio::task::spawn_blocking(move || inner.ensure_running())
                .await
                .map_err(|e| ProviderError::Unavailable(format!("sidecar start failed: {}", e)))??;

            let manager: Arc<dyn SessionManager> = Arc::new(SidecarManager {
                inner: self.inner.clone(),
            });
            Ok(manager)
        })
    }
}

impl SidecarInner {
    fn is_running(&self) -> bool {
        let mut process = self.process.lock();
        if let Some(process) = process.as_mut() {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    log::warn!("Sidecar process has exited: {}", status);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    log::error!("Error checking sidecar status: {}", e);
                    false
                }
            }
        } else {
            false
        }
    }

    /// Make sure a helper is running and still reporting.
    fn ensure_running(self: &Arc<Self>) -> ProviderResult<()> {
        if self.is_running() {
            if !self.cache.lock().exited {
                return Ok(());
            }
            // Alive but no longer talking to us.
            log::warn!("Sidecar stopped reporting, restarting it");
            if let Err(e) = self.stop() {
                log::error!("Error stopping unresponsive sidecar: {:#}", e);
            }
        }

        self.spawn().map_err(|e| ProviderError::Unavailable(format!("{:#}", e)))
    }

    /// Spawn the helper and start the stdio threads.
    fn spawn(self: &Arc<Self>) -> Result<()> {
        log::info!(
            "Spawning sidecar helper: {} {:?}",
            self.config.program,
            self.config.args
        );

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn sidecar helper {}", self.config.program))?;

        log::info!("Sidecar process spawned with PID: {}", child.id());

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture sidecar stdout")?;
        let stderr = child
            .stderr
            .take()
            .context("Failed to capture sidecar stderr")?;
        let stdin = child
            .stdin
            .take()
            .context("Failed to capture sidecar stdin")?;

        let generation = {
            let mut cache = self.cache.lock();
            let generation = cache.generation + 1;
            *cache = SessionCache {
                generation,
                ..SessionCache::default()
            };
            generation
        };

        let (commands, queue) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
        *self.process.lock() = Some(SidecarProcess { child, commands });

        let weak = Arc::downgrade(self);
        thread::spawn(move || write_stdin(stdin, queue));
        thread::spawn(move || read_stdout(stdout, generation, weak));
        thread::spawn(move || read_stderr(stderr));

        Ok(())
    }

    /// Fold one helper message into the cache, then notify listeners.
    fn apply(&self, generation: u64, message: SidecarMessage) {
        let notice = {
            let mut cache = self.cache.lock();
            if cache.generation != generation {
                log::debug!("Ignoring output from a previous sidecar process");
                return;
            }
            Self::update(&mut cache, message)
        };

        match notice {
            Notice::Nobody => {}
            Notice::SessionChanged => self.session_changed.notify(&()),
            Notice::Session(id, topic) => self.session_events.notify(&(id, topic)),
        }
    }

    fn update(cache: &mut SessionCache, message: SidecarMessage) -> Notice {
        match message {
            SidecarMessage::Session { session_id } => {
                let session_id = session_id.filter(|id| !id.is_empty()).map(SessionId::new);
                log::debug!("Sidecar current session: {:?}", session_id);
                if let Some(id) = &session_id {
                    cache.sessions.entry(id.clone()).or_default();
                }
                cache.current = session_id;
                Notice::SessionChanged
            }
            SidecarMessage::Properties {
                session_id,
                title,
                artist,
                thumbnail,
            } => {
                let id = SessionId::new(session_id);
                let thumbnail = thumbnail.and_then(|encoded| decode_thumbnail(&encoded));
                cache.sessions.entry(id.clone()).or_default().properties = Some(MediaProperties {
                    title,
                    artist,
                    thumbnail,
                });
                Notice::Session(id, SessionTopic::Properties)
            }
            SidecarMessage::Playback { session_id, status } => {
                let id = SessionId::new(session_id);
                cache.sessions.entry(id.clone()).or_default().status = status;
                Notice::Session(id, SessionTopic::Playback)
            }
            SidecarMessage::Timeline {
                session_id,
                position_ms,
                duration_ms,
            } => {
                let id = SessionId::new(session_id);
                cache.sessions.entry(id.clone()).or_default().timeline = TimelineProperties {
                    position_ms,
                    duration_ms,
                };
                Notice::Session(id, SessionTopic::Timeline)
            }
            SidecarMessage::Closed { session_id } => {
                let id = SessionId::new(session_id);
                log::debug!("Sidecar session closed: {}", id);
                cache.sessions.remove(&id);
                if cache.current.as_ref() == Some(&id) {
                    cache.current = None;
                    Notice::SessionChanged
                } else {
                    Notice::Nobody
                }
            }
            SidecarMessage::Error { message } => {
                log::error!("Sidecar error: {}", message);
                Notice::Nobody
            }
        }
    }

    fn mark_exited(&self, generation: u64) {
        {
            let mut cache = self.cache.lock();
            if cache.generation != generation {
                return;
            }
            cache.exited = true;
            cache.current = None;
            cache.sessions.clear();
        }
        // Lets the watcher notice right away instead of on the next poll.
        self.session_changed.notify(&());
    }

    /// Queue a command for the stdin writer. Never waits on the helper.
    fn send(&self, command: SidecarCommand<'_>) -> ProviderResult<()> {
        let name = command.name();
        let mut line = serde_json::to_string(&command)
            .map_err(|e| ProviderError::command_failed(name, e))?;
        line.push('\n');

        let process = self.process.lock();
        let process = process
            .as_ref()
            .ok_or_else(|| ProviderError::command_failed(name, "sidecar is not running"))?;
        process.commands.try_send(line).map_err(|e| match e {
            TrySendError::Full(_) => {
                ProviderError::command_failed(name, "sidecar is not reading commands")
            }
            TrySendError::Disconnected(_) => {
                ProviderError::command_failed(name, "sidecar stdin is closed")
            }
        })
    }

    fn stop(&self) -> Result<()> {
        let process = self.process.lock().take();
        let Some(SidecarProcess {
            mut child,
            commands,
        }) = process
        else {
            return Ok(());
        };
        log::info!("Stopping sidecar process with PID {}...", child.id());

        // The writer closes stdin once the queue drains; most helpers exit on EOF.
        drop(commands);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = child.id();
            log::info!("Sending SIGTERM to sidecar process {}", pid);
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::debug!("SIGTERM to sidecar failed: {}", e);
            }
        }

        #[cfg(windows)]
        {
            log::info!("Killing sidecar process (Windows)");
            child.kill().ok();
        }

        let max_wait = Duration::from_millis(2000);
        let check_interval = Duration::from_millis(100);
        let mut waited = Duration::ZERO;

        while waited < max_wait {
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("Sidecar process exited gracefully with status: {:?}", status);
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("Error checking sidecar status: {}", e);
                    break;
                }
            }
            thread::sleep(check_interval);
            waited += check_interval;
        }

        log::warn!(
            "Sidecar didn't stop after {}ms, sending SIGKILL...",
            max_wait.as_millis()
        );
        child.kill().context("Failed to kill sidecar process")?;
        child.wait().context("Failed to wait for sidecar process")?;
        log::info!("Sidecar process forcefully terminated");
        Ok(())
    }
}

impl Drop for SidecarInner {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Error stopping sidecar in Drop: {}", e);
        }
    }
}

fn decode_thumbnail(encoded: &str) -> Option<Vec<u8>> {
    let payload = match encoded.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => encoded,
    };
    match base64::engine::general_purpose::STANDARD.decode(payload.trim()) {
        Ok(bytes) if !bytes.is_empty() => Some(bytes),
        Ok(_) => None,
        Err(e) => {
            log::warn!("Ignoring undecodable sidecar thumbnail: {}", e);
            None
        }
    }
}

/// Call `on_line` for every non-blank line until EOF or a read error.
///
/// Invalid UTF-8 is replaced rather than treated as the end of the stream.
fn for_each_line(reader: impl Read, mut on_line: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if !line.is_empty() {
            on_line(line);
        }
    }
}

/// Read stdout from the sidecar (JSON messages)
fn read_stdout(stdout: ChildStdout, generation: u64, inner: Weak<SidecarInner>) {
    let result = for_each_line(stdout, |line| {
        log::debug!("Sidecar stdout: {}", line);

        let Some(inner) = inner.upgrade() else {
            return;
        };
        match serde_json::from_str::<SidecarMessage>(line) {
            Ok(message) => inner.apply(generation, message),
            Err(e) => log::error!("Failed to parse sidecar message: {} - {}", e, line),
        }
    });
    if let Err(e) = result {
        log::error!("Error reading sidecar stdout: {}", e);
    }

    log::warn!("Sidecar stdout reader stopped");
    if let Some(inner) = inner.upgrade() {
        inner.mark_exited(generation);
    }
}

/// Read stderr from the sidecar (debug logs)
fn read_stderr(stderr: ChildStderr) {
    if let Err(e) = for_each_line(stderr, |line| log::info!("[Sidecar] {}", line)) {
        log::error!("Error reading sidecar stderr: {}", e);
    }
    log::debug!("Sidecar stderr reader stopped");
}

/// Write queued commands to the sidecar's stdin until the queue closes or a write fails.
fn write_stdin(mut stdin: ChildStdin, queue: Receiver<String>) {
    for line in queue {
        if let Err(e) = stdin.write_all(line.as_bytes()).and_then(|_| stdin.flush()) {
            log::error!("Error writing to sidecar stdin: {}", e);
            break;
        }
    }
    log::debug!("Sidecar stdin writer stopped");
}

struct SidecarManager {
    inner: Arc<SidecarInner>,
}

impl SessionManager for SidecarManager {
    fn current_session(&self) -> ProviderResult<Option<Arc<dyn MediaSession>>> {
        let cache = self.inner.cache.lock();
        if cache.exited {
            return Err(ProviderError::Unavailable(
                "sidecar helper exited".to_string(),
            ));
        }
        Ok(cache.current.clone().map(|id| {
            let session: Arc<dyn MediaSession> = Arc::new(SidecarSession {
                id,
                inner: self.inner.clone(),
            });
            session
        }))
    }

    fn on_current_session_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        Ok(self.inner.session_changed.register((), callback))
    }
}

struct SidecarSession {
    id: SessionId,
    inner: Arc<SidecarInner>,
}

impl SidecarSession {
    fn cached<T>(&self, read: impl FnOnce(&CachedSession) -> T) -> ProviderResult<T> {
        self.inner
            .cache
            .lock()
            .sessions
            .get(&self.id)
            .map(read)
            .ok_or_else(|| ProviderError::SessionStale(self.id.to_string()))
    }

    fn register(&self, topic: SessionTopic, callback: Callback) -> ProviderResult<Subscription> {
        self.cached(|_| ())?;
        Ok(self
            .inner
            .session_events
            .register((self.id.clone(), topic), callback))
    }

    fn command<'a>(&'a self, command: SidecarCommand<'a>) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.cached(|_| ())?;
            self.inner.send(command)
        })
    }
}

impl MediaSession for SidecarSession {
    fn id(&self) -> SessionId {
        self.id.clone()
    }

    fn playback_info(&self) -> ProviderResult<PlaybackInfo> {
        self.cached(|session| PlaybackInfo {
            status: session.status,
        })
    }

    fn media_properties(&self) -> BoxFuture<'_, ProviderResult<Option<MediaProperties>>> {
        Box::pin(async move { self.cached(|session| session.properties.clone()) })
    }

    fn timeline_properties(&self) -> ProviderResult<TimelineProperties> {
        self.cached(|session| session.timeline)
    }

    fn on_properties_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        self.register(SessionTopic::Properties, callback)
    }

    fn on_playback_info_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        self.register(SessionTopic::Playback, callback)
    }

    fn on_timeline_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        self.register(SessionTopic::Timeline, callback)
    }

    fn play(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command(SidecarCommand::Play {
            session_id: self.id.as_str(),
        })
    }

    fn pause(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command(SidecarCommand::Pause {
            session_id: self.id.as_str(),
        })
    }

    fn seek(&self, ticks: i64) -> BoxFuture<'_, ProviderResult<()>> {
        self.command(SidecarCommand::Seek {
            session_id: self.id.as_str(),
            position_ms: ticks_to_ms(ticks),
        })
    }

    fn skip_next(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command(SidecarCommand::SkipNext {
            session_id: self.id.as_str(),
        })
    }

    fn skip_previous(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command(SidecarCommand::SkipPrevious {
            session_id: self.id.as_str(),
        })
    }
}
