//! Provider backed by the Windows global system media transport controls.
//!
//! WinRT async operations are driven to completion with
//! `futures::executor::block_on` on tokio's blocking pool so the island loop
//! never waits on them.

use futures::executor::block_on;
use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::sync::Arc;
use windows::{
    core::Result as WinResult,
    Foundation::TypedEventHandler,
    Media::Control::{
        GlobalSystemMediaTransportControlsSession, GlobalSystemMediaTransportControlsSessionManager,
        GlobalSystemMediaTransportControlsSessionMediaProperties,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus,
    },
    Storage::Streams::{
        DataReader, IRandomAccessStreamReference, IRandomAccessStreamWithContentType,
        InputStreamOptions,
    },
};

use super::{
    ticks_to_ms, Callback, MediaProperties, MediaProvider, MediaSession, PlaybackInfo,
    ProviderResult, SessionId, SessionManager, Subscription, TimelineProperties,
};
use crate::error::ProviderError;
use crate::types::PlaybackStatus;

type Session = GlobalSystemMediaTransportControlsSession;
type Manager = GlobalSystemMediaTransportControlsSessionManager;

fn block_on_operation<O, T>(operation: O) -> WinResult<T>
where
    O: IntoFuture<Output = WinResult<T>>,
{
    block_on(operation.into_future())
}

async fn run_blocking<T, F>(work: F) -> ProviderResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ProviderResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProviderError::Io(format!("blocking media call panicked: {}", e)))?
}

fn stale(id: &SessionId) -> impl Fn(windows::core::Error) -> ProviderError + '_ {
    move |e| ProviderError::SessionStale(format!("{}: {}", id, e.message()))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProvider;

impl WindowsProvider {
    pub fn new() -> Self {
        Self
    }
}

impl MediaProvider for WindowsProvider {
    fn request_session_manager(&self) -> BoxFuture<'_, ProviderResult<Arc<dyn SessionManager>>> {
        Box::pin(async {
            let manager = run_blocking(|| {
                Manager::RequestAsync()
                    .and_then(block_on_operation)
                    .map_err(|e| ProviderError::Unavailable(e.message().to_string()))
            })
            .await?;
            let manager: Arc<dyn SessionManager> = Arc::new(WindowsSessionManager { manager });
            Ok(manager)
        })
    }
}

struct WindowsSessionManager {
    manager: Manager,
}

impl SessionManager for WindowsSessionManager {
    fn current_session(&self) -> ProviderResult<Option<Arc<dyn MediaSession>>> {
        let session = match self.manager.GetCurrentSession() {
            Ok(session) => session,
            // A null session comes back as an error carrying a success code.
            Err(e) if e.code().is_ok() => return Ok(None),
            Err(e) => return Err(ProviderError::Unavailable(e.message().to_string())),
        };
        let id = session
            .SourceAppUserModelId()
            .map(|id| SessionId::new(id.to_string_lossy()))
            .map_err(|e| ProviderError::SessionStale(e.message().to_string()))?;

        let session: Arc<dyn MediaSession> = Arc::new(WindowsSession { id, session });
        Ok(Some(session))
    }

    fn on_current_session_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        let token = self
            .manager
            .CurrentSessionChanged(&TypedEventHandler::new(move |_, _| {
                callback();
                Ok(())
            }))
            .map_err(|e| ProviderError::Unavailable(e.message().to_string()))?;

        let manager = self.manager.clone();
        Ok(Subscription::new(move || {
            manager
                .RemoveCurrentSessionChanged(token)
                .map_err(|e| ProviderError::Unavailable(e.message().to_string()))
        }))
    }
}

struct WindowsSession {
    id: SessionId,
    session: Session,
}

impl WindowsSession {
    fn command(
        &self,
        name: &'static str,
        issue: impl FnOnce(&Session) -> WinResult<bool> + Send + 'static,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let session = self.session.clone();
        Box::pin(async move {
            let accepted = run_blocking(move || {
                issue(&session).map_err(|e| ProviderError::command_failed(name, e.message()))
            })
            .await?;
            if accepted {
                Ok(())
            } else {
                Err(ProviderError::command_failed(name, "rejected by the session"))
            }
        })
    }
}

fn map_status(status: GlobalSystemMediaTransportControlsSessionPlaybackStatus) -> PlaybackStatus {
    match status {
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Closed => PlaybackStatus::Closed,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Opened => PlaybackStatus::Opened,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Changing => {
            PlaybackStatus::Changing
        }
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Stopped => PlaybackStatus::Stopped,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing => PlaybackStatus::Playing,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus::Paused => PlaybackStatus::Paused,
        _ => PlaybackStatus::Unknown,
    }
}

fn load_thumbnail_bytes(
    props: &GlobalSystemMediaTransportControlsSessionMediaProperties,
) -> WinResult<Option<Vec<u8>>> {
    let reference: IRandomAccessStreamReference = match props.Thumbnail() {
        Ok(reference) => reference,
        Err(_) => return Ok(None),
    };

    let stream: IRandomAccessStreamWithContentType =
        block_on_operation(reference.OpenReadAsync()?)?;
    let input_stream = stream.GetInputStreamAt(0)?;
    let reader = DataReader::CreateDataReader(&input_stream)?;
    reader.SetInputStreamOptions(InputStreamOptions::Partial)?;

    let mut buffer = Vec::new();
    const CHUNK: u32 = 64 * 1024;

    loop {
        let loaded = block_on_operation(reader.LoadAsync(CHUNK)?)?;
        if loaded == 0 {
            break;
        }
        let mut chunk = vec![0u8; loaded as usize];
        reader.ReadBytes(&mut chunk)?;
        buffer.extend_from_slice(&chunk);
        if loaded < CHUNK {
            break;
        }
    }

    Ok((!buffer.is_empty()).then_some(buffer))
}

fn read_properties(session: &Session) -> WinResult<MediaProperties> {
    let props = block_on_operation(session.TryGetMediaPropertiesAsync()?)?;
    let thumbnail = load_thumbnail_bytes(&props).unwrap_or_else(|e| {
        log::debug!("Thumbnail unavailable: {}", e.message());
        None
    });
    Ok(MediaProperties {
        title: props.Title()?.to_string_lossy(),
        artist: props.Artist()?.to_string_lossy(),
        thumbnail,
    })
}

impl MediaSession for WindowsSession {
    fn id(&self) -> SessionId {
        self.id.clone()
    }

    fn playback_info(&self) -> ProviderResult<PlaybackInfo> {
        let status = self
            .session
            .GetPlaybackInfo()
            .and_then(|info| info.PlaybackStatus())
            .map_err(stale(&self.id))?;
        Ok(PlaybackInfo {
            status: map_status(status),
        })
    }

    fn media_properties(&self) -> BoxFuture<'_, ProviderResult<Option<MediaProperties>>> {
        let session = self.session.clone();
        let id = self.id.clone();
        Box::pin(async move {
            run_blocking(move || read_properties(&session).map(Some).map_err(stale(&id))).await
        })
    }

    fn timeline_properties(&self) -> ProviderResult<TimelineProperties> {
        let timeline = self.session.GetTimelineProperties().map_err(stale(&self.id))?;
        let start = timeline.StartTime().map_err(stale(&self.id))?.Duration;
        let end = timeline.EndTime().map_err(stale(&self.id))?.Duration;
        let position = timeline.Position().map_err(stale(&self.id))?.Duration;

        Ok(TimelineProperties {
            position_ms: ticks_to_ms(position.saturating_sub(start)),
            duration_ms: ticks_to_ms(end.saturating_sub(start)),
        })
    }

    fn on_properties_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        let token = self
            .session
            .MediaPropertiesChanged(&TypedEventHandler::new(move |_, _| {
                callback();
                Ok(())
            }))
            .map_err(stale(&self.id))?;
        let session = self.session.clone();
        let id = self.id.clone();
        Ok(Subscription::new(move || {
            session.RemoveMediaPropertiesChanged(token).map_err(stale(&id))
        }))
    }

    fn on_playback_info_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        let token = self
            .session
            .PlaybackInfoChanged(&TypedEventHandler::new(move |_, _| {
                callback();
                Ok(())
            }))
            .map_err(stale(&self.id))?;
        let session = self.session.clone();
        let id = self.id.clone();
        Ok(Subscription::new(move || {
            session.RemovePlaybackInfoChanged(token).map_err(stale(&id))
        }))
    }

    fn on_timeline_changed(&self, callback: Callback) -> ProviderResult<Subscription> {
        let token = self
            .session
            .TimelinePropertiesChanged(&TypedEventHandler::new(move |_, _| {
                callback();
                Ok(())
            }))
            .map_err(stale(&self.id))?;
        let session = self.session.clone();
        let id = self.id.clone();
        Ok(Subscription::new(move || {
            session.RemoveTimelinePropertiesChanged(token).map_err(stale(&id))
        }))
    }

    fn play(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command("play", |session| block_on_operation(session.TryPlayAsync()?))
    }

    fn pause(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command("pause", |session| block_on_operation(session.TryPauseAsync()?))
    }

    fn seek(&self, ticks: i64) -> BoxFuture<'_, ProviderResult<()>> {
        self.command("seek", move |session| {
            block_on_operation(session.TryChangePlaybackPositionAsync(ticks)?)
        })
    }

    fn skip_next(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command("skip_next", |session| {
            block_on_operation(session.TrySkipNextAsync()?)
        })
    }

    fn skip_previous(&self) -> BoxFuture<'_, ProviderResult<()>> {
        self.command("skip_previous", |session| {
            block_on_operation(session.TrySkipPreviousAsync()?)
        })
    }
}
