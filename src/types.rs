use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Latest known state of the foreground media session.
///
/// A snapshot with an empty title that is not playing means "no active session".
#[derive(Debug, Clone, Serialize)]
pub struct MediaSnapshot {
    pub title: String,
    pub artist: String,
    pub is_playing: bool,
    pub duration_ms: u64,
    pub position_ms: u64,
    #[serde(skip)]
    pub album_art: Option<Arc<[u8]>>,
    #[serde(skip)]
    pub observed_at: SystemTime,
}

impl MediaSnapshot {
    /// The "no media" snapshot emitted whenever a playing session cannot be confirmed.
    pub fn empty() -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            is_playing: false,
            duration_ms: 0,
            position_ms: 0,
            album_art: None,
            observed_at: SystemTime::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && !self.is_playing
    }

    /// Compare everything except `observed_at`.
    pub fn same_content(&self, other: &MediaSnapshot) -> bool {
        self.title == other.title
            && self.artist == other.artist
            && self.is_playing == other.is_playing
            && self.duration_ms == other.duration_ms
            && self.position_ms == other.position_ms
            && self.album_art.as_deref() == other.album_art.as_deref()
    }
}

impl Default for MediaSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Closed,
    Opened,
    Changing,
    Stopped,
    Playing,
    Paused,
    #[serde(other)]
    Unknown,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        PlaybackStatus::Unknown
    }
}

/// Visual mode of the pill, ordered by prominence.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PresentationMode {
    Idle,
    CompactMedia,
    ExpandedMedia,
}

impl PresentationMode {
    pub const ALL: [PresentationMode; 3] = [
        PresentationMode::Idle,
        PresentationMode::CompactMedia,
        PresentationMode::ExpandedMedia,
    ];

    /// Fixed size of the pill for each mode.
    pub const fn geometry(self) -> Geometry {
        match self {
            PresentationMode::Idle => Geometry {
                width: 80,
                height: 35,
            },
            PresentationMode::CompactMedia => Geometry {
                width: 350,
                height: 46,
            },
            PresentationMode::ExpandedMedia => Geometry {
                width: 350,
                height: 160,
            },
        }
    }

    /// Content region shown in this mode. Idle shows none.
    pub const fn content_region(self) -> Option<Target> {
        match self {
            PresentationMode::Idle => None,
            PresentationMode::CompactMedia => Some(Target::CompactContent),
            PresentationMode::ExpandedMedia => Some(Target::ExpandedContent),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// What the renderer binds to. Always recomputed, never mutated in place.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PresentationState {
    pub mode: PresentationMode,
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub artist: String,
    pub is_playing: bool,
}

impl PresentationState {
    pub fn idle() -> Self {
        let geometry = PresentationMode::Idle.geometry();
        Self {
            mode: PresentationMode::Idle,
            width: geometry.width,
            height: geometry.height,
            title: crate::presentation::IDLE_TITLE.to_string(),
            artist: String::new(),
            is_playing: false,
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            width: self.width,
            height: self.height,
        }
    }
}

/// Element an intent animates.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Pill,
    CompactContent,
    ExpandedContent,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    QuinticOut,
    CubicOut,
}

/// An animation the renderer should run. Sequencing is expressed by `delay_ms` only.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionIntent {
    Fade {
        target: Target,
        from_opacity: f32,
        to_opacity: f32,
        duration_ms: u64,
        delay_ms: u64,
    },
    Resize {
        target: Target,
        from_width: u32,
        from_height: u32,
        to_width: u32,
        to_height: u32,
        /// Scale pop that runs alongside the resize. It always eases cubic out.
        from_scale: f32,
        to_scale: f32,
        duration_ms: u64,
        /// Easing of the size change.
        easing: Easing,
    },
}

impl TransitionIntent {
    pub fn target(&self) -> Target {
        match self {
            TransitionIntent::Fade { target, .. } | TransitionIntent::Resize { target, .. } => {
                *target
            }
        }
    }

    pub fn is_fade_out(&self) -> bool {
        matches!(self, TransitionIntent::Fade { from_opacity, to_opacity, .. } if to_opacity < from_opacity)
    }

    pub fn is_fade_in(&self) -> bool {
        matches!(self, TransitionIntent::Fade { from_opacity, to_opacity, .. } if to_opacity > from_opacity)
    }
}

/// Transport controls forwarded to the active session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportCommand {
    Play,
    Pause,
    TogglePlayPause,
    Seek { position_ms: u64 },
    SkipNext,
    SkipPrevious,
}

impl fmt::Display for TransportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportCommand::Play => write!(f, "play"),
            TransportCommand::Pause => write!(f, "pause"),
            TransportCommand::TogglePlayPause => write!(f, "toggle_play_pause"),
            TransportCommand::Seek { position_ms } => write!(f, "seek({}ms)", position_ms),
            TransportCommand::SkipNext => write!(f, "skip_next"),
            TransportCommand::SkipPrevious => write!(f, "skip_previous"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Disconnected,
    Connecting,
    Connected,
    NoSession,
}

/// Everything published by the island loop for readers outside it.
#[derive(Debug, Clone)]
pub struct IslandStatus {
    pub presentation: PresentationState,
    pub media: MediaSnapshot,
    pub provider_status: ProviderStatus,
}

impl Default for IslandStatus {
    fn default() -> Self {
        Self {
            presentation: PresentationState::idle(),
            media: MediaSnapshot::empty(),
            provider_status: ProviderStatus::Disconnected,
        }
    }
}
