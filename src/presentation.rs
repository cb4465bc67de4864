//! Derivation of the pill's mode and geometry from the latest snapshot and
//! the user's interaction history.
//!
//! Pure and deterministic: the caller passes `now` into every time-dependent
//! entry point, so there is no clock in here.

use std::time::{Duration, Instant};

use crate::config::MediaPolicy;
use crate::types::{MediaSnapshot, PresentationMode, PresentationState};

/// Title shown while no media is active.
pub const IDLE_TITLE: &str = "Idle";

pub const DEFAULT_COLLAPSE_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PresentationStateMachine {
    policy: MediaPolicy,
    collapse_after: Duration,
    has_media: bool,
    expanded_requested: bool,
    last_interaction_at: Instant,
    title: String,
    artist: String,
    is_playing: bool,
}

impl PresentationStateMachine {
    pub fn new(policy: MediaPolicy, collapse_after: Duration, now: Instant) -> Self {
        Self {
            policy,
            collapse_after,
            has_media: false,
            expanded_requested: false,
            last_interaction_at: now,
            title: IDLE_TITLE.to_string(),
            artist: String::new(),
            is_playing: false,
        }
    }

    pub fn has_media(&self) -> bool {
        self.has_media
    }

    pub fn expanded_requested(&self) -> bool {
        self.expanded_requested
    }

    pub fn last_interaction_at(&self) -> Instant {
        self.last_interaction_at
    }

    pub fn mode(&self) -> PresentationMode {
        if !self.has_media {
            PresentationMode::Idle
        } else if self.expanded_requested {
            PresentationMode::ExpandedMedia
        } else {
            PresentationMode::CompactMedia
        }
    }

    pub fn state(&self) -> PresentationState {
        let mode = self.mode();
        let geometry = mode.geometry();
        PresentationState {
            mode,
            width: geometry.width,
            height: geometry.height,
            title: self.title.clone(),
            artist: self.artist.clone(),
            is_playing: self.is_playing,
        }
    }

    fn snapshot_has_media(&self, snapshot: &MediaSnapshot) -> bool {
        match self.policy {
            MediaPolicy::Playing => snapshot.is_playing,
            MediaPolicy::KnownTrack => snapshot.is_playing || !snapshot.title.is_empty(),
        }
    }

    pub fn on_snapshot(&mut self, snapshot: &MediaSnapshot, now: Instant) -> PresentationState {
        let had_media = self.has_media;
        self.has_media = self.snapshot_has_media(snapshot);
        self.is_playing = snapshot.is_playing;

        if self.has_media {
            self.title = snapshot.title.clone();
            self.artist = snapshot.artist.clone();
        } else {
            self.title = IDLE_TITLE.to_string();
            self.artist.clear();
        }

        if !had_media && self.has_media {
            log::debug!("Media appeared: {} - {}", self.title, self.artist);
            self.touch(now);
        }

        self.state()
    }

    /// Flip the expansion request. Ignored while there is no media to expand.
    pub fn toggle_expand(&mut self, now: Instant) -> PresentationState {
        if !self.has_media {
            log::debug!("Ignoring expand toggle without media");
            return self.state();
        }

        self.expanded_requested = !self.expanded_requested;
        self.touch(now);
        self.state()
    }

    /// Record a user interaction, re-arming the auto-collapse deadline.
    pub fn touch(&mut self, now: Instant) {
        self.last_interaction_at = now;
    }

    /// Auto-collapse check. Returns true when this tick collapsed the card.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.expanded_requested {
            return false;
        }

        let idle_for = now.saturating_duration_since(self.last_interaction_at);
        if idle_for >= self.collapse_after {
            log::debug!("Auto-collapsing after {:?} without interaction", idle_for);
            self.expanded_requested = false;
            return true;
        }

        false
    }
}
