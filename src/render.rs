//! Renderer collaborator: what the front end receives and what it sends back.

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::sync::mpsc::UnboundedSender;

use crate::types::{MediaSnapshot, PresentationState, TransitionIntent, TransportCommand};

/// Media details the expanded card binds to (seek bar, artwork).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MediaDetails {
    pub title: String,
    pub artist: String,
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub album_art: Option<String>, // base64 data URL
}

impl MediaDetails {
    pub fn from_snapshot(snapshot: &MediaSnapshot) -> Self {
        Self {
            title: snapshot.title.clone(),
            artist: snapshot.artist.clone(),
            is_playing: snapshot.is_playing,
            position_ms: snapshot.position_ms,
            duration_ms: snapshot.duration_ms,
            album_art: snapshot.album_art.as_deref().map(artwork_data_url),
        }
    }
}

/// One update for the renderer: the state to bind and the animations to run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderFrame {
    pub state: PresentationState,
    pub intents: Vec<TransitionIntent>,
    pub media: MediaDetails,
}

pub trait Renderer: Send {
    fn present(&mut self, frame: &RenderFrame);
}

/// Writes each frame as one JSON line.
pub struct JsonLinesRenderer<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_frame(&mut self, frame: &RenderFrame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame).context("Failed to serialize frame")?;
        self.writer
            .write_all(b"\n")
            .and_then(|_| self.writer.flush())
            .context("Failed to write frame")?;
        Ok(())
    }
}

impl<W: Write + Send> Renderer for JsonLinesRenderer<W> {
    fn present(&mut self, frame: &RenderFrame) {
        if let Err(e) = self.write_frame(frame) {
            log::error!("Renderer output failed: {:#}", e);
        }
    }
}

/// Forwards frames to another task; used by in-process front ends and tests.
impl Renderer for UnboundedSender<RenderFrame> {
    fn present(&mut self, frame: &RenderFrame) {
        if self.send(frame.clone()).is_err() {
            log::debug!("Render channel closed, dropping frame");
        }
    }
}

/// A message from the front end.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RendererInput {
    Touch,
    ToggleExpand,
    Play,
    Pause,
    TogglePlayPause,
    Seek { position_ms: u64 },
    SkipNext,
    SkipPrevious,
    Quit,
}

impl RendererInput {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .with_context(|| format!("Unrecognized renderer input: {}", line.trim()))
    }

    /// The transport command this input maps to, if any.
    pub fn transport(self) -> Option<TransportCommand> {
        match self {
            RendererInput::Play => Some(TransportCommand::Play),
            RendererInput::Pause => Some(TransportCommand::Pause),
            RendererInput::TogglePlayPause => Some(TransportCommand::TogglePlayPause),
            RendererInput::Seek { position_ms } => Some(TransportCommand::Seek { position_ms }),
            RendererInput::SkipNext => Some(TransportCommand::SkipNext),
            RendererInput::SkipPrevious => Some(TransportCommand::SkipPrevious),
            RendererInput::Touch | RendererInput::ToggleExpand | RendererInput::Quit => None,
        }
    }
}

fn artwork_data_url(bytes: &[u8]) -> String {
    let mime = if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else if bytes.starts_with(b"\xFF\xD8") {
        "image/jpeg"
    } else {
        "application/octet-stream"
    };
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}
