//! Core of the floating media pill: watches the OS media session, derives
//! the pill's presentation mode and turns mode changes into animations.

pub mod config;
pub mod error;
pub mod island;
pub mod logging;
pub mod presentation;
pub mod provider;
pub mod render;
pub mod state;
pub mod transition;
pub mod types;
pub mod watcher;

pub use config::Config;
pub use island::{Island, IslandHandle};
pub use types::*;
