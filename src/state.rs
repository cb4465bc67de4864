use parking_lot::RwLock;
use std::sync::Arc;

use crate::types::IslandStatus;

/// Read handle onto what the island loop last published. Only the loop writes.
pub type SharedState = Arc<RwLock<IslandStatus>>;

pub fn create_state() -> SharedState {
    Arc::new(RwLock::new(IslandStatus::default()))
}
