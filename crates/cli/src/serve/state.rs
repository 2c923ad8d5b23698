//! Application state shared across request handlers.

use std::sync::Arc;

use stagewise_engine::{Engine, Triggers};
use stagewise_storage::MemoryStorage;

pub(crate) struct AppState {
    pub(crate) engine: Arc<Engine<MemoryStorage>>,
    pub(crate) triggers: Triggers<MemoryStorage>,
}

impl AppState {
    pub(crate) fn new(engine: Arc<Engine<MemoryStorage>>) -> Self {
        AppState {
            triggers: Triggers::new(Arc::clone(&engine)),
            engine,
        }
    }
}
