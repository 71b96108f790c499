//! Shared state handed to every ingestion path and viewer

use std::sync::Arc;

use crate::bus::IngestListener;
use crate::config::Config;
use crate::store::broadcast::{Fanout, ViewerSession};
use crate::store::TrajectoryStore;

/// Store and fan-out wired together
///
/// Cloning is cheap; every clone refers to the same store and channel.
#[derive(Debug, Clone)]
pub struct TrackerContext {
    pub store: Arc<TrajectoryStore>,
    pub fanout: Fanout,
}

impl TrackerContext {
    pub fn new(max_trajectory_len: usize, channel_capacity: usize) -> Self {
        let fanout = Fanout::new(channel_capacity);
        let store = Arc::new(TrajectoryStore::with_fanout(max_trajectory_len, fanout.clone()));
        Self { store, fanout }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.store.max_trajectory_len, config.broadcast.channel_capacity)
    }

    /// Bus callback appending into this context's store
    pub fn ingest_listener(&self) -> IngestListener {
        IngestListener::new(self.store.clone())
    }

    /// Open a viewer session
    pub fn subscribe(&self) -> ViewerSession {
        self.fanout.subscribe()
    }
}
