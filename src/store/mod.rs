//! # Trajectory Store
//!
//! Bounded, per-vehicle position history shared by ingestion and viewers.
//!
//! This module handles:
//! - Keeping the newest `max_len` positions of each vehicle, newest first
//! - Answering queries for one vehicle or for the whole fleet
//! - Triggering the broadcast fan-out on every accepted position
//!
//! Windows are immutable `Arc<Vec<Position>>` values swapped under the
//! per-key lock of a sharded `DashMap`, so a reader always sees a complete
//! window and appends to different vehicles do not contend for one lock.

pub mod broadcast;

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::position::{Position, VehicleId};
use broadcast::{Fanout, TrajectoryUpdate, ViewerEvent};

/// Default number of positions retained per vehicle
pub const DEFAULT_MAX_TRAJECTORY_LEN: usize = 20;

/// Retained trajectory of one vehicle, newest first
pub type TrajectoryWindow = Arc<Vec<Position>>;

/// Per-vehicle FIFO history
#[derive(Debug)]
pub struct TrajectoryStore {
    windows: DashMap<VehicleId, TrajectoryWindow>,
    max_len: usize,
    fanout: Option<Fanout>,
}

impl TrajectoryStore {
    /// Create a store without viewers
    pub fn new(max_len: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_len: max_len.max(1),
            fanout: None,
        }
    }

    /// Create a store that publishes every accepted position through `fanout`
    pub fn with_fanout(max_len: usize, fanout: Fanout) -> Self {
        Self {
            fanout: Some(fanout),
            ..Self::new(max_len)
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Prepend a position to the vehicle's window and evict beyond capacity
    ///
    /// The new window replaces the old one atomically. The broadcast is issued
    /// while the vehicle's entry is still locked, which keeps viewer updates in
    /// append order for each vehicle.
    ///
    /// # Returns
    ///
    /// * `TrajectoryWindow` - The window after the append
    pub fn append(&self, id: &VehicleId, position: Position) -> TrajectoryWindow {
        let mut entry = self.windows.entry(id.clone()).or_default();

        let mut window = Vec::with_capacity(self.max_len);
        window.push(position);
        window.extend(entry.iter().take(self.max_len - 1).cloned());

        let window = Arc::new(window);
        *entry = window.clone();

        if let Some(fanout) = &self.fanout {
            fanout.publish(ViewerEvent::Update(TrajectoryUpdate::new(id.clone(), window.clone())));
        }
        drop(entry);

        debug!("Stored position for {} ({} retained)", id, window.len());
        window
    }

    /// Positions of a vehicle, newest first; empty for unknown vehicles
    pub fn get(&self, id: &VehicleId) -> Vec<Position> {
        self.window(id).map(|w| w.as_ref().clone()).unwrap_or_default()
    }

    /// Shared handle to the current window of a vehicle
    pub fn window(&self, id: &VehicleId) -> Option<TrajectoryWindow> {
        self.windows.get(id).map(|w| w.value().clone())
    }

    /// All vehicles that have at least one stored position
    pub fn list_vehicles(&self) -> BTreeSet<VehicleId> {
        self.windows.iter().map(|e| e.key().clone()).collect()
    }

    /// Every vehicle with its current window
    pub fn snapshot(&self) -> BTreeMap<VehicleId, TrajectoryWindow> {
        self.windows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// [`TrajectoryStore::snapshot`] as a JSON object keyed by vehicle id
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }
}
