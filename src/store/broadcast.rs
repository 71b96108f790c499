//! # Broadcast Fan-out
//!
//! Pushes trajectory updates to every connected viewer session.
//!
//! Fan-out is decoupled from ingestion through a bounded `tokio` broadcast
//! channel: publishing never waits on a viewer. A viewer that falls behind
//! loses its oldest pending events (best-effort delivery) but never observes
//! an older window after a newer one for the same vehicle, since all events
//! travel through one ordered queue.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::error::Result;
use crate::position::{Position, VehicleId};

/// Event name of trajectory updates
pub const UPDATE_EVENT: &str = "update_czml";

/// Event name of serial link status events
pub const GPS_EVENT: &str = "gps";

/// Error code sent when a serial receiver disappears
pub const NO_GPS: &str = "NO_GPS";

/// Full retained trajectory of one vehicle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryUpdate {
    pub id: VehicleId,
    #[serde(rename = "type")]
    pub kind: String,
    pub datos: Arc<Vec<Position>>,
}

impl TrajectoryUpdate {
    pub fn new(id: VehicleId, datos: Arc<Vec<Position>>) -> Self {
        let kind = id.kind().to_string();
        Self { id, kind, datos }
    }
}

/// Event delivered to viewers
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// A new position was accepted for a vehicle
    Update(TrajectoryUpdate),
    /// The serial receiver of a vehicle is gone
    NoGps { id: VehicleId },
}

impl ViewerEvent {
    /// Event name on the viewer channel
    pub fn name(&self) -> &'static str {
        match self {
            ViewerEvent::Update(_) => UPDATE_EVENT,
            ViewerEvent::NoGps { .. } => GPS_EVENT,
        }
    }

    pub fn vehicle_id(&self) -> &VehicleId {
        match self {
            ViewerEvent::Update(update) => &update.id,
            ViewerEvent::NoGps { id } => id,
        }
    }

    /// JSON payload of the event
    pub fn payload(&self) -> Result<serde_json::Value> {
        match self {
            ViewerEvent::Update(update) => Ok(serde_json::to_value(update)?),
            ViewerEvent::NoGps { id } => Ok(json!({ "id": id, "error": NO_GPS })),
        }
    }
}

/// Publishing side of the viewer channel
#[derive(Debug, Clone)]
pub struct Fanout {
    tx: broadcast::Sender<ViewerEvent>,
}

impl Fanout {
    /// Create a fan-out keeping at most `capacity` undelivered events per viewer
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Open a new viewer session
    pub fn subscribe(&self) -> ViewerSession {
        ViewerSession { rx: self.tx.subscribe(), missed: 0 }
    }

    /// Publish an event to all current viewers
    ///
    /// # Returns
    ///
    /// * `usize` - Number of viewers the event was queued for
    pub fn publish(&self, event: ViewerEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(viewers) => {
                debug!("Queued '{}' for {} viewer(s)", name, viewers);
                viewers
            }
            Err(_) => {
                debug!("No viewers connected, dropped '{}'", name);
                0
            }
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving side held by one viewer
#[derive(Debug)]
pub struct ViewerSession {
    rx: broadcast::Receiver<ViewerEvent>,
    missed: u64,
}

impl ViewerSession {
    /// Wait for the next event, skipping over anything this viewer lagged behind on
    ///
    /// Returns `None` once every [`Fanout`] handle is dropped.
    pub async fn next_event(&mut self) -> Option<ViewerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.lagged(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`ViewerSession::next_event`]
    pub fn try_next_event(&mut self) -> Option<ViewerEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.lagged(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events this viewer never received because it fell behind
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn lagged(&mut self, n: u64) {
        warn!("Viewer fell behind, skipped {} event(s)", n);
        self.missed += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{Source, UNKNOWN};

    fn id(s: &str) -> VehicleId {
        s.parse().unwrap()
    }

    fn update(vehicle: &str, timestamp: i64) -> ViewerEvent {
        let mut p = Position::no_fix(Source::Bus, timestamp, None);
        p.course_deg = UNKNOWN;
        ViewerEvent::Update(TrajectoryUpdate::new(id(vehicle), Arc::new(vec![p])))
    }

    #[test]
    fn test_publish_without_viewers_is_dropped() {
        let fanout = Fanout::new(4);
        assert_eq!(fanout.viewer_count(), 0);
        assert_eq!(fanout.publish(update("CAEX-1", 1)), 0);
    }

    #[test]
    fn test_every_viewer_receives_event() {
        let fanout = Fanout::new(4);
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        assert_eq!(fanout.publish(update("CAEX-1", 1)), 2);

        assert_eq!(a.try_next_event(), Some(update("CAEX-1", 1)));
        assert_eq!(b.try_next_event(), Some(update("CAEX-1", 1)));
        assert_eq!(a.try_next_event(), None);
    }

    #[test]
    fn test_slow_viewer_skips_oldest_but_keeps_order() {
        let fanout = Fanout::new(2);
        let mut slow = fanout.subscribe();

        for ts in 1..=5 {
            fanout.publish(update("CAEX-1", ts));
        }

        assert_eq!(slow.try_next_event(), Some(update("CAEX-1", 4)));
        assert_eq!(slow.try_next_event(), Some(update("CAEX-1", 5)));
        assert_eq!(slow.missed(), 3);
    }

    #[test]
    fn test_update_payload_shape() {
        let event = update("CAEX-320", 0);
        assert_eq!(event.name(), "update_czml");

        let payload = event.payload().unwrap();
        assert_eq!(payload["id"], "CAEX-320");
        assert_eq!(payload["type"], "CAEX");
        assert_eq!(payload["datos"].as_array().unwrap().len(), 1);
        assert_eq!(payload["datos"][0]["pm100"], -1.0);
    }

    #[test]
    fn test_no_gps_payload_shape() {
        let event = ViewerEvent::NoGps { id: id("CL-7") };
        assert_eq!(event.name(), "gps");
        assert_eq!(event.vehicle_id().as_str(), "CL-7");
        assert_eq!(event.payload().unwrap(), json!({ "id": "CL-7", "error": "NO_GPS" }));
    }

    #[tokio::test]
    async fn test_session_closes_when_fanout_dropped() {
        let fanout = Fanout::new(4);
        let mut session = fanout.subscribe();
        fanout.publish(update("CAEX-1", 1));
        drop(fanout);

        assert!(session.next_event().await.is_some());
        assert!(session.next_event().await.is_none());
    }
}
