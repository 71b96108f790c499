//! # Serial Link Module
//!
//! Reads NMEA sentences from a GPS receiver attached to a serial port.
//!
//! This module handles:
//! - Opening the device and splitting the byte stream into sentences
//! - Decoding RMC fixes into normalized positions
//! - Writing the live snapshot and the optional NMEA journal
//! - Reporting lost receivers and reconnecting at a fixed interval
//!
//! A per-line failure is logged and the loop moves on to the next line. Only
//! a read error or end-of-stream tears the link down.

pub mod port_trait;
pub mod snapshot;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MIN_RECONNECT_INTERVAL_MS;
use crate::error::{Result, TrackerError};
use crate::geodesy::{Geodesic, Vincenty};
use crate::nmea::{sentence::PositionFix, NmeaDecoder, NmeaFrame};
use crate::position::{format_timestamp, now_millis, Position, PositionNormalizer, VehicleId};
use crate::store::broadcast::{Fanout, ViewerEvent};
use crate::store::TrajectoryStore;
use port_trait::LinkOpener;
use snapshot::{DeviceInfo, LiveSnapshot, SnapshotSink};

/// Initial capacity of the line buffer
const LINE_BUFFER_SIZE: usize = 256;

/// Longest unterminated text kept while waiting for a line end
pub const MAX_LINE_LENGTH: usize = 1024;

/// Shortest allowed pause between reconnect attempts
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_millis(MIN_RECONNECT_INTERVAL_MS);

/// Output of a link
#[derive(Debug, Clone, PartialEq)]
pub enum SerialEvent {
    /// An RMC frame was decoded, with or without a fix
    Position(Position),
    /// The receiver went away
    NoGps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// Link manager of one GPS receiver
pub struct GpsLink<O: LinkOpener, S: SnapshotSink, G: Geodesic = Vincenty> {
    opener: O,
    decoder: NmeaDecoder,
    normalizer: PositionNormalizer<G>,
    sink: S,
    device: DeviceInfo,
    events: mpsc::Sender<SerialEvent>,
    reconnect_interval: Duration,
    state: LinkState,
}

impl<O: LinkOpener, S: SnapshotSink> GpsLink<O, S> {
    /// Create a link using the Vincenty solver for distances
    pub fn new(
        opener: O,
        sink: S,
        device: DeviceInfo,
        events: mpsc::Sender<SerialEvent>,
        reconnect_interval: Duration,
    ) -> Self {
        Self::with_geodesic(opener, sink, device, events, reconnect_interval, Vincenty)
    }
}

impl<O: LinkOpener, S: SnapshotSink, G: Geodesic> GpsLink<O, S, G> {
    pub fn with_geodesic(
        opener: O,
        sink: S,
        device: DeviceInfo,
        events: mpsc::Sender<SerialEvent>,
        reconnect_interval: Duration,
        geodesic: G,
    ) -> Self {
        Self {
            opener,
            decoder: NmeaDecoder,
            normalizer: PositionNormalizer::new(geodesic),
            sink,
            device,
            events,
            reconnect_interval: reconnect_interval.max(MIN_RECONNECT_INTERVAL),
            state: LinkState::Disconnected,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    /// Run the read/reconnect loop until cancelled
    ///
    /// Returns once `cancel` fires or the event receiver is dropped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let path = self.opener.device_path().to_string();
        info!("Starting GPS link on {}", path);

        loop {
            if self.events.is_closed() {
                debug!("Event receiver for {} dropped", path);
                break;
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => break,
                opened = self.opener.open() => opened,
            };

            match opened {
                Ok(reader) => {
                    self.state = LinkState::Connected;
                    info!("GPS receiver connected on {}", path);

                    let lost = self.read_sentences(reader, &cancel).await;
                    self.state = LinkState::Disconnected;

                    match lost {
                        Some(reason) => {
                            warn!("GPS receiver on {} lost: {}", path, reason);
                            emit(&self.events, SerialEvent::NoGps).await;
                        }
                        None => break,
                    }
                }
                Err(e) => warn!("Failed to open {}: {}", path, e),
            }

            debug!("Reconnecting to {} in {:?}", path, self.reconnect_interval);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }

        self.state = LinkState::Disconnected;
        info!("GPS link on {} stopped", path);
        Ok(())
    }

    /// Read until the link fails
    ///
    /// Either `\r` or `\n` ends a sentence. Text that runs past
    /// [`MAX_LINE_LENGTH`] without a terminator is dropped. Returns the
    /// failure, or `None` when stopped by cancellation or a closed event
    /// channel.
    async fn read_sentences(&mut self, reader: O::Reader, cancel: &CancellationToken) -> Option<TrackerError> {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(LINE_BUFFER_SIZE);
        let mut pending: Vec<u8> = Vec::with_capacity(LINE_BUFFER_SIZE);

        loop {
            if self.events.is_closed() {
                return None;
            }

            buf.clear();
            let mut limited = (&mut reader).take(MAX_LINE_LENGTH as u64);
            let read = tokio::select! {
                _ = cancel.cancelled() => return None,
                read = limited.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => {
                    let tail = std::mem::take(&mut pending);
                    self.handle_line(&tail).await;
                    return Some(TrackerError::LinkDisconnected("end of stream".to_string()));
                }
                Ok(_) => {
                    pending.extend_from_slice(&buf);
                    while let Some(end) = pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=end).collect();
                        self.handle_line(&line).await;
                    }
                    if pending.len() > MAX_LINE_LENGTH {
                        warn!("Dropping {} bytes without a line terminator", pending.len());
                        pending.clear();
                    }
                }
                Err(e) => return Some(TrackerError::LinkDisconnected(e.to_string())),
            }
        }
    }

    async fn handle_line(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        self.process_line(line).await;
    }

    /// Decode one sentence and act on it
    ///
    /// An accepted fix is written to the live snapshot, then forwarded, then
    /// journaled. Sink failures are logged and never hold back the others.
    async fn process_line(&mut self, line: &str) {
        let Some(frame) = self.decoder.decode(line) else {
            debug!("Ignoring [{}]", line);
            return;
        };

        match frame {
            NmeaFrame::PositionFix(fix) => {
                let received = now_millis();
                let timestamp = fix_timestamp(&fix).unwrap_or(received);
                let previous = self.normalizer.last_fix();
                let position = self.normalizer.normalize(&fix, timestamp);

                if let Err(e) = self.sink.write_snapshot(&LiveSnapshot::new(&self.device, &position, previous)) {
                    error!("Failed to write live snapshot: {}", e);
                }
                emit(&self.events, SerialEvent::Position(position)).await;
                self.journal(received, &fix.sentence);
            }
            NmeaFrame::GroundAltitudeFix(gga) => {
                debug!("GGA quality {:?}, {:?} satellites", gga.quality, gga.satellites_used);
                self.journal(now_millis(), &gga.sentence);
            }
            other => debug!("{} frame: {:?}", other.sentence_type(), other),
        }
    }

    fn journal(&mut self, received: i64, sentence: &str) {
        if let Err(e) = self.sink.record_sentence(&format_timestamp(received), sentence) {
            error!("Failed to journal [{}]: {}", sentence, e);
        }
    }
}

async fn emit(events: &mpsc::Sender<SerialEvent>, event: SerialEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped, discarding serial event");
    }
}

/// Receiver time of an RMC frame as epoch milliseconds
fn fix_timestamp(fix: &PositionFix) -> Option<i64> {
    let date = NaiveDate::parse_from_str(fix.date.as_deref()?, "%d%m%y").ok()?;
    let time = NaiveTime::parse_from_str(fix.utc_time.as_deref()?, "%H%M%S%.f").ok()?;
    Some(NaiveDateTime::new(date, time).and_utc().timestamp_millis())
}

/// Store positions of one vehicle and relay its receiver status to viewers
///
/// Runs until the link's event sender is dropped.
pub async fn forward_events(
    vehicle: VehicleId,
    mut events: mpsc::Receiver<SerialEvent>,
    store: Arc<TrajectoryStore>,
    fanout: Fanout,
) {
    while let Some(event) = events.recv().await {
        match event {
            SerialEvent::Position(position) => {
                if position.is_no_fix() {
                    debug!("{} reports no fix", vehicle);
                }
                store.append(&vehicle, position);
            }
            SerialEvent::NoGps => {
                warn!("NO_GPS for {}", vehicle);
                fanout.publish(ViewerEvent::NoGps { id: vehicle.clone() });
            }
        }
    }
    debug!("Serial events for {} finished", vehicle);
}

#[cfg(test)]
mod tests {
    use super::port_trait::mocks::ScriptedOpener;
    use super::snapshot::{MockSnapshotSink, DEVICE_CLASS};
    use super::*;
    use crate::position::Source;
    use std::io;
    use std::sync::atomic::Ordering;
    use tokio::time::{timeout, Instant};
    use tokio_test::io::Builder;

    const RMC_1: &[u8] = b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const RMC_2: &[u8] = b"$GPRMC,123520,A,4807.048,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n";
    const GSV: &[u8] = b"$GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75\r\n";
    const RMC_VOID: &[u8] = b"$GPRMC,,V,,,,,,,,,,N*53\r\n";

    fn device() -> DeviceInfo {
        DeviceInfo {
            class: DEVICE_CLASS.to_string(),
            usb_port: "1-1".to_string(),
            tty: "/dev/mock0".to_string(),
            hardware_version: "test".to_string(),
        }
    }

    fn accepting_sink() -> MockSnapshotSink {
        let mut sink = MockSnapshotSink::new();
        sink.expect_write_snapshot().returning(|_| Ok(()));
        sink.expect_record_sentence().returning(|_, _| Ok(()));
        sink
    }

    async fn next(rx: &mut mpsc::Receiver<SerialEvent>) -> SerialEvent {
        timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for serial event")
            .expect("channel closed")
    }

    fn position(event: SerialEvent) -> Position {
        match event {
            SerialEvent::Position(p) => p,
            other => panic!("Expected Position, got: {:?}", other),
        }
    }

    #[test]
    fn test_fix_timestamp_from_rmc() {
        let frame = crate::nmea::decode(std::str::from_utf8(RMC_1).unwrap()).unwrap();
        let NmeaFrame::PositionFix(fix) = frame else { panic!("Expected RMC") };
        // 1994-03-23 12:35:19 UTC
        assert_eq!(fix_timestamp(&fix), Some(764_426_119_000));
    }

    #[test]
    fn test_reconnect_interval_is_clamped() {
        let (tx, _rx) = mpsc::channel(1);
        let link = GpsLink::new(
            ScriptedOpener::new(vec![]),
            MockSnapshotSink::new(),
            device(),
            tx,
            Duration::from_millis(10),
        );
        assert_eq!(link.reconnect_interval(), MIN_RECONNECT_INTERVAL);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positions_then_no_gps_on_end_of_stream() {
        let session = Builder::new().read(RMC_1).read(GSV).read(RMC_2).build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let mut sink = MockSnapshotSink::new();
        sink.expect_write_snapshot().times(2).returning(|_| Ok(()));
        sink.expect_record_sentence().times(2).returning(|_, _| Ok(()));

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, sink, device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        let first = position(next(&mut rx).await);
        assert_eq!(first.latitude, 48.1173);
        assert_eq!(first.longitude, 11.516667);
        assert_eq!(first.source, Source::Serial);
        assert_eq!(first.course_deg, 84.4);
        assert_eq!(first.distance_m, None);
        assert_eq!(first.timestamp, 764_426_119_000);

        let second = position(next(&mut rx).await);
        assert_eq!(second.course_deg, 0.0);
        assert!(second.distance_m.unwrap() > 18.0 && second.distance_m.unwrap() < 19.0);

        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentence_split_across_reads() {
        let session = Builder::new()
            .read(b"$GPRMC,123519,A,4807.0")
            .read(b"38,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r\n")
            .build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, accepting_sink(), device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        assert_eq!(position(next(&mut rx).await).latitude, 48.1173);
        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_reconnects_after_interval() {
        let broken = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            .build();
        let restored = Builder::new().read(RMC_1).build();
        let opener = ScriptedOpener::new(vec![Ok(broken), Ok(restored)]);
        let attempts = opener.attempts.clone();

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, accepting_sink(), device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);
        let lost_at = Instant::now();

        let restored = position(next(&mut rx).await);
        assert!(Instant::now() - lost_at >= Duration::from_secs(1));
        assert_eq!(restored.latitude, 48.1173);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_fix_emits_zeroed_position() {
        let session = Builder::new().read(RMC_VOID).build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, accepting_sink(), device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        let p = position(next(&mut rx).await);
        assert!(p.is_no_fix());
        assert_eq!(p.distance_m, Some(0.0));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_does_not_stop_link() {
        let session = Builder::new().read(RMC_1).read(RMC_2).build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let mut sink = MockSnapshotSink::new();
        sink.expect_record_sentence().returning(|_, _| Ok(()));
        sink.expect_write_snapshot()
            .times(2)
            .returning(|_| Err(TrackerError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "ro"))));

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, sink, device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        position(next(&mut rx).await);
        position(next(&mut rx).await);
        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_journal_failure_still_writes_snapshot() {
        let session = Builder::new().read(RMC_1).build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let mut sink = MockSnapshotSink::new();
        sink.expect_record_sentence()
            .times(1)
            .returning(|_, _| Err(TrackerError::Io(io::Error::new(io::ErrorKind::Other, "disk full"))));
        sink.expect_write_snapshot().times(1).returning(|_| Ok(()));

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, sink, device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        assert_eq!(position(next(&mut rx).await).latitude, 48.1173);
        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_journal_entries_start_at_dollar() {
        let session = Builder::new()
            .read(b"2024-01-19 14:15:30 | $GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n")
            .read(b"2024-01-19 14:15:31 | ")
            .read(RMC_1)
            .build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let mut sink = MockSnapshotSink::new();
        sink.expect_write_snapshot().times(1).returning(|_| Ok(()));
        sink.expect_record_sentence()
            .withf(|_, sentence| sentence.starts_with("$GPGGA,") || sentence.starts_with("$GPRMC,"))
            .times(2)
            .returning(|_, _| Ok(()));

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, sink, device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        position(next(&mut rx).await);
        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_carriage_return_ends_sentence() {
        let session = Builder::new()
            .read(b"$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r")
            .read(b"$GPRMC,123520,A,4807.048,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\r")
            .build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, accepting_sink(), device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        assert_eq!(position(next(&mut rx).await).latitude, 48.1173);
        assert_eq!(position(next(&mut rx).await).timestamp, 764_426_120_000);
        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unterminated_noise_is_dropped() {
        let noise = vec![b'x'; 4 * MAX_LINE_LENGTH];
        let session = Builder::new().read(&noise).read(b"\n").read(RMC_1).build();
        let opener = ScriptedOpener::new(vec![Ok(session)]);

        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(opener, accepting_sink(), device(), tx, Duration::from_secs(1));
        let handle = tokio::spawn(link.run(cancel.clone()));

        assert_eq!(position(next(&mut rx).await).latitude, 48.1173);
        assert_eq!(next(&mut rx).await, SerialEvent::NoGps);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_interrupts_reconnect_wait() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let link = GpsLink::new(
            ScriptedOpener::new(vec![]),
            MockSnapshotSink::new(),
            device(),
            tx,
            Duration::from_secs(3600),
        );
        let handle = tokio::spawn(link.run(cancel.clone()));

        tokio::task::yield_now().await;
        cancel.cancel();

        timeout(Duration::from_secs(5), handle)
            .await
            .expect("link did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_forward_events_stores_and_reports_no_gps() {
        let fanout = Fanout::new(16);
        let mut viewer = fanout.subscribe();
        let store = Arc::new(TrajectoryStore::with_fanout(20, fanout.clone()));
        let vehicle: VehicleId = "CAEX-320".parse().unwrap();

        let (tx, rx) = mpsc::channel(16);
        tx.send(SerialEvent::Position(Position::no_fix(Source::Serial, 1, None))).await.unwrap();
        tx.send(SerialEvent::NoGps).await.unwrap();
        drop(tx);

        forward_events(vehicle.clone(), rx, store.clone(), fanout).await;

        assert_eq!(store.get(&vehicle).len(), 1);
        assert!(matches!(viewer.try_next_event(), Some(ViewerEvent::Update(_))));
        assert_eq!(viewer.try_next_event(), Some(ViewerEvent::NoGps { id: vehicle }));
    }
}
