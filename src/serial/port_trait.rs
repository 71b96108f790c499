//! Trait abstraction for opening serial links to enable testing

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::{Result, TrackerError};

/// Opens the byte stream of a GPS receiver
#[async_trait]
pub trait LinkOpener: Send {
    type Reader: AsyncRead + Unpin + Send;

    /// Open (or re-open) the device
    async fn open(&mut self) -> Result<Self::Reader>;

    /// Device node, e.g. `/dev/ttyUSB0`
    fn device_path(&self) -> &str;
}

/// Opens a `tokio_serial::SerialStream` with 8N1 settings
#[derive(Debug, Clone)]
pub struct TokioSerialOpener {
    path: String,
    baud_rate: u32,
}

impl TokioSerialOpener {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self { path: path.into(), baud_rate }
    }
}

#[async_trait]
impl LinkOpener for TokioSerialOpener {
    type Reader = tokio_serial::SerialStream;

    async fn open(&mut self) -> Result<Self::Reader> {
        use tokio_serial::SerialPortBuilderExt;

        let port = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TrackerError::Serial(format!("Failed to open {}: {}", self.path, e)))?;

        Ok(port)
    }

    fn device_path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_test::io::Mock;

    /// Opener replaying scripted sessions, failing once they are used up
    pub struct ScriptedOpener {
        sessions: VecDeque<Result<Mock>>,
        pub attempts: Arc<AtomicUsize>,
    }

    impl ScriptedOpener {
        pub fn new(sessions: Vec<Result<Mock>>) -> Self {
            Self {
                sessions: sessions.into(),
                attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl LinkOpener for ScriptedOpener {
        type Reader = Mock;

        async fn open(&mut self) -> Result<Mock> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.sessions
                .pop_front()
                .unwrap_or_else(|| Err(TrackerError::Serial("Mock device absent".to_string())))
        }

        fn device_path(&self) -> &str {
            "/dev/mock0"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_path() {
        let opener = TokioSerialOpener::new("/dev/ttyUSB3", 9600);
        assert_eq!(opener.device_path(), "/dev/ttyUSB3");
    }

    #[tokio::test]
    async fn test_open_with_invalid_path_returns_error() {
        let mut opener = TokioSerialOpener::new("/dev/nonexistent_serial_device_12345", 9600);

        match opener.open().await {
            Err(TrackerError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_serial_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other.map(|_| ())),
        }
    }
}
