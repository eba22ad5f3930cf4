//! # Link Session
//!
//! Owned handle over a running [`Link`] plus the task that hands telemetry
//! to caller callbacks. Opening waits for the link to report active;
//! closing brings the aircraft to failsafe before the port goes away.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use super::channels::FAILSAFE_CHANNELS;
use super::Link;
use crate::error::{ElrsLinkError, Result};
use crate::serial::Transport;
use crate::telemetry::monitor::{TelemetryCallbacks, TelemetryMonitor};

/// How often `is_active` is polled while opening
pub const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time the failsafe set is sent before the loops are stopped
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Outcome of opening a session, with stable integer codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    Success,
    AlreadyInitialized,
    LinkStartFailed,
    HandshakeTimeout,
}

impl InitStatus {
    pub fn code(self) -> i32 {
        match self {
            InitStatus::Success => 0,
            InitStatus::AlreadyInitialized => -1,
            InitStatus::LinkStartFailed => -2,
            InitStatus::HandshakeTimeout => -3,
        }
    }
}

impl From<&ElrsLinkError> for InitStatus {
    fn from(error: &ElrsLinkError) -> Self {
        match error {
            ElrsLinkError::AlreadyActive(_) => InitStatus::AlreadyInitialized,
            ElrsLinkError::Timeout(_) => InitStatus::HandshakeTimeout,
            _ => InitStatus::LinkStartFailed,
        }
    }
}

impl<T> From<&Result<T>> for InitStatus {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => InitStatus::Success,
            Err(e) => InitStatus::from(e),
        }
    }
}

/// Poll until the link reports active, or fail with `Timeout`
pub async fn wait_until_active<T: Transport>(link: &Link<T>, limit: Duration) -> Result<()> {
    let poll = async {
        while !link.is_active() {
            sleep(HANDSHAKE_POLL_INTERVAL).await;
        }
    };
    timeout(limit, poll).await.map_err(|_| ElrsLinkError::Timeout(limit))
}

pub struct LinkSession<T: Transport> {
    link: Arc<Link<T>>,
    monitor: TelemetryMonitor,
    shutdown_grace: Duration,
}

impl<T: Transport> LinkSession<T> {
    /// Start a new link over `transport` and wait for it to come up
    pub async fn open(
        transport: T,
        port_name: &str,
        baud_rate: u32,
        handshake_timeout: Duration,
        callbacks: TelemetryCallbacks,
    ) -> Result<Self> {
        let link = Arc::new(Link::new(transport));
        Self::attach(link, port_name, baud_rate, handshake_timeout, callbacks).await
    }

    /// Start `link` and wait for it to come up.
    ///
    /// A link that is already running is rejected with `AlreadyActive`. If
    /// the handshake times out the link is stopped again.
    pub async fn attach(
        link: Arc<Link<T>>,
        port_name: &str,
        baud_rate: u32,
        handshake_timeout: Duration,
        callbacks: TelemetryCallbacks,
    ) -> Result<Self> {
        link.start(port_name, baud_rate).await?;

        if let Err(e) = wait_until_active(&link, handshake_timeout).await {
            warn!("Link on {} did not come up: {}", port_name, e);
            if let Err(stop_error) = link.stop().await {
                warn!("Error stopping link: {}", stop_error);
            }
            return Err(e);
        }

        let monitor = TelemetryMonitor::spawn(link.telemetry(), callbacks);
        info!(port = port_name, baud_rate, "Link session open");

        Ok(Self {
            link,
            monitor,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        })
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn link(&self) -> &Arc<Link<T>> {
        &self.link
    }

    /// Send failsafe for the grace period, then stop everything.
    ///
    /// Returns the link's terminal error, if any. The monitor is stopped
    /// either way.
    pub async fn close(self) -> Result<()> {
        info!("Closing link session");
        self.link.update_channels(FAILSAFE_CHANNELS);
        sleep(self.shutdown_grace).await;

        let result = self.link.stop().await;
        self.monitor.stop().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::decoder::{decode_frame, encode_test_frame, unpack_channels};
    use crate::crsf::protocol::*;
    use crate::serial::port_trait::mocks::MemoryTransport;
    use crate::serial::MockTransport;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    const BAUD: u32 = 420_000;

    #[test]
    fn test_status_codes() {
        assert_eq!(InitStatus::Success.code(), 0);
        assert_eq!(InitStatus::AlreadyInitialized.code(), -1);
        assert_eq!(InitStatus::LinkStartFailed.code(), -2);
        assert_eq!(InitStatus::HandshakeTimeout.code(), -3);
    }

    #[test]
    fn test_status_from_errors() {
        assert_eq!(
            InitStatus::from(&ElrsLinkError::AlreadyActive("link supervisor")),
            InitStatus::AlreadyInitialized
        );
        assert_eq!(
            InitStatus::from(&ElrsLinkError::Timeout(Duration::from_secs(5))),
            InitStatus::HandshakeTimeout
        );
        assert_eq!(
            InitStatus::from(&ElrsLinkError::Port("no device".into())),
            InitStatus::LinkStartFailed
        );
        assert_eq!(InitStatus::from(&Ok::<(), ElrsLinkError>(())), InitStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_active_times_out() {
        let link = Link::new(MemoryTransport::new());
        let result = wait_until_active(&link, Duration::from_millis(350)).await;
        assert!(matches!(result, Err(ElrsLinkError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_maps_to_start_failed() {
        let mut transport = MockTransport::new();
        transport
            .expect_open()
            .returning(|_, _| Err(ElrsLinkError::Port("no device".into())));

        let result = LinkSession::open(
            transport,
            "/dev/ttyX",
            BAUD,
            Duration::from_secs(1),
            TelemetryCallbacks::new(),
        )
        .await;
        assert_eq!(InitStatus::from(&result), InitStatus::LinkStartFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_to_running_link_is_rejected() {
        let transport = MemoryTransport::new();
        let link = Arc::new(Link::new(transport.clone()));
        link.start("/dev/ttyTEST", BAUD).await.unwrap();

        let result = LinkSession::attach(
            Arc::clone(&link),
            "/dev/ttyTEST",
            BAUD,
            Duration::from_secs(1),
            TelemetryCallbacks::new(),
        )
        .await;
        assert_eq!(InitStatus::from(&result), InitStatus::AlreadyInitialized);
        assert!(link.is_active());

        link.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_reaches_callback_and_close_fails_safe() {
        let transport = MemoryTransport::new();
        let yaws: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let callbacks = {
            let yaws = Arc::clone(&yaws);
            TelemetryCallbacks::new().on_attitude(move |att| yaws.lock().unwrap().push(att.yaw))
        };

        let session = LinkSession::open(
            transport.clone(),
            "/dev/ttyTEST",
            BAUD,
            Duration::from_secs(1),
            callbacks,
        )
        .await
        .unwrap();
        let mut remote = transport.take_remote().unwrap();
        assert!(session.link().is_active());

        let yaw_1_rad = [0, 0, 0, 0, 0x27, 0x10];
        let attitude = encode_test_frame(CRSF_ADDRESS_RADIO, CRSF_FRAMETYPE_ATTITUDE, &yaw_1_rad);
        remote.write_all(&attitude).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(yaws.lock().unwrap().len(), 1);

        session.link().arm();
        let link = Arc::clone(session.link());
        session.close().await.unwrap();

        assert!(!link.is_active());
        let frames = transport.port.get_written_data();
        let last = decode_frame(frames.last().unwrap()).unwrap();
        assert_eq!(unpack_channels(&last.payload).unwrap(), FAILSAFE_CHANNELS);
        assert_eq!(link.get_channels(), FAILSAFE_CHANNELS);
    }
}
