//! # Link Supervisor
//!
//! Owns one transmitter session at a time: opens the port, runs the send
//! and receive loops against it, and tears both down on stop.
//!
//! This module handles:
//! - Session lifecycle (start, stop, state queries)
//! - The shared channel set written by callers and read by the send loop
//! - Control requests (model id, device ping) queued to the send loop
//! - Packet counters and telemetry queues exposed to callers

pub mod channels;
pub mod recv;
pub mod send;
pub mod session;
pub mod task;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::crsf::protocol::RcChannels;
use crate::crsf::timing::get_refresh_rate;
use crate::error::{ElrsLinkError, Result};
use crate::serial::{PortState, Transport};
use crate::telemetry::queue::TelemetryQueues;
use channels::{ChannelState, ARM_VALUE, DISARM_VALUE};
use recv::RecvLoop;
use send::SendLoop;
use task::SupervisedTask;

/// Depth of the queue carrying control requests to the send loop
pub const CONTROL_QUEUE_DEPTH: usize = 16;

/// Requests serviced by the send loop between channel ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    SendModelId,
    PingDevices,
    /// Timing report from the transmitter, in units of 0.1 µs
    RateSync { rate: i32, offset: i32 },
}

/// Lifecycle of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Inactive,
    Starting,
    Active,
    Stopping,
    Failed,
}

/// Counters shared by both loops
#[derive(Debug, Default)]
pub struct PacketCounters {
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`PacketCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketStats {
    pub sent: u64,
    pub received: u64,
    pub errors: u64,
}

impl PacketCounters {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PacketStats {
        PacketStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// The two loops of one session
struct Session {
    send: SupervisedTask,
    recv: SupervisedTask,
}

/// Supervisor for the link to an ELRS transmitter module.
///
/// All methods take `&self`; wrap the supervisor in an `Arc` to share it.
///
/// # Examples
///
/// ```no_run
/// use elrs_link::link::Link;
/// use elrs_link::serial::SerialTransport;
///
/// #[tokio::main]
/// async fn main() -> elrs_link::error::Result<()> {
///     let link = Link::new(SerialTransport);
///     link.start("/dev/ttyUSB0", 921_600).await?;
///     link.send_model_id();
///     link.stop().await
/// }
/// ```
pub struct Link<T: Transport> {
    transport: T,
    channels: ChannelState,
    counters: Arc<PacketCounters>,
    telemetry: TelemetryQueues,
    state: RwLock<SupervisorState>,
    port_state: RwLock<PortState>,
    control_tx: Mutex<Option<mpsc::Sender<ControlMessage>>>,
    session: tokio::sync::Mutex<Session>,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channels: ChannelState::default(),
            counters: Arc::new(PacketCounters::default()),
            telemetry: TelemetryQueues::new(),
            state: RwLock::new(SupervisorState::Inactive),
            port_state: RwLock::new(PortState::Unknown),
            control_tx: Mutex::new(None),
            session: tokio::sync::Mutex::new(Session {
                send: SupervisedTask::new("send loop"),
                recv: SupervisedTask::new("receive loop"),
            }),
        }
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_port_state(&self, state: PortState) {
        *self.port_state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn port_state(&self) -> PortState {
        *self.port_state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// True between a successful start and the next stop
    pub fn is_active(&self) -> bool {
        self.state() == SupervisorState::Active
    }

    /// Open `port_name` and start both loops.
    ///
    /// The send cadence follows the baud rate. Counters are reset for the
    /// new session.
    ///
    /// # Errors
    ///
    /// - `AlreadyActive` if a session is running; the running session is
    ///   left untouched
    /// - whatever the transport returns when the port cannot be opened
    pub async fn start(&self, port_name: &str, baud_rate: u32) -> Result<()> {
        let mut session = self.session.lock().await;

        if matches!(
            self.state(),
            SupervisorState::Starting | SupervisorState::Active | SupervisorState::Stopping
        ) || session.send.is_running()
            || session.recv.is_running()
        {
            return Err(ElrsLinkError::AlreadyActive("link supervisor"));
        }

        self.set_state(SupervisorState::Starting);
        self.set_port_state(PortState::Opening);

        let port = match self.transport.open(port_name, baud_rate) {
            Ok(port) => port,
            Err(e) => {
                warn!("Could not open {}: {}", port_name, e);
                self.set_port_state(PortState::Failed);
                self.set_state(SupervisorState::Failed);
                return Err(e);
            }
        };
        self.set_port_state(PortState::Connected);

        let refresh_rate = get_refresh_rate(port.baud_rate());
        let name = port.name().to_string();
        let (reader, writer) = port.into_parts();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        self.counters.reset();

        let recv = RecvLoop::new(
            reader,
            name.clone(),
            refresh_rate,
            Arc::clone(&self.counters),
            self.telemetry.clone(),
            control_tx.clone(),
        );
        let send = SendLoop::new(
            writer,
            name.clone(),
            refresh_rate,
            self.channels.clone(),
            Arc::clone(&self.counters),
            control_rx,
        );

        session.recv.start(|cancel| recv.run(cancel))?;
        if let Err(e) = session.send.start(|cancel| send.run(cancel)) {
            let _ = session.recv.stop().await;
            self.set_state(SupervisorState::Failed);
            return Err(e);
        }

        *self.control_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(control_tx);
        self.set_state(SupervisorState::Active);

        info!(port = %name, baud_rate, ?refresh_rate, "Link started");
        Ok(())
    }

    /// Stop both loops and wait for them to exit.
    ///
    /// The send loop writes one failsafe frame and closes the port on its
    /// way out. Returns the first terminal error of the two loops. Safe to
    /// call when nothing is running.
    pub async fn stop(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        let was_running = session.send.is_running() || session.recv.is_running();

        if self.state() == SupervisorState::Active {
            self.set_state(SupervisorState::Stopping);
        }
        self.control_tx.lock().unwrap_or_else(|e| e.into_inner()).take();

        let send_result = session.send.stop().await;
        let recv_result = session.recv.stop().await;

        if self.port_state() == PortState::Connected {
            self.set_port_state(PortState::Closed);
        }

        let result = send_result.and(recv_result);
        match &result {
            Ok(()) => self.set_state(SupervisorState::Inactive),
            Err(e) => {
                warn!("Link stopped with error: {}", e);
                self.set_state(SupervisorState::Failed);
            }
        }

        if was_running {
            let stats = self.counters.snapshot();
            info!(
                sent = stats.sent,
                received = stats.received,
                errors = stats.errors,
                "Link stopped"
            );
        }
        result
    }

    /// Replace the channel set sent on the next tick
    pub fn update_channels(&self, channels: RcChannels) {
        self.channels.update(channels);
    }

    pub fn get_channels(&self) -> RcChannels {
        self.channels.get()
    }

    /// Change one channel. Indices past the last channel are ignored.
    pub fn set_channel(&self, index: usize, value: u16) {
        self.channels.set(index, value);
    }

    pub fn arm(&self) {
        self.channels.set(channels::channels::ARM, ARM_VALUE);
    }

    pub fn disarm(&self) {
        self.channels.set(channels::channels::ARM, DISARM_VALUE);
    }

    /// Ask the transmitter to select the model id. No-op without a session.
    pub fn send_model_id(&self) {
        self.enqueue(ControlMessage::SendModelId);
    }

    /// Ping attached CRSF devices. No-op without a session.
    pub fn ping_devices(&self) {
        self.enqueue(ControlMessage::PingDevices);
    }

    fn enqueue(&self, message: ControlMessage) {
        let guard = self.control_tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = guard.as_ref() else {
            debug!("No active session, ignoring {:?}", message);
            return;
        };

        match tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => warn!("Control queue full, dropping {:?}", message),
            Err(TrySendError::Closed(message)) => debug!("Send loop gone, dropping {:?}", message),
        }
    }

    pub fn counters(&self) -> PacketStats {
        self.counters.snapshot()
    }

    /// Queues of decoded link statistics, battery, GPS and attitude values.
    ///
    /// Every receiver of a queue shares it: each value reaches exactly one
    /// consumer. With a [`TelemetryMonitor`] running, a value goes either to
    /// its callback or to a caller polling with `try_recv`/`drain`, whichever
    /// takes it first. Polling never waits on the monitor.
    ///
    /// [`TelemetryMonitor`]: crate::telemetry::monitor::TelemetryMonitor
    pub fn telemetry(&self) -> &TelemetryQueues {
        &self.telemetry
    }
}
