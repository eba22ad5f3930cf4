//! # Receive Loop
//!
//! Reads telemetry on the refresh cadence, routes decoded frames and keeps
//! the transmitter synchronised when telemetry goes quiet.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{ControlMessage, PacketCounters};
use crate::crsf::reader::FrameReader;
use crate::error::Result;
use crate::serial::PortReader;
use crate::telemetry::queue::TelemetryQueues;
use crate::telemetry::TelemetryFrame;

/// Refresh intervals of silence before a model-id request goes out
const INACTIVITY_FACTOR: u32 = 4;

/// Decides when to ask the transmitter to resend its model id.
///
/// A request is due once both the last telemetry and the last request are
/// older than the inactivity threshold, so silence produces one request per
/// window rather than one per tick.
#[derive(Debug)]
pub(crate) struct ResyncWatchdog {
    max_inactivity: Duration,
    last_telemetry: Instant,
    last_request: Instant,
}

impl ResyncWatchdog {
    pub(crate) fn new(max_inactivity: Duration, now: Instant) -> Self {
        Self {
            max_inactivity,
            last_telemetry: now,
            last_request: now,
        }
    }

    pub(crate) fn telemetry_received(&mut self, now: Instant) {
        self.last_telemetry = now;
    }

    /// True when a request should be sent now; records it as sent
    pub(crate) fn poll(&mut self, now: Instant) -> bool {
        let quiet = now.duration_since(self.last_telemetry) > self.max_inactivity;
        let not_recent = now.duration_since(self.last_request) > self.max_inactivity;

        if quiet && not_recent {
            self.last_request = now;
            true
        } else {
            false
        }
    }
}

pub struct RecvLoop {
    reader: FrameReader<PortReader>,
    port_name: String,
    refresh_rate: Duration,
    counters: Arc<PacketCounters>,
    telemetry: TelemetryQueues,
    control_tx: mpsc::Sender<ControlMessage>,
}

impl RecvLoop {
    pub fn new(
        reader: PortReader,
        port_name: impl Into<String>,
        refresh_rate: Duration,
        counters: Arc<PacketCounters>,
        telemetry: TelemetryQueues,
        control_tx: mpsc::Sender<ControlMessage>,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            port_name: port_name.into(),
            refresh_rate,
            counters,
            telemetry,
            control_tx,
        }
    }

    /// Run until cancelled or until the port fails.
    ///
    /// Each tick makes one decode attempt bounded by half the refresh
    /// interval. Checksum and payload errors are counted and skipped; a read
    /// failure or end of stream ends the loop with `Port`.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(port = %self.port_name, refresh = ?self.refresh_rate, "Receive loop starting");

        let read_budget = self.refresh_rate / 2;
        let mut watchdog =
            ResyncWatchdog::new(self.refresh_rate * INACTIVITY_FACTOR, Instant::now());
        let mut ticker = interval_at(Instant::now() + self.refresh_rate, self.refresh_rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            if watchdog.poll(now) {
                let silent_for = now.duration_since(watchdog.last_telemetry);
                debug!("No telemetry for {:?}, requesting model id", silent_for);
                self.enqueue(ControlMessage::SendModelId);
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                attempt = timeout(read_budget, self.reader.decode_next()) => attempt,
            };

            match attempt {
                // Nothing arrived this tick
                Err(_) => continue,
                Ok(Ok(frame)) => {
                    self.counters.record_received();
                    watchdog.telemetry_received(now);
                    self.dispatch(frame);
                }
                Ok(Err(e)) if e.is_recoverable() => {
                    self.counters.record_error();
                    warn!(port = %self.port_name, "Discarding frame: {}", e);
                }
                Ok(Err(e)) => {
                    error!(port = %self.port_name, "Receive loop stopping: {}", e);
                    return Err(e);
                }
            }
        }

        info!(
            port = %self.port_name,
            received = self.counters.snapshot().received,
            "Receive loop exiting"
        );
        Ok(())
    }

    fn enqueue(&self, message: ControlMessage) {
        match self.control_tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => warn!("Control queue full, dropping {:?}", message),
            Err(TrySendError::Closed(_)) => debug!("Control queue closed"),
        }
    }

    fn dispatch(&self, frame: TelemetryFrame) {
        match frame {
            TelemetryFrame::Sync(sync) => {
                trace!(rate = sync.rate, offset = sync.offset, "Timing sync");
                self.enqueue(ControlMessage::RateSync {
                    rate: sync.rate,
                    offset: sync.offset,
                });
            }
            TelemetryFrame::LinkStats(_)
            | TelemetryFrame::Battery(_)
            | TelemetryFrame::Gps(_)
            | TelemetryFrame::Attitude(_) => {
                if !self.telemetry.publish(&frame) {
                    debug!(kind = frame.kind(), "Telemetry queue full, dropping value");
                }
            }
            TelemetryFrame::FlightMode(_)
            | TelemetryFrame::LinkTx(_)
            | TelemetryFrame::LinkRx(_)
            | TelemetryFrame::Barometer(_)
            | TelemetryFrame::Variometer(_)
            | TelemetryFrame::BarometerVariometer(_)
            | TelemetryFrame::Unrecognized { .. } => {
                trace!(kind = frame.kind(), "Ignoring telemetry frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::decoder::encode_test_frame;
    use crate::crsf::protocol::*;
    use crate::error::ElrsLinkError;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_millis(4);

    struct Harness {
        remote: DuplexStream,
        counters: Arc<PacketCounters>,
        telemetry: TelemetryQueues,
        control_rx: mpsc::Receiver<ControlMessage>,
    }

    fn recv_loop() -> (RecvLoop, Harness) {
        let (remote, local) = tokio::io::duplex(1024);
        let counters = Arc::new(PacketCounters::default());
        let telemetry = TelemetryQueues::new();
        let (control_tx, control_rx) = mpsc::channel(16);

        let recv = RecvLoop::new(
            Box::new(local),
            "/dev/ttyTEST",
            PERIOD,
            Arc::clone(&counters),
            telemetry.clone(),
            control_tx,
        );
        (recv, Harness { remote, counters, telemetry, control_rx })
    }

    fn battery_frame() -> Vec<u8> {
        // 12.6 V, 1.5 A, 850 mAh, 76 %
        encode_test_frame(
            CRSF_ADDRESS_RADIO,
            CRSF_FRAMETYPE_BATTERY_SENSOR,
            &[0x00, 0x7E, 0x00, 0x0F, 0x00, 0x03, 0x52, 76],
        )
    }

    fn sync_frame(rate: i32, offset: i32) -> Vec<u8> {
        let mut payload = vec![
            CRSF_ADDRESS_RADIO,
            CRSF_ADDRESS_TRANSMITTER,
            CRSF_RADIO_ID_SUBTYPE_TIMING,
        ];
        payload.extend_from_slice(&rate.to_be_bytes());
        payload.extend_from_slice(&offset.to_be_bytes());
        encode_test_frame(CRSF_ADDRESS_RADIO, CRSF_FRAMETYPE_RADIO_ID, &payload)
    }

    fn drain_control(rx: &mut mpsc::Receiver<ControlMessage>) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return messages,
            }
        }
    }

    #[test]
    fn test_watchdog_fires_once_per_window() {
        let start = Instant::now();
        let mut watchdog = ResyncWatchdog::new(Duration::from_millis(16), start);

        assert!(!watchdog.poll(start + Duration::from_millis(16)));
        assert!(watchdog.poll(start + Duration::from_millis(17)));
        assert!(!watchdog.poll(start + Duration::from_millis(20)));
        assert!(!watchdog.poll(start + Duration::from_millis(33)));
        assert!(watchdog.poll(start + Duration::from_millis(34)));
    }

    #[test]
    fn test_watchdog_quiet_while_telemetry_flows() {
        let start = Instant::now();
        let mut watchdog = ResyncWatchdog::new(Duration::from_millis(16), start);

        for ms in (4..200).step_by(4) {
            let now = start + Duration::from_millis(ms);
            watchdog.telemetry_received(now);
            assert!(!watchdog.poll(now));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_routes_battery_to_queue() {
        let (recv, mut h) = recv_loop();
        h.remote.write_all(&battery_frame()).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        sleep(PERIOD * 2).await;

        let battery = h.telemetry.battery.subscribe().try_recv().unwrap();
        assert!((battery.voltage - 12.6).abs() < 0.01);
        assert_eq!(battery.remaining_percent, 76);
        assert_eq!(h.counters.snapshot().received, 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_checksum_mismatch_counted_once_and_dropped() {
        let (recv, mut h) = recv_loop();
        let mut corrupted = battery_frame();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        h.remote.write_all(&corrupted).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        sleep(PERIOD * 3).await;

        let stats = h.counters.snapshot();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.received, 0);
        assert_eq!(h.telemetry.total_len(), 0);

        // The stream recovers on the next good frame
        h.remote.write_all(&battery_frame()).await.unwrap();
        sleep(PERIOD * 2).await;
        assert_eq!(h.telemetry.battery.len(), 1);
        assert_eq!(h.counters.snapshot().errors, 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_frame_forwarded_as_rate_sync() {
        let (recv, mut h) = recv_loop();
        h.remote.write_all(&sync_frame(20_000, -150)).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        sleep(PERIOD * 2).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(
            drain_control(&mut h.control_rx),
            vec![ControlMessage::RateSync { rate: 20_000, offset: -150 }]
        );
        assert_eq!(h.telemetry.total_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrouted_kinds_are_discarded() {
        let (recv, mut h) = recv_loop();
        let flight_mode =
            encode_test_frame(CRSF_ADDRESS_RADIO, CRSF_FRAMETYPE_FLIGHT_MODE, b"ACRO\0");
        h.remote.write_all(&flight_mode).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        sleep(PERIOD * 2).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(h.counters.snapshot().received, 1);
        assert_eq!(h.telemetry.total_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_requests_model_id_once() {
        let (recv, mut h) = recv_loop();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv.run(cancel.clone()));
        sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(drain_control(&mut h.control_rx), vec![ControlMessage::SendModelId]);
        drop(h.remote);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_ends_loop() {
        let (recv, h) = recv_loop();
        drop(h.remote);

        let result = recv.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(ElrsLinkError::Port(_))));
    }
}
