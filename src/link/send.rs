//! # Send Loop
//!
//! Transmits the current channel set once per tick and services control
//! messages. Each iteration does exactly one of the two, so a tick write
//! and a command write never interleave.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::{ChannelState, FAILSAFE_CHANNELS};
use super::{ControlMessage, PacketCounters};
use crate::crsf::encoder::{create_model_id_frame, create_ping_devices_frame, pack_channels};
use crate::crsf::timing::adjust_send_rate;
use crate::error::{ElrsLinkError, Result};
use crate::serial::PortWriter;

/// Model slot addressed by the "select model ID" command
pub const DEFAULT_MODEL_ID: u8 = 0;

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Everything the send loop owns while it runs
pub struct SendLoop {
    writer: PortWriter,
    port_name: String,
    refresh_rate: Duration,
    channels: ChannelState,
    counters: Arc<PacketCounters>,
    control_rx: mpsc::Receiver<ControlMessage>,
}

impl SendLoop {
    pub fn new(
        writer: PortWriter,
        port_name: impl Into<String>,
        refresh_rate: Duration,
        channels: ChannelState,
        counters: Arc<PacketCounters>,
        control_rx: mpsc::Receiver<ControlMessage>,
    ) -> Self {
        Self {
            writer,
            port_name: port_name.into(),
            refresh_rate,
            channels,
            counters,
            control_rx,
        }
    }

    /// Run until cancelled or until a channel write fails.
    ///
    /// On cancellation one failsafe frame is written before the port is
    /// closed. A failed channel write ends the loop with `Port`; it is not
    /// retried.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(port = %self.port_name, refresh = ?self.refresh_rate, "Send loop starting");

        let mut ticker = ticker(self.refresh_rate);
        let mut control_open = true;

        let result = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Ok(()),

                message = self.control_rx.recv(), if control_open => match message {
                    Some(message) => self.handle_control(message, &mut ticker).await,
                    None => {
                        debug!("Control queue closed");
                        control_open = false;
                    }
                },

                _ = ticker.tick() => {
                    if let Err(e) = self.write_channels().await {
                        error!(port = %self.port_name, "Could not write channels: {}", e);
                        break Err(e);
                    }
                }
            }
        };

        if result.is_ok() {
            self.write_failsafe().await;
        }
        if let Err(e) = self.writer.close().await {
            warn!(port = %self.port_name, "Failed to close port: {}", e);
        }

        info!(
            port = %self.port_name,
            sent = self.counters.snapshot().sent,
            "Send loop exiting"
        );
        result
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.writer
            .write_all(frame)
            .await
            .map_err(|e| ElrsLinkError::Port(format!("Failed to write packet: {}", e)))?;

        self.writer
            .flush()
            .await
            .map_err(|e| ElrsLinkError::Port(format!("Failed to flush serial port: {}", e)))
    }

    async fn write_channels(&mut self) -> Result<()> {
        let frame = pack_channels(&self.channels.get());
        self.write_frame(&frame).await?;
        self.counters.record_sent();
        Ok(())
    }

    async fn write_failsafe(&mut self) {
        let frame = pack_channels(&FAILSAFE_CHANNELS);
        match self.write_frame(&frame).await {
            Ok(()) => debug!(port = %self.port_name, "Wrote failsafe channels"),
            Err(e) => warn!(port = %self.port_name, "Could not write failsafe channels: {}", e),
        }
    }

    async fn handle_control(&mut self, message: ControlMessage, ticker: &mut Interval) {
        match message {
            ControlMessage::SendModelId => {
                debug!("Writing model id frame");
                let frame = create_model_id_frame(DEFAULT_MODEL_ID);
                if let Err(e) = self.write_frame(&frame).await {
                    self.counters.record_error();
                    warn!(port = %self.port_name, "Could not write model id frame: {}", e);
                }
            }
            ControlMessage::PingDevices => {
                debug!("Pinging devices");
                let frame = create_ping_devices_frame();
                if let Err(e) = self.write_frame(&frame).await {
                    self.counters.record_error();
                    warn!(port = %self.port_name, "Could not write ping devices frame: {}", e);
                }
            }
            ControlMessage::RateSync { rate, offset } => match adjust_send_rate(rate, offset) {
                Some(period) => {
                    if period != ticker.period() {
                        debug!(rate, offset, ?period, "Adjusting send rate");
                    }
                    *ticker = self::ticker(period);
                }
                None => warn!(rate, offset, "Ignoring sync with invalid rate"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::decoder::{decode_frame, unpack_channels};
    use crate::crsf::protocol::{CRSF_FRAMETYPE_COMMAND, CRSF_FRAMETYPE_DEVICE_PING};
    use crate::link::task::SupervisedTask;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use std::io;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_millis(4);

    struct Harness {
        port: MockSerialPort,
        channels: ChannelState,
        counters: Arc<PacketCounters>,
        control_tx: mpsc::Sender<ControlMessage>,
    }

    fn send_loop() -> (SendLoop, Harness) {
        let port = MockSerialPort::new();
        let channels = ChannelState::default();
        let counters = Arc::new(PacketCounters::default());
        let (control_tx, control_rx) = mpsc::channel(16);

        let send = SendLoop::new(
            Box::new(port.clone()),
            "/dev/ttyTEST",
            PERIOD,
            channels.clone(),
            Arc::clone(&counters),
            control_rx,
        );
        (send, Harness { port, channels, counters, control_tx })
    }

    fn frame_types(port: &MockSerialPort) -> Vec<u8> {
        port.get_written_data().iter().map(|f| f[2]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_one_frame_per_tick() {
        let (send, h) = send_loop();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));

        sleep(PERIOD * 10 + Duration::from_millis(1)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        // Ten ticks plus the trailing failsafe frame
        assert_eq!(h.counters.snapshot().sent, 10);
        assert_eq!(h.port.frame_count(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_current_channels() {
        let (send, h) = send_loop();
        let mut set = [1000u16; 16];
        set[0] = 172;
        set[2] = 1811;
        h.channels.update(set);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));
        sleep(PERIOD + Duration::from_millis(1)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let first = decode_frame(&h.port.get_written_data()[0]).unwrap();
        assert_eq!(unpack_channels(&first.payload).unwrap(), set);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_writes_failsafe_then_closes() {
        let (send, h) = send_loop();
        let mut armed = [992u16; 16];
        armed[2] = 1811; // throttle up
        armed[4] = 1984; // armed
        h.channels.update(armed);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));
        sleep(PERIOD * 3).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let frames = h.port.get_written_data();
        let last = decode_frame(frames.last().unwrap()).unwrap();
        assert_eq!(unpack_channels(&last.payload).unwrap(), FAILSAFE_CHANNELS);
        assert!(h.port.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_control_frames() {
        let (send, h) = send_loop();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));

        h.control_tx.send(ControlMessage::SendModelId).await.unwrap();
        h.control_tx.send(ControlMessage::PingDevices).await.unwrap();
        sleep(Duration::from_millis(1)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let types = frame_types(&h.port);
        assert_eq!(types[0], CRSF_FRAMETYPE_COMMAND);
        assert_eq!(types[1], CRSF_FRAMETYPE_DEVICE_PING);
        assert_eq!(h.port.get_written_data()[0], create_model_id_frame(DEFAULT_MODEL_ID));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_sync_changes_cadence() {
        let (send, h) = send_loop();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));

        // 2 ms, twice the nominal rate
        h.control_tx
            .send(ControlMessage::RateSync { rate: 20_000, offset: 0 })
            .await
            .unwrap();
        sleep(Duration::from_millis(20) + Duration::from_micros(500)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(h.counters.snapshot().sent, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_rate_sync_keeps_interval() {
        let (send, h) = send_loop();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));

        h.control_tx
            .send(ControlMessage::RateSync { rate: 0, offset: 0 })
            .await
            .unwrap();
        sleep(PERIOD * 5 + Duration::from_millis(1)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(h.counters.snapshot().sent, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_write_failure_ends_loop() {
        let (send, h) = send_loop();
        h.port.set_write_error(io::ErrorKind::BrokenPipe);

        let result = send.run(CancellationToken::new()).await;

        assert!(matches!(result, Err(ElrsLinkError::Port(_))));
        assert_eq!(h.counters.snapshot().sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_write_failure_is_counted_not_fatal() {
        let (send, h) = send_loop();
        h.port.set_flush_error(io::ErrorKind::TimedOut);
        h.control_tx.send(ControlMessage::SendModelId).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(send.run(cancel.clone()));
        sleep(Duration::from_millis(1)).await;

        assert_eq!(h.counters.snapshot().errors, 1);
        assert!(!task.is_finished());

        // The next tick hits the same flush error and that one is fatal
        sleep(PERIOD).await;
        assert!(matches!(task.await.unwrap(), Err(ElrsLinkError::Port(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_leaves_one_writer() {
        let (first, h) = send_loop();
        let (_, control_rx) = mpsc::channel(16);
        let second = SendLoop::new(
            Box::new(h.port.clone()),
            "/dev/ttyTEST",
            PERIOD,
            h.channels.clone(),
            Arc::clone(&h.counters),
            control_rx,
        );

        let mut task = SupervisedTask::new("send loop");
        task.start(|cancel| first.run(cancel)).unwrap();
        let duplicate = task.start(|cancel| second.run(cancel));
        assert!(matches!(duplicate, Err(ElrsLinkError::AlreadyActive(_))));

        sleep(PERIOD * 10 + Duration::from_millis(1)).await;
        task.stop().await.unwrap();

        // One frame per tick, not two
        assert_eq!(h.counters.snapshot().sent, 10);
    }
}
