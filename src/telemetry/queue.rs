//! # Telemetry Output Queues
//!
//! One bounded queue per routed telemetry kind. The receive loop is the only
//! producer and never waits: when a queue is full the new value is dropped
//! and the older, unread values stay, so under sustained overload consumers
//! see stale data.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, Notify};

use super::TelemetryFrame;
use crate::crsf::protocol::{Attitude, BatterySensor, GpsData, LinkStatistics};

/// Depth of every telemetry output queue
pub const TELEMETRY_QUEUE_DEPTH: usize = 10;

/// Bounded single-producer queue with a drop-new policy
#[derive(Debug)]
pub struct TelemetryQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    ready: Arc<Notify>,
}

impl<T> Clone for TelemetryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            ready: Arc::clone(&self.ready),
        }
    }
}

impl<T: Send> TelemetryQueue<T> {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(depth);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            ready: Arc::new(Notify::new()),
        }
    }

    /// Enqueue without waiting. Returns `false` if the value was dropped.
    pub fn push(&self, value: T) -> bool {
        match self.tx.try_send(value) {
            Ok(()) => {
                self.ready.notify_one();
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Number of values waiting to be read
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle for a consumer. Handles share one underlying receiver, so each
    /// value reaches exactly one consumer.
    pub fn subscribe(&self) -> TelemetryReceiver<T> {
        TelemetryReceiver {
            rx: Arc::clone(&self.rx),
            ready: Arc::clone(&self.ready),
        }
    }
}

/// Consumer side of a [`TelemetryQueue`].
///
/// The receiver lock is only held for a non-blocking take, so a consumer
/// waiting in [`TelemetryReceiver::recv`] never hides queued values from one
/// polling with [`TelemetryReceiver::try_recv`].
#[derive(Debug)]
pub struct TelemetryReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    ready: Arc<Notify>,
}

impl<T> Clone for TelemetryReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            ready: Arc::clone(&self.ready),
        }
    }
}

impl<T> TelemetryReceiver<T> {
    /// Wait for the next value. Returns `None` once every producer is gone.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let ready = self.ready.notified();
            match self.take() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => ready.await,
            }
        }
    }

    /// Take the next value if one is ready
    pub fn try_recv(&self) -> Option<T> {
        self.take().ok()
    }

    /// Take everything currently queued, oldest first
    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn take(&self) -> Result<T, TryRecvError> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).try_recv()
    }
}

/// The four routed telemetry queues
#[derive(Debug, Clone)]
pub struct TelemetryQueues {
    pub link_stats: TelemetryQueue<LinkStatistics>,
    pub battery: TelemetryQueue<BatterySensor>,
    pub gps: TelemetryQueue<GpsData>,
    pub attitude: TelemetryQueue<Attitude>,
}

impl Default for TelemetryQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryQueues {
    pub fn new() -> Self {
        Self {
            link_stats: TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH),
            battery: TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH),
            gps: TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH),
            attitude: TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH),
        }
    }

    /// Route a routed-kind frame to its queue.
    ///
    /// Returns `true` only if the frame was enqueued. Kinds without a queue
    /// and frames dropped on a full queue both return `false`.
    pub fn publish(&self, frame: &TelemetryFrame) -> bool {
        match frame {
            TelemetryFrame::LinkStats(stats) => self.link_stats.push(*stats),
            TelemetryFrame::Battery(battery) => self.battery.push(*battery),
            TelemetryFrame::Gps(gps) => self.gps.push(*gps),
            TelemetryFrame::Attitude(attitude) => self.attitude.push(*attitude),
            _ => false,
        }
    }

    /// Total values waiting across all queues
    pub fn total_len(&self) -> usize {
        self.link_stats.len() + self.battery.len() + self.gps.len() + self.attitude.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attitude(yaw: f32) -> Attitude {
        Attitude { pitch: 0.0, roll: 0.0, yaw }
    }

    #[test]
    fn test_push_and_receive() {
        let queue = TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH);
        let rx = queue.subscribe();

        assert!(queue.push(1u32));
        assert!(queue.push(2u32));
        assert_eq!(queue.len(), 2);
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_new_values() {
        let queue = TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH);
        let rx = queue.subscribe();

        let accepted = (0..25u32).filter(|&i| queue.push(i)).count();

        assert_eq!(accepted, TELEMETRY_QUEUE_DEPTH);
        assert_eq!(queue.len(), TELEMETRY_QUEUE_DEPTH);
        // The earliest ten survive, the latest fifteen were discarded
        assert_eq!(rx.drain(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_space_frees_after_consume() {
        let queue = TelemetryQueue::new(2);
        let rx = queue.subscribe();

        assert!(queue.push('a'));
        assert!(queue.push('b'));
        assert!(!queue.push('c'));
        assert_eq!(rx.try_recv(), Some('a'));
        assert!(queue.push('d'));
        assert_eq!(rx.drain(), vec!['b', 'd']);
    }

    #[tokio::test]
    async fn test_consumers_share_values() {
        let queue = TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH);
        let first = queue.subscribe();
        let second = first.clone();

        queue.push(10u8);
        queue.push(20u8);

        assert_eq!(first.recv().await, Some(10));
        assert_eq!(second.recv().await, Some(20));
    }

    #[tokio::test]
    async fn test_poll_while_another_consumer_waits() {
        let queue = TelemetryQueue::new(TELEMETRY_QUEUE_DEPTH);
        let waiting = queue.subscribe();
        let waiter = tokio::spawn(async move { waiting.recv().await });

        // Let the waiter park inside recv
        tokio::task::yield_now().await;

        queue.push(7u16);
        assert_eq!(queue.subscribe().try_recv(), Some(7));

        queue.push(8u16);
        assert_eq!(waiter.await.unwrap(), Some(8));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_publish_routes_by_kind() {
        let queues = TelemetryQueues::new();

        assert!(queues.publish(&TelemetryFrame::Attitude(attitude(1.0))));
        assert!(!queues.publish(&TelemetryFrame::FlightMode("ACRO".into())));
        assert_eq!(queues.attitude.len(), 1);
        assert_eq!(queues.total_len(), 1);
    }

    #[test]
    fn test_publish_burst_keeps_earliest() {
        let queues = TelemetryQueues::new();
        let rx = queues.attitude.subscribe();

        for i in 0..30 {
            queues.publish(&TelemetryFrame::Attitude(attitude(i as f32)));
        }

        let yaws: Vec<f32> = rx.drain().iter().map(|a| a.yaw).collect();
        assert_eq!(yaws, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }
}
