//! # Telemetry Monitor
//!
//! Drains the routed telemetry queues from one dedicated task and hands each
//! value to a registered callback.
//!
//! Callbacks run on the monitor task, never on the caller's thread, and
//! with no ordering guarantee relative to caller code. They must not block:
//! a slow callback stalls delivery of every kind, and once the queues fill
//! the receive loop starts dropping new telemetry.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::queue::{TelemetryQueues, TelemetryReceiver};
use crate::crsf::protocol::{Attitude, BatterySensor, GpsData, LinkStatistics};

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

/// Optional callback per routed telemetry kind
#[derive(Default)]
pub struct TelemetryCallbacks {
    link_stats: Option<Callback<LinkStatistics>>,
    battery: Option<Callback<BatterySensor>>,
    gps: Option<Callback<GpsData>>,
    attitude: Option<Callback<Attitude>>,
}

impl std::fmt::Debug for TelemetryCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryCallbacks")
            .field("link_stats", &self.link_stats.is_some())
            .field("battery", &self.battery.is_some())
            .field("gps", &self.gps.is_some())
            .field("attitude", &self.attitude.is_some())
            .finish()
    }
}

impl TelemetryCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_link_stats(mut self, f: impl Fn(LinkStatistics) + Send + Sync + 'static) -> Self {
        self.link_stats = Some(Box::new(f));
        self
    }

    pub fn on_battery(mut self, f: impl Fn(BatterySensor) + Send + Sync + 'static) -> Self {
        self.battery = Some(Box::new(f));
        self
    }

    pub fn on_gps(mut self, f: impl Fn(GpsData) + Send + Sync + 'static) -> Self {
        self.gps = Some(Box::new(f));
        self
    }

    pub fn on_attitude(mut self, f: impl Fn(Attitude) + Send + Sync + 'static) -> Self {
        self.attitude = Some(Box::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.link_stats.is_none()
            && self.battery.is_none()
            && self.gps.is_none()
            && self.attitude.is_none()
    }
}

fn deliver<T>(callback: &Option<Callback<T>>, value: T) {
    if let Some(callback) = callback {
        callback(value);
    }
}

/// Handle to a running monitor task
#[derive(Debug)]
pub struct TelemetryMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TelemetryMonitor {
    /// Spawn the routing loop over `queues`
    pub fn spawn(queues: &TelemetryQueues, callbacks: TelemetryCallbacks) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(route_loop(
            queues.link_stats.subscribe(),
            queues.battery.subscribe(),
            queues.gps.subscribe(),
            queues.attitude.subscribe(),
            callbacks,
            cancel.clone(),
        ));

        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the routing loop and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Telemetry monitor ended abnormally: {}", e);
        }
    }
}

async fn route_loop(
    link_stats: TelemetryReceiver<LinkStatistics>,
    battery: TelemetryReceiver<BatterySensor>,
    gps: TelemetryReceiver<GpsData>,
    attitude: TelemetryReceiver<Attitude>,
    callbacks: TelemetryCallbacks,
    cancel: CancellationToken,
) {
    debug!(?callbacks, "Telemetry monitor started");

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(value) = link_stats.recv() => deliver(&callbacks.link_stats, value),
            Some(value) = battery.recv() => deliver(&callbacks.battery, value),
            Some(value) = gps.recv() => deliver(&callbacks.gps, value),
            Some(value) = attitude.recv() => deliver(&callbacks.attitude, value),
        }
    }

    debug!("Telemetry monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_callbacks_receive_routed_values() {
        let queues = TelemetryQueues::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let callbacks = {
            let a = Arc::clone(&seen);
            let b = Arc::clone(&seen);
            TelemetryCallbacks::new()
                .on_battery(move |bat| {
                    a.lock().unwrap().push(format!("battery {}", bat.remaining_percent))
                })
                .on_attitude(move |att| b.lock().unwrap().push(format!("attitude {}", att.yaw)))
        };
        let monitor = TelemetryMonitor::spawn(&queues, callbacks);

        queues.battery.push(BatterySensor {
            voltage: 16.8,
            current: 1.0,
            capacity_used: 10,
            remaining_percent: 90,
        });
        queues.attitude.push(Attitude { pitch: 0.0, roll: 0.0, yaw: 2.0 });

        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        monitor.stop().await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["attitude 2".to_string(), "battery 90".to_string()]);
    }

    #[tokio::test]
    async fn test_values_without_callback_are_drained() {
        let queues = TelemetryQueues::new();
        let monitor = TelemetryMonitor::spawn(&queues, TelemetryCallbacks::new());

        queues.gps.push(GpsData {
            latitude: 1.0,
            longitude: 2.0,
            ground_speed: 0.0,
            heading: 0.0,
            altitude: 0,
            satellites: 6,
        });

        for _ in 0..50 {
            if queues.gps.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(queues.gps.is_empty());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_polling_works_while_monitor_waits() {
        let queues = TelemetryQueues::new();
        let monitor = TelemetryMonitor::spawn(&queues, TelemetryCallbacks::new());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let poller = queues.attitude.subscribe();
        queues.attitude.push(Attitude { pitch: 0.0, roll: 0.0, yaw: 3.0 });
        assert_eq!(poller.try_recv().map(|att| att.yaw), Some(3.0));
        assert!(poller.drain().is_empty());

        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_task() {
        let queues = TelemetryQueues::new();
        let monitor = TelemetryMonitor::spawn(&queues, TelemetryCallbacks::new());
        assert!(monitor.is_running());
        tokio::time::timeout(Duration::from_secs(1), monitor.stop())
            .await
            .expect("monitor should stop promptly");
    }

    #[test]
    fn test_callbacks_builder() {
        assert!(TelemetryCallbacks::new().is_empty());
        assert!(!TelemetryCallbacks::new().on_gps(|_| {}).is_empty());
    }
}
