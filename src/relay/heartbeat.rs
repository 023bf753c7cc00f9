//! Relay liveness timer.
//!
//! The monitor runs as its own task and only emits [`HeartbeatEvent`]s on a
//! channel; the connection supervisor decides what to do with them. Each tick
//! either asks for a heartbeat frame to be sent or, when no acknowledgment
//! has been recorded for more than twice the interval, reports expiry and
//! stops.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default tick interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Emitted by a running [`HeartbeatMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a heartbeat frame now.
    Send,
    /// No acknowledgment within twice the interval; the connection is dead.
    Expired,
}

/// Periodic heartbeat timer with acknowledgment tracking.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    last_ack: Arc<Mutex<Instant>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ack: Arc::new(Mutex::new(Instant::now())),
            task: None,
        }
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking, replacing any running timer. The first tick fires
    /// immediately and the acknowledgment clock starts fresh.
    pub fn start(&mut self, events: mpsc::UnboundedSender<HeartbeatEvent>) {
        self.stop();
        self.record_ack();

        let interval = self.interval;
        let timeout = interval * 2;
        let last_ack = Arc::clone(&self.last_ack);

        log::debug!("Heartbeat started ({}ms)", interval.as_millis());
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let elapsed = last_ack.lock().expect("heartbeat lock poisoned").elapsed();
                if elapsed > timeout {
                    log::warn!(
                        "No heartbeat acknowledgment for {}ms, connection is dead",
                        elapsed.as_millis()
                    );
                    let _ = events.send(HeartbeatEvent::Expired);
                    break;
                }
                if events.send(HeartbeatEvent::Send).is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop ticking. No-op when not running.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Heartbeat stopped");
        }
    }

    /// Whether a timer is active.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Record an acknowledgment received now.
    pub fn record_ack(&self) {
        *self.last_ack.lock().expect("heartbeat lock poisoned") = Instant::now();
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(INTERVAL);
        monitor.start(tx);

        assert_eq!(rx.recv().await, Some(HeartbeatEvent::Send));
        assert!(monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_heartbeats_keep_running() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(INTERVAL);
        monitor.start(tx);

        for _ in 0..5 {
            assert_eq!(rx.recv().await, Some(HeartbeatEvent::Send));
            monitor.record_ack();
        }
        assert!(monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_twice_the_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(INTERVAL);
        let started = Instant::now();
        monitor.start(tx);

        // Ticks at 0s, 10s and 20s are within the window; 30s is past it.
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(HeartbeatEvent::Send));
        }
        assert_eq!(rx.recv().await, Some(HeartbeatEvent::Expired));
        assert_eq!(started.elapsed(), INTERVAL * 3);

        // The task ends after expiry.
        assert_eq!(rx.recv().await, None);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_timer() {
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(INTERVAL);

        monitor.start(first_tx);
        assert_eq!(first_rx.recv().await, Some(HeartbeatEvent::Send));

        monitor.start(second_tx);
        // The first timer's sender is dropped with its aborted task.
        assert_eq!(first_rx.recv().await, None);
        assert_eq!(second_rx.recv().await, Some(HeartbeatEvent::Send));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = HeartbeatMonitor::new(INTERVAL);
        monitor.start(tx);
        assert_eq!(rx.recv().await, Some(HeartbeatEvent::Send));

        monitor.stop();
        assert_eq!(rx.recv().await, None);
        assert!(!monitor.is_running());
    }
}
