//! Tick scheduler driven by the scenario harness.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tripwatch_core::{SessionEvent, TickScheduler};

struct Schedule {
    interval: Duration,
    sink: mpsc::Sender<SessionEvent>,
}

/// Records schedules and only ticks when the harness calls [`fire`](Self::fire).
///
/// Keeps timer evaluation on the virtual clock: a tick is stamped with the
/// time the harness chose, not with whenever a background task woke up.
#[derive(Default)]
pub struct ManualTicker {
    schedules: Mutex<BTreeMap<u64, Schedule>>,
    fired: Mutex<u64>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends one tick stamped `at` to every running generation.
    /// Returns how many were delivered.
    pub fn fire(&self, at: Duration) -> usize {
        let schedules = self.schedules.lock().unwrap_or_else(|e| e.into_inner());
        let mut delivered = 0;

        for (generation, schedule) in schedules.iter() {
            let tick = SessionEvent::Tick {
                generation: *generation,
                at,
            };
            match schedule.sink.try_send(tick) {
                Ok(()) => delivered += 1,
                Err(err) => tracing::warn!(generation, error = %err, "Tick not delivered"),
            }
        }

        *self.fired.lock().unwrap_or_else(|e| e.into_inner()) += delivered as u64;
        delivered
    }

    /// Interval of the running schedule, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .next()
            .map(|s| s.interval)
    }

    pub fn active_generations(&self) -> Vec<u64> {
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    pub fn ticks_fired(&self) -> u64 {
        *self.fired.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TickScheduler for ManualTicker {
    fn start(&self, generation: u64, interval: Duration, sink: mpsc::Sender<SessionEvent>) {
        tracing::debug!(generation, ?interval, "Tick schedule started");
        self.schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(generation, Schedule { interval, sink });
    }

    fn stop(&self, generation: u64) {
        if self
            .schedules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&generation)
            .is_some()
        {
            tracing::debug!(generation, "Tick schedule stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fire_reaches_running_generations_only() {
        let ticker = ManualTicker::new();
        let (tx, mut rx) = mpsc::channel(4);

        ticker.start(1, Duration::from_secs(60), tx.clone());
        ticker.start(2, Duration::from_secs(60), tx);
        ticker.stop(1);
        ticker.stop(1);

        assert_eq!(ticker.fire(Duration::from_secs(60)), 1);
        match rx.recv().await {
            Some(SessionEvent::Tick { generation, at }) => {
                assert_eq!(generation, 2);
                assert_eq!(at, Duration::from_secs(60));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ticker.active_generations(), vec![2]);
        assert_eq!(ticker.ticks_fired(), 1);
    }
}
