//! The "TIME" Engine - elapsed duration and ETA alerts
//!
//! A trip timer is created when a trip enters `in_progress` and dropped when
//! it leaves. Ticks are delivered by a [`TickScheduler`]; every tick carries
//! the generation of the timer that scheduled it, so a tick that was already
//! in flight when its timer stopped is recognised and ignored.
//!
//! Alerts are edge-triggered: each condition fires on its false→true
//! transition only, never on every tick past the threshold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tripwatch_env::TripContext;

use crate::config::EngineConfig;
use crate::event::SessionEvent;
use crate::trip::Trip;

/// Alert produced by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAlert {
    /// Elapsed time passed `max_allowed_duration`
    DurationExceeded { elapsed: Duration },
    /// Estimated arrival is within the near-arrival window
    ApproachingDestination { remaining: Duration },
    /// Estimated arrival has passed
    ArrivalOverdue { overdue: Duration },
}

/// Timing facts for one in-progress trip.
///
/// Times are monotonic milliseconds on the context clock. `start_ms` may be
/// negative for a trip resumed after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripTimerState {
    pub start_ms: i64,
    pub estimated_arrival_ms: i64,
    pub max_allowed_duration: Duration,
}

impl TripTimerState {
    pub fn elapsed(&self, now: Duration) -> Duration {
        let ms = millis(now).saturating_sub(self.start_ms).max(0);
        Duration::from_millis(ms as u64)
    }

    /// Signed milliseconds until the estimated arrival.
    pub fn remaining_ms(&self, now: Duration) -> i64 {
        self.estimated_arrival_ms.saturating_sub(millis(now))
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Estimated trip duration from the distance heuristic.
pub fn estimate_duration(trip: &Trip, config: &EngineConfig) -> Duration {
    let estimate = trip
        .distance_km()
        .and_then(|km| Duration::try_from_secs_f64(km / config.average_speed_kmh * 3600.0).ok());

    match estimate {
        Some(duration) => duration,
        None => {
            tracing::debug!(
                trip = %trip.id,
                distance = %trip.distance,
                "Unusable trip distance, using default duration"
            );
            config.default_trip_duration()
        }
    }
}

/// Edge-triggered evaluator for one trip session.
#[derive(Debug, Clone)]
pub struct TripTimer {
    state: TripTimerState,
    near_arrival_window: Duration,
    generation: u64,
    exceeded: bool,
    approaching: bool,
    overdue: bool,
}

impl TripTimer {
    /// Starts timing a trip that begins now.
    pub fn start(trip: &Trip, now: Duration, generation: u64, config: &EngineConfig) -> Self {
        Self::resume(trip, now, Duration::ZERO, generation, config)
    }

    /// Starts timing a trip that has already been running for `already_elapsed`.
    pub fn resume(
        trip: &Trip,
        now: Duration,
        already_elapsed: Duration,
        generation: u64,
        config: &EngineConfig,
    ) -> Self {
        let start_ms = millis(now).saturating_sub(millis(already_elapsed));
        let estimated_arrival_ms =
            start_ms.saturating_add(millis(estimate_duration(trip, config)));

        Self {
            state: TripTimerState {
                start_ms,
                estimated_arrival_ms,
                max_allowed_duration: config.max_allowed_duration(),
            },
            near_arrival_window: config.near_arrival_window(),
            generation,
            exceeded: false,
            approaching: false,
            overdue: false,
        }
    }

    pub fn state(&self) -> &TripTimerState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Evaluates all three conditions at `now` and returns the ones that just
    /// became true.
    pub fn evaluate(&mut self, now: Duration) -> Vec<TimerAlert> {
        let mut alerts = Vec::new();
        let elapsed = self.state.elapsed(now);
        let remaining_ms = self.state.remaining_ms(now);
        let window_ms = millis(self.near_arrival_window);

        let exceeded = elapsed > self.state.max_allowed_duration;
        if exceeded && !self.exceeded {
            alerts.push(TimerAlert::DurationExceeded { elapsed });
        }
        self.exceeded = exceeded;

        let approaching = remaining_ms > 0 && remaining_ms <= window_ms;
        if approaching && !self.approaching {
            alerts.push(TimerAlert::ApproachingDestination {
                remaining: Duration::from_millis(remaining_ms as u64),
            });
        }
        self.approaching = approaching;

        let overdue = remaining_ms <= 0;
        if overdue && !self.overdue {
            alerts.push(TimerAlert::ArrivalOverdue {
                overdue: Duration::from_millis(remaining_ms.unsigned_abs()),
            });
        }
        self.overdue = overdue;

        alerts
    }
}

/// Produces recurring ticks for a timer generation.
///
/// # Implementations
///
/// - **Production**: [`IntervalTicker`] - background task on the context
/// - **Simulation**: `ManualTicker` - the harness injects ticks itself
pub trait TickScheduler: Send + Sync + 'static {
    /// Begins sending `SessionEvent::Tick { generation, .. }` every `interval`.
    fn start(&self, generation: u64, interval: Duration, sink: mpsc::Sender<SessionEvent>);

    /// Cancels the schedule. Safe to call repeatedly or for unknown generations.
    fn stop(&self, generation: u64);
}

/// Tick scheduler backed by a context-spawned sleep loop.
pub struct IntervalTicker<Ctx: TripContext> {
    ctx: Arc<Ctx>,
    cancels: Mutex<HashMap<u64, watch::Sender<bool>>>,
}

impl<Ctx: TripContext> IntervalTicker<Ctx> {
    pub fn new(ctx: Arc<Ctx>) -> Self {
        Self {
            ctx,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_generations(&self) -> usize {
        self.cancels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<Ctx: TripContext> TickScheduler for IntervalTicker<Ctx> {
    fn start(&self, generation: u64, interval: Duration, sink: mpsc::Sender<SessionEvent>) {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(generation, cancel_tx);

        let ctx = Arc::clone(&self.ctx);
        self.ctx.spawn("trip-timer", async move {
            loop {
                tokio::select! {
                    _ = ctx.sleep(interval) => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                        let tick = SessionEvent::Tick { generation, at: ctx.now() };
                        if sink.send(tick).await.is_err() {
                            break;
                        }
                    }
                    _ = cancel_rx.changed() => break,
                }
            }
            tracing::debug!(generation, "Trip timer loop finished");
        });
    }

    fn stop(&self, generation: u64) {
        let cancel = self
            .cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&generation);
        if let Some(cancel) = cancel {
            let _ = cancel.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_trip;
    use tripwatch_env::TokioContext;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    #[test]
    fn test_estimate_duration_from_distance() {
        let trip = sample_trip(1); // "40 km"
        let config = EngineConfig::default(); // 40 km/h
        assert_eq!(estimate_duration(&trip, &config), minutes(60));
    }

    #[test]
    fn test_estimate_duration_fallback() {
        let mut trip = sample_trip(1);
        trip.distance = "somewhere north".into();
        let config = EngineConfig {
            default_trip_duration_secs: 45 * 60,
            ..EngineConfig::default()
        };
        assert_eq!(estimate_duration(&trip, &config), minutes(45));
    }

    #[test]
    fn test_oversized_distance_falls_back_to_default() {
        let mut trip = sample_trip(1);
        trip.distance = "99999999999999999999999 km".into();
        let config = EngineConfig::default();
        assert_eq!(estimate_duration(&trip, &config), config.default_trip_duration());

        // Fits a Duration but not an i64 of milliseconds
        trip.distance = "1000000000000000 km".into();
        let mut timer = TripTimer::start(&trip, Duration::ZERO, 1, &config);
        assert!(timer.evaluate(minutes(30)).is_empty());
    }

    #[test]
    fn test_duration_exceeded_fires_once() {
        let trip = sample_trip(1);
        let mut timer = TripTimer::start(&trip, Duration::ZERO, 1, &EngineConfig::default());

        let mut exceeded = 0;
        for minute in 1..=180 {
            exceeded += timer
                .evaluate(minutes(minute))
                .iter()
                .filter(|a| matches!(a, TimerAlert::DurationExceeded { .. }))
                .count();
        }
        assert_eq!(exceeded, 1);
    }

    #[test]
    fn test_exceeded_at_61_minutes_not_60() {
        let trip = sample_trip(1);
        let mut timer = TripTimer::start(&trip, Duration::ZERO, 1, &EngineConfig::default());

        let at_60 = timer.evaluate(minutes(60));
        assert!(!at_60.iter().any(|a| matches!(a, TimerAlert::DurationExceeded { .. })));

        let at_61 = timer.evaluate(minutes(61));
        assert!(at_61.contains(&TimerAlert::DurationExceeded { elapsed: minutes(61) }));
    }

    #[test]
    fn test_approaching_then_overdue() {
        let trip = sample_trip(1); // ETA at 60 min, window 10 min
        let mut timer = TripTimer::start(&trip, Duration::ZERO, 1, &EngineConfig::default());

        assert!(timer.evaluate(minutes(49)).is_empty());
        assert_eq!(
            timer.evaluate(minutes(50)),
            vec![TimerAlert::ApproachingDestination { remaining: minutes(10) }]
        );
        assert!(timer.evaluate(minutes(55)).is_empty());
        assert_eq!(
            timer.evaluate(minutes(60)),
            vec![TimerAlert::ArrivalOverdue { overdue: Duration::ZERO }]
        );
        assert!(timer.evaluate(minutes(70)).iter().all(|a| !matches!(a, TimerAlert::ArrivalOverdue { .. })));
    }

    #[test]
    fn test_resume_accounts_for_elapsed_time() {
        let trip = sample_trip(1);
        let mut timer = TripTimer::resume(&trip, minutes(5), minutes(59), 3, &EngineConfig::default());

        assert_eq!(timer.generation(), 3);
        assert_eq!(timer.state().elapsed(minutes(5)), minutes(59));
        // 2 more minutes -> 61 elapsed
        let alerts = timer.evaluate(minutes(7));
        assert!(alerts.iter().any(|a| matches!(a, TimerAlert::DurationExceeded { .. })));
        assert!(alerts.iter().any(|a| matches!(a, TimerAlert::ArrivalOverdue { .. })));
    }

    #[tokio::test]
    async fn test_interval_ticker_sends_and_stops() {
        let ctx = TokioContext::shared();
        let ticker = IntervalTicker::new(ctx);
        let (tx, mut rx) = mpsc::channel(8);

        ticker.start(4, Duration::from_millis(5), tx);
        match rx.recv().await {
            Some(SessionEvent::Tick { generation, .. }) => assert_eq!(generation, 4),
            other => panic!("unexpected event {other:?}"),
        }

        ticker.stop(4);
        ticker.stop(4);
        assert_eq!(ticker.active_generations(), 0);
    }
}
