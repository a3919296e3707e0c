//! Clock and timer primitives shared by every poller in the system.
//!
//! All polling and delayed actions go through [`Ticker`], [`after`] and
//! [`TaskHandle`] rather than raw `tokio::spawn` + `sleep`, so tests can run
//! them under paused tokio time and cancel them deterministically. Timestamps
//! come from an injected [`Clock`]; [`MonotonicClock`] follows tokio's clock,
//! which keeps recorded durations exact when time is paused.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::warn;

/// Source of wall-clock timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    fn millis_since(&self, earlier: DateTime<Utc>) -> u64 {
        (self.now() - earlier).num_milliseconds().max(0) as u64
    }
}

/// Plain `Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock anchor advanced by tokio's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_wall: DateTime<Utc>,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: Utc::now(),
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

/// Repeating tick. The first tick completes one full period after creation,
/// matching interval-timer semantics; a slow tick delays the next one instead
/// of bursting to catch up. A zero period is raised to [`MIN_PERIOD`].
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
}

/// Shortest period a [`Ticker`] will run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let period = if period.is_zero() {
            warn!("Zero ticker period, using {}ms", MIN_PERIOD.as_millis());
            MIN_PERIOD
        } else {
            period
        };
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Handle to a spawned timer task. Dropping it leaves the task running;
/// [`TaskHandle::cancel`] clears it.
#[derive(Debug)]
pub struct TaskHandle {
    inner: JoinHandle<()>,
}

impl TaskHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: tokio::spawn(future),
        }
    }

    pub fn cancel(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Run `action` once after `delay`. A zero delay still yields to the
/// scheduler before running.
pub fn after<F>(delay: Duration, action: F) -> TaskHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    TaskHandle::spawn(async move {
        tokio::time::sleep(delay).await;
        action.await;
    })
}
