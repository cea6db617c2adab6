use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Parameters for the leaky bucket used by [`Throttler`].
///
/// The bucket's weight decays linearly as `y(x) = k*x + m`, where `x` is the
/// number of seconds since the last transmission and `m` the weight recorded
/// then.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Decay per second; must be negative
    pub k: f64,
    /// Weight at which sending stops until the bucket drains
    pub burst: f64,
    /// Weight added by each transmitted line
    pub increment: f64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            k: -1.2,
            burst: 3.0,
            increment: 1.0,
        }
    }
}

impl ThrottleSettings {
    /// Check that the bucket can ever drain and ever permit a line
    pub fn validate(&self) -> Result<(), String> {
        if !(self.k.is_finite() && self.k < 0.0) {
            return Err(format!("throttle k must be negative, not {}", self.k));
        }
        if !(self.burst.is_finite() && self.burst > 0.0) {
            return Err(format!("throttle burst must be positive, not {}", self.burst));
        }
        if !(self.increment.is_finite() && self.increment > 0.0) {
            return Err(format!(
                "throttle increment must be positive, not {}",
                self.increment
            ));
        }
        Ok(())
    }
}

/// Outbound line queue for one connection, released at the rate the bucket permits.
///
/// Nothing here sleeps: the main loop pops whatever is permitted and uses
/// [`Throttler::next_permitted_in`] to bound its own sliced waits.
#[derive(Debug)]
pub struct Throttler {
    settings: ThrottleSettings,
    t0: Instant,
    m: f64,
    pending: VecDeque<String>,
}

impl Throttler {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            t0: Instant::now(),
            m: 0.0,
            pending: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    fn slope(&self) -> f64 {
        self.settings.k.min(-f64::EPSILON)
    }

    /// The bucket's weight at `now`, without modifying any state. May be negative
    /// if the bucket has drained since the last send.
    pub fn weight_at(&self, now: Instant) -> f64 {
        let x = now.saturating_duration_since(self.t0).as_secs_f64();
        self.slope() * x + self.m
    }

    /// Current weight, starting afresh from an empty bucket once it has fully drained
    fn current_weight(&mut self, now: Instant) -> f64 {
        let y = self.weight_at(now);
        if y < 0.0 {
            self.t0 = now;
            self.m = 0.0;
            0.0
        } else {
            y
        }
    }

    /// How long until a bucket at weight `y` would permit a send
    fn time_until_permitted(&self, y: f64) -> Duration {
        if y < self.settings.burst {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((y - self.settings.burst) / -self.slope())
                .unwrap_or(Duration::MAX)
                .saturating_add(Duration::from_millis(1))
        }
    }

    /// Queue a line behind any already waiting
    pub fn enqueue(&mut self, line: String) {
        self.pending.push_back(line);
    }

    /// Number of lines waiting for the bucket
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Take the oldest queued line if the bucket permits sending it at `now`,
    /// charging the bucket for it.
    pub fn pop_permitted(&mut self, now: Instant) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }

        let y = self.current_weight(now);
        if y >= self.settings.burst {
            tracing::trace!(weight = y, queued = self.pending.len(), "Throttling outgoing lines");
            return None;
        }

        let line = self.pending.pop_front()?;
        self.m = y + self.settings.increment;
        self.t0 = now;
        Some(line)
    }

    /// How long from `now` until the next queued line may go out, or `None`
    /// if nothing is queued
    pub fn next_permitted_in(&self, now: Instant) -> Option<Duration> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.time_until_permitted(self.weight_at(now).max(0.0)))
        }
    }
}
