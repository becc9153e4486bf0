//! Simulation clock.
//!
//! The clock is the single source of truth for tick numbering and tick
//! timestamps. The tick counter advances with checked arithmetic, and the
//! timestamp never moves backwards even if the host's wall clock does.

use chrono::{DateTime, Utc};

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// Tick counter plus the wall-clock time of the latest tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimClock {
    /// Ticks executed so far (0 before the first tick).
    tick: u64,

    /// Time of the latest tick, or of construction before the first tick.
    timestamp: DateTime<Utc>,

    /// Simulated step length in milliseconds.
    tick_interval_ms: u64,
}

impl SimClock {
    /// Create a clock at tick 0.
    pub fn new(tick_interval_ms: u64) -> Self {
        Self {
            tick: 0,
            timestamp: Utc::now(),
            tick_interval_ms,
        }
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// The timestamp becomes `max(now, previous)`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter would exceed
    /// `u64::MAX`. The clock is left unchanged in that case.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.advance_to(Utc::now())
    }

    /// Advance using an explicit wall-clock reading.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        self.timestamp = self.timestamp.max(now);
        Ok(self.tick)
    }

    /// Return the current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Return the time of the latest tick.
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Simulated step length in seconds.
    pub fn dt_seconds(&self) -> f64 {
        self.tick_interval_ms as f64 / 1000.0
    }

    /// Simulated minutes elapsed since tick 0.
    pub fn elapsed_minutes(&self) -> f64 {
        self.tick as f64 * self.tick_interval_ms as f64 / 60_000.0
    }

    /// Change the step length without touching the tick counter.
    pub const fn set_tick_interval_ms(&mut self, tick_interval_ms: u64) {
        self.tick_interval_ms = tick_interval_ms;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn advance_increments_by_one() {
        let mut clock = SimClock::new(100);
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.advance(), Ok(1));
        assert_eq!(clock.advance(), Ok(2));
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn timestamp_never_goes_backwards() {
        let mut clock = SimClock::new(100);
        let later = clock.timestamp() + Duration::seconds(10);
        assert!(clock.advance_to(later).is_ok());
        let earlier = later - Duration::seconds(5);
        assert!(clock.advance_to(earlier).is_ok());
        assert_eq!(clock.timestamp(), later);
    }

    #[test]
    fn overflow_is_reported_and_state_kept() {
        let mut clock = SimClock {
            tick: u64::MAX,
            timestamp: Utc::now(),
            tick_interval_ms: 100,
        };
        assert_eq!(clock.advance(), Err(ClockError::TickOverflow));
        assert_eq!(clock.tick(), u64::MAX);
    }

    #[test]
    fn elapsed_minutes_uses_interval() {
        let mut clock = SimClock::new(100);
        for _ in 0..600 {
            assert!(clock.advance().is_ok());
        }
        assert!((clock.elapsed_minutes() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn interval_change_keeps_tick() {
        let mut clock = SimClock::new(100);
        assert!(clock.advance().is_ok());
        clock.set_tick_interval_ms(250);
        assert_eq!(clock.tick(), 1);
        assert!((clock.dt_seconds() - 0.25).abs() < 1e-12);
    }
}
