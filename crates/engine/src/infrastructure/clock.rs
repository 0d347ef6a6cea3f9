//! System clock behind a port, so handlers and the store stamp
//! deterministic times under test.

use chrono::{DateTime, Utc};

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Unix-millisecond stamp used on wire frames.
pub fn unix_ms(now: DateTime<Utc>) -> i64 {
    now.timestamp_millis()
}
