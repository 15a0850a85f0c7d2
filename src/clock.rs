//! Clock capability.
//!
//! Sealing and opening need the current time for timestamps, expiry, and
//! window selection. Injecting it keeps both operations deterministic
//! under test.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current unix time, in whole seconds.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
