//! Publish pacing against a logical clock.
//!
//! Timed sleeps may wake later than asked. Sleeping a fixed interval after
//! every send would then settle below the target rate, so each publisher keeps
//! a logical send mark that advances by exactly one interval per message. When
//! the wall clock has run a whole interval ahead of that mark the sleep is
//! skipped so the publisher catches up.
use std::time::Duration;

use tokio::time::Instant;

/// What a publisher should do before its next send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// no interval configured, send right away
    Disabled,
    /// suspend for the interval
    Sleep(Duration),
    /// behind by at least one interval, send right away
    CatchUp,
}

/// Result of [`next_delay`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// what to do now
    pub delay: Delay,
    /// the publisher's new logical send mark
    pub last_send: Instant,
}

/// Decide how long to wait before the next send.
///
/// `interval` below one millisecond disables pacing and leaves the mark
/// untouched. Otherwise the mark advances by `interval` whatever the actual
/// elapsed time was.
pub fn next_delay(now: Instant, last_send: Instant, interval: Duration) -> Pacing {
    if interval < Duration::from_millis(1) {
        return Pacing {
            delay: Delay::Disabled,
            last_send,
        };
    }

    // drift = now - last_send - interval, clamped at zero
    let drift = now
        .saturating_duration_since(last_send)
        .saturating_sub(interval);
    let delay = if drift < interval {
        Delay::Sleep(interval)
    } else {
        Delay::CatchUp
    };

    Pacing {
        delay,
        last_send: last_send + interval,
    }
}
