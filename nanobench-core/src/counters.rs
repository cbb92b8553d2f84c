//! Run-wide counters shared by every session and the reporting loop.
//!
//! One instance is created per run and handed out as `Arc<Counters>`. Every
//! update is a single atomic operation.
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one run
#[derive(Debug)]
pub struct Counters {
    connected: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
    /// sends still allowed
    send_budget: AtomicU64,
}

impl Counters {
    /// Create counters with an optional send limit. `None` never runs out.
    pub fn new(send_limit: Option<u64>) -> Self {
        Self {
            connected: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            send_budget: AtomicU64::new(send_limit.unwrap_or(u64::MAX)),
        }
    }

    /// Record an established connection, returning the new total
    #[inline]
    pub fn inc_connected(&self) -> u64 {
        self.connected.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a received message, returning the new total
    #[inline]
    pub fn inc_received(&self) -> u64 {
        self.received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Take one unit of send budget and count the send.
    ///
    /// Returns the new sent total, or `None` once the budget is exhausted. The
    /// budget is decremented before the send is counted, so `sent` never
    /// exceeds the limit.
    pub fn try_acquire_send(&self) -> Option<u64> {
        self.send_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| {
                left.checked_sub(1)
            })
            .ok()?;
        Some(self.sent.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// connections established so far
    #[inline]
    pub fn connected(&self) -> u64 {
        self.connected.load(Ordering::Relaxed)
    }

    /// messages handed to the transport so far
    #[inline]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// messages received so far
    #[inline]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// sends still allowed
    #[inline]
    pub fn send_budget(&self) -> u64 {
        self.send_budget.load(Ordering::Acquire)
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new(None)
    }
}
