//! Outbound pacing for owner telemetry and entry requests.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};

use crate::protocol::EntryId;

/// Coalesces `REPORT_TIME` samples; only the latest pending value is sent.
pub struct TimeReporter {
    limiter: RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    pending: Option<f64>,
}

impl TimeReporter {
    pub fn new(window: Duration) -> Self {
        let quota = Quota::with_period(window.max(Duration::from_millis(1)))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(quota),
            pending: None,
        }
    }

    pub fn record(&mut self, time: f64) {
        self.pending = Some(time);
    }

    /// Returns the latest sample if the window allows sending now.
    pub fn take_ready(&mut self) -> Option<f64> {
        self.pending?;
        if self.limiter.check().is_ok() {
            self.pending.take()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

/// Batches missing-handle ids into one `REQUEST_SPECIFIC_ENTRIES`.
pub struct EntryRequestDebouncer {
    window: Duration,
    queued: Vec<EntryId>,
    first_queued_at: Option<Instant>,
    in_flight: Vec<EntryId>,
}

impl EntryRequestDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            queued: Vec::new(),
            first_queued_at: None,
            in_flight: Vec::new(),
        }
    }

    /// Queues `id` unless it is already queued or awaiting a reply.
    pub fn queue(&mut self, id: &str, now: Instant) {
        if self.queued.iter().any(|queued| queued == id)
            || self.in_flight.iter().any(|pending| pending == id)
        {
            return;
        }
        self.queued.push(id.to_string());
        self.first_queued_at.get_or_insert(now);
    }

    /// Drains the batch once the window since the first queued id has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<EntryId>> {
        let first = self.first_queued_at?;
        if now.saturating_duration_since(first) < self.window {
            return None;
        }
        self.first_queued_at = None;
        let batch = std::mem::take(&mut self.queued);
        self.in_flight.extend(batch.iter().cloned());
        Some(batch)
    }

    /// Marks ids as answered, resolved or missing.
    pub fn settle<'a>(&mut self, ids: impl IntoIterator<Item = &'a EntryId>) {
        for id in ids {
            self.in_flight.retain(|pending| pending != id);
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, id: &str) -> bool {
        self.queued.iter().any(|queued| queued == id)
            || self.in_flight.iter().any(|pending| pending == id)
    }

    pub fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
        self.first_queued_at = None;
    }
}
