//! Byte accounting for one transfer attempt.

/// Processed/total counters plus the prefetch gate.
///
/// Counters only move forward within an attempt; [`restart`](Self::restart)
/// begins a new one after a redirect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounter {
    processed: u64,
    total: u64,
    auto_redirect_pending: bool,
}

impl ProgressCounter {
    /// `prefetch` marks the counter as waiting for the final URL.
    pub fn new(prefetch: bool) -> Self {
        Self {
            processed: 0,
            total: 0,
            auto_redirect_pending: prefetch,
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn auto_redirect_pending(&self) -> bool {
        self.auto_redirect_pending
    }

    /// The final URL is known; progress may be reported from now on.
    pub fn confirm_url(&mut self) {
        self.auto_redirect_pending = false;
    }

    /// Whether progress should be surfaced to the collaborator.
    pub fn reporting(&self) -> bool {
        !self.auto_redirect_pending
    }

    /// Sets the expected size; `None` leaves it unknown (0).
    pub fn set_total(&mut self, total: Option<u64>) {
        if let Some(total) = total {
            self.total = self.total.max(total);
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.processed = self.processed.saturating_add(bytes);
    }

    /// Called on success: an unknown total becomes the byte count.
    /// Returns whether the total changed.
    pub fn complete(&mut self) -> bool {
        let total = self.total.max(self.processed);
        let changed = total != self.total;
        self.total = total;
        changed
    }

    /// Starts a new attempt.
    pub fn restart(&mut self) {
        self.processed = 0;
        self.total = 0;
    }
}
