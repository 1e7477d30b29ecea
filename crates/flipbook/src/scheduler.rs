//! Swap deadline arithmetic.
//!
//! Deadlines are measured from the previous swap rather than from decode
//! completion, so decode latency never shows up as accumulated lag.

/// `last_swap_ms + max(delay_ms, 0)`.
pub fn compute_deadline(last_swap_ms: u64, delay_ms: i64) -> u64 {
    last_swap_ms.saturating_add(delay_ms.max(0).unsigned_abs())
}

/// Decides when a decoded frame may become visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapScheduler {
    last_swap_ms: u64,
    deadline_ms: Option<u64>,
}

impl SwapScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the deadline for a freshly decoded frame.
    pub fn arm(&mut self, delay_ms: i64) -> u64 {
        let deadline = compute_deadline(self.last_swap_ms, delay_ms);
        self.deadline_ms = Some(deadline);
        deadline
    }

    /// True once the armed deadline has been reached. A deadline long in the past
    /// still yields exactly one swap; no frames are skipped to catch up.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.deadline_ms.is_some_and(|d| now_ms >= d)
    }

    /// Record a swap at `now_ms` and disarm.
    pub fn swapped(&mut self, now_ms: u64) {
        self.last_swap_ms = now_ms;
        self.deadline_ms = None;
    }

    pub fn disarm(&mut self) {
        self.deadline_ms = None;
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline_ms
    }

    pub fn last_swap(&self) -> u64 {
        self.last_swap_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_adds_delay_to_last_swap() {
        assert_eq!(compute_deadline(1000, 100), 1100);
        assert_eq!(compute_deadline(0, 0), 0);
    }

    #[test]
    fn negative_delay_clamps_to_zero() {
        assert_eq!(compute_deadline(500, -40), 500);
    }

    #[test]
    fn overflow_saturates() {
        assert_eq!(compute_deadline(u64::MAX - 1, 10), u64::MAX);
    }

    #[test]
    fn due_only_after_arming() {
        let mut s = SwapScheduler::new();
        assert!(!s.is_due(10_000));
        s.swapped(1000);
        assert_eq!(s.arm(100), 1100);
        assert!(!s.is_due(1099));
        assert!(s.is_due(1100));
        assert!(s.is_due(5000));
    }

    #[test]
    fn swap_resets_reference_point() {
        let mut s = SwapScheduler::new();
        s.arm(50);
        s.swapped(70);
        assert_eq!(s.deadline(), None);
        assert_eq!(s.last_swap(), 70);
        assert_eq!(s.arm(50), 120);
    }
}
