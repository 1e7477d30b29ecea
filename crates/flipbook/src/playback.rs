use serde::{Deserialize, Serialize};

/// Where the engine is in its decode/swap cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Not advancing. The last swapped frame stays visible.
    Idle,
    /// A decode request is queued on the worker.
    Scheduled,
    /// The worker is writing the back buffer.
    Decoding,
    /// Decode finished; waiting for the swap deadline.
    WaitingToSwap,
    /// Deadline passed; the next render pass swaps.
    ReadyToSwap,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Scheduled => write!(f, "scheduled"),
            PlaybackState::Decoding => write!(f, "decoding"),
            PlaybackState::WaitingToSwap => write!(f, "waiting-to-swap"),
            PlaybackState::ReadyToSwap => write!(f, "ready-to-swap"),
        }
    }
}

/// How many full passes through the sequence to play before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPolicy {
    Once,
    Infinite,
    /// Use the loop count authored into the file (0 there means forever).
    #[default]
    UseSequenceDefault,
    /// Stop after this many loops.
    Finite(u32),
}

impl LoopPolicy {
    /// Loop limit under this policy, or `None` when playback never ends.
    pub fn limit(self, default_loop_count: u32) -> Option<u32> {
        match self {
            LoopPolicy::Once => Some(1),
            LoopPolicy::Infinite => None,
            LoopPolicy::UseSequenceDefault => {
                (default_loop_count > 0).then_some(default_loop_count)
            }
            LoopPolicy::Finite(n) => Some(n.max(1)),
        }
    }
}

/// Completed-loop bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopCounter {
    completed: u32,
}

impl LoopCounter {
    pub fn reset(&mut self) {
        self.completed = 0;
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Account for a swap after which `next_frame` is the next frame to show.
    ///
    /// A loop completes when the cursor wraps to frame 0. Returns `false` once the
    /// policy's limit is reached.
    pub fn advance(&mut self, next_frame: usize, policy: LoopPolicy, default_loop_count: u32) -> bool {
        if next_frame != 0 {
            return true;
        }
        self.completed = self.completed.saturating_add(1);
        match policy.limit(default_loop_count) {
            Some(limit) => self.completed < limit,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_limits() {
        assert_eq!(LoopPolicy::Once.limit(5), Some(1));
        assert_eq!(LoopPolicy::Infinite.limit(5), None);
        assert_eq!(LoopPolicy::UseSequenceDefault.limit(5), Some(5));
        assert_eq!(LoopPolicy::UseSequenceDefault.limit(0), None);
        assert_eq!(LoopPolicy::Finite(3).limit(0), Some(3));
        assert_eq!(LoopPolicy::Finite(0).limit(0), Some(1));
    }

    #[test]
    fn counter_only_counts_at_wraparound() {
        let mut c = LoopCounter::default();
        assert!(c.advance(1, LoopPolicy::Once, 0));
        assert!(c.advance(2, LoopPolicy::Once, 0));
        assert_eq!(c.completed(), 0);
        assert!(!c.advance(0, LoopPolicy::Once, 0));
        assert_eq!(c.completed(), 1);
    }

    #[test]
    fn infinite_never_stops() {
        let mut c = LoopCounter::default();
        for _ in 0..100 {
            assert!(c.advance(0, LoopPolicy::Infinite, 1));
        }
        assert_eq!(c.completed(), 100);
    }

    #[test]
    fn sequence_default_stops_after_authored_count() {
        let mut c = LoopCounter::default();
        assert!(c.advance(0, LoopPolicy::UseSequenceDefault, 2));
        assert!(!c.advance(0, LoopPolicy::UseSequenceDefault, 2));
        c.reset();
        assert_eq!(c.completed(), 0);
    }

    #[test]
    fn loop_policy_serde_roundtrip() {
        let json = serde_json::to_string(&LoopPolicy::Finite(4)).unwrap();
        let back: LoopPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LoopPolicy::Finite(4));
        let once: LoopPolicy = serde_json::from_str("\"once\"").unwrap();
        assert_eq!(once, LoopPolicy::Once);
    }

    #[test]
    fn state_display() {
        assert_eq!(PlaybackState::WaitingToSwap.to_string(), "waiting-to-swap");
    }
}
