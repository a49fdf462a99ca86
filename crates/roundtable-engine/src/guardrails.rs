//! Conversation-loop detection.

use std::collections::HashMap;

use roundtable_core::Message;

/// Consecutive exchanges between one pair of agents before the loop is cut.
pub const PING_PONG_LIMIT: u32 = 6;

/// Consecutive empty-queue turns before the session counts as converged.
pub const NO_PROGRESS_LIMIT: u32 = 2;

/// Tracks message volume per agent pair so runaway back-and-forth can be
/// stopped while slow, productive exchanges are left alone.
///
/// Counters halve (integer division) at the start of every turn and are
/// dropped once they hit zero, so only pairs that keep trading messages
/// faster than the decay ever reach [`PING_PONG_LIMIT`].
#[derive(Debug, Default)]
pub struct ExchangeTracker {
    exchanges: HashMap<String, u32>,
}

impl ExchangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Age all counters by one turn.
    pub fn decay(&mut self) {
        self.exchanges.retain(|_, count| {
            *count /= 2;
            *count > 0
        });
    }

    /// Count a batch of incoming messages against their sender/recipient
    /// pairs. Returns true as soon as any pair crosses [`PING_PONG_LIMIT`].
    pub fn record_batch(&mut self, batch: &[Message]) -> bool {
        for message in batch {
            let key = pair_key(&message.from, &message.to);
            let count = self.exchanges.entry(key).or_insert(0);
            *count += 1;
            if *count >= PING_PONG_LIMIT {
                return true;
            }
        }
        false
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }
}

/// Order-independent key, so a→b and b→a share a counter.
fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundtable_core::SessionId;

    fn msg(from: &str, to: &str) -> Message {
        Message::new(SessionId::from_raw("test-session"), from, to, "ping", 1)
    }

    #[test]
    fn pair_key_ignores_direction() {
        assert_eq!(pair_key("perf", "quality"), pair_key("quality", "perf"));
        assert_eq!(pair_key("a", "b"), "a:b");
        assert_eq!(pair_key("b", "a"), "a:b");
    }

    #[test]
    fn single_batch_below_limit_does_not_trip() {
        let mut tracker = ExchangeTracker::new();
        let batch = vec![msg("a", "b"), msg("a", "b")];
        assert!(!tracker.record_batch(&batch));
    }

    #[test]
    fn trips_once_a_pair_reaches_the_limit() {
        let mut tracker = ExchangeTracker::new();
        let batch: Vec<Message> = (0..PING_PONG_LIMIT).map(|_| msg("a", "b")).collect();
        assert!(tracker.record_batch(&batch));
    }

    #[test]
    fn decay_halves_and_drops_zeroed_pairs() {
        let mut tracker = ExchangeTracker::new();
        tracker.record_batch(&[msg("a", "b"), msg("a", "b"), msg("a", "b")]);
        tracker.record_batch(&[msg("c", "d")]);

        // a:b goes 3 -> 1, c:d goes 1 -> 0 and is dropped.
        tracker.decay();
        tracker.decay();
        // a:b is now gone too; a fresh batch starts from zero.
        let batch: Vec<Message> = (0..PING_PONG_LIMIT - 1).map(|_| msg("a", "b")).collect();
        assert!(!tracker.record_batch(&batch));
    }

    #[test]
    fn steady_single_exchange_never_trips() {
        // One message each way per turn reaches a fixpoint of 3 under decay,
        // comfortably below the limit.
        let mut tracker = ExchangeTracker::new();
        for _ in 0..10 {
            tracker.decay();
            assert!(!tracker.record_batch(&[msg("a", "b")]));
            assert!(!tracker.record_batch(&[msg("b", "a")]));
        }
    }

    #[test]
    fn heavy_mutual_exchange_trips_quickly() {
        // Two messages each way per turn outruns the decay on the second turn.
        let mut tracker = ExchangeTracker::new();

        tracker.decay();
        assert!(!tracker.record_batch(&[msg("b", "a"), msg("b", "a")]));
        assert!(!tracker.record_batch(&[msg("a", "b"), msg("a", "b")]));

        tracker.decay();
        assert!(!tracker.record_batch(&[msg("b", "a"), msg("b", "a")]));
        assert!(tracker.record_batch(&[msg("a", "b"), msg("a", "b")]));
    }

    #[test]
    fn clear_resets_all_counters() {
        let mut tracker = ExchangeTracker::new();
        tracker.record_batch(&[msg("a", "b"), msg("a", "b"), msg("a", "b")]);
        tracker.clear();

        let batch: Vec<Message> = (0..PING_PONG_LIMIT - 1).map(|_| msg("a", "b")).collect();
        assert!(!tracker.record_batch(&batch));
    }
}
