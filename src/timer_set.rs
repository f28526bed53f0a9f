use std::cmp::Reverse;
use std::collections::BinaryHeap;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use crate::seq_no::SeqNo;

/// Retransmission deadlines, one per in-flight sequence number.
///
/// Deadlines live in a min-heap. Cancelling or restarting a timer does not touch the heap:
///  heap entries are matched against the map of live timers (by their start order) when they
///  surface, and stale entries are discarded at that point.
#[derive(Debug, Default)]
pub struct TimerSet {
    heap: BinaryHeap<Reverse<(Instant, u64, SeqNo)>>,
    live: FxHashMap<SeqNo, (Instant, u64)>,
    start_counter: u64,
}

impl TimerSet {
    pub fn new() -> TimerSet {
        Default::default()
    }

    /// Starts a timer for `seq`, replacing a pending deadline for the same sequence number.
    pub fn start(&mut self, seq: SeqNo, deadline: Instant) {
        self.start_counter += 1;
        self.live.insert(seq, (deadline, self.start_counter));
        self.heap.push(Reverse((deadline, self.start_counter, seq)));
    }

    /// Cancelling a timer that is not pending is a no-op
    pub fn cancel(&mut self, seq: SeqNo) {
        self.live.remove(&seq);
        if self.live.is_empty() {
            self.heap.clear();
        }
    }

    pub fn is_pending(&self, seq: SeqNo) -> bool {
        self.live.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Removes and returns all timers with a deadline at or before `now`, in the order in which
    ///  they were started.
    pub fn expired_before(&mut self, now: Instant) -> Vec<SeqNo> {
        let mut expired = Vec::new();

        while let Some(Reverse((deadline, order, seq))) = self.heap.peek().cloned() {
            if deadline > now {
                break;
            }
            self.heap.pop();

            if self.live.get(&seq) == Some(&(deadline, order)) {
                self.live.remove(&seq);
                expired.push((order, seq));
            }
        }

        expired.sort();
        expired.into_iter()
            .map(|(_, seq)| seq)
            .collect()
    }

    /// The earliest pending deadline. This drops stale heap entries it comes across, which is
    ///  why it requires `&mut self`.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, order, seq))) = self.heap.peek() {
            if self.live.get(seq) == Some(&(*deadline, *order)) {
                return Some(*deadline);
            }
            self.heap.pop();
        }
        None
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use rstest::rstest;
    use super::*;

    fn seq(n: u16) -> SeqNo {
        SeqNo::from_raw(n)
    }

    #[test]
    fn test_empty() {
        let mut timers = TimerSet::new();
        assert!(timers.is_empty());
        assert_eq!(timers.next_deadline(), None);
        assert!(timers.expired_before(Instant::now()).is_empty());
    }

    #[rstest]
    #[case::none_expired(5, vec![])]
    #[case::exactly_at_deadline(10, vec![1])]
    #[case::some_expired(25, vec![1, 3])]
    #[case::all_expired(100, vec![1, 3, 2])]
    fn test_expired_before(#[case] elapsed_millis: u64, #[case] expected: Vec<u16>) {
        let start = Instant::now();
        let mut timers = TimerSet::new();
        timers.start(seq(1), start + Duration::from_millis(10));
        timers.start(seq(3), start + Duration::from_millis(20));
        timers.start(seq(2), start + Duration::from_millis(30));

        let expired = timers.expired_before(start + Duration::from_millis(elapsed_millis));
        assert_eq!(expired, expected.into_iter().map(seq).collect::<Vec<_>>());
        assert_eq!(timers.len(), 3 - expired.len());
        for s in expired {
            assert!(!timers.is_pending(s));
        }
    }

    #[test]
    fn test_expired_ordered_by_start_for_equal_deadlines() {
        let deadline = Instant::now() + Duration::from_millis(10);
        let mut timers = TimerSet::new();
        timers.start(seq(5), deadline);
        timers.start(seq(0), deadline);
        timers.start(seq(3), deadline);

        assert_eq!(timers.expired_before(deadline), vec![seq(5), seq(0), seq(3)]);
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut timers = TimerSet::new();
        timers.start(seq(1), start + Duration::from_millis(10));
        timers.start(seq(2), start + Duration::from_millis(20));

        timers.cancel(seq(1));
        assert!(!timers.is_pending(seq(1)));
        assert!(timers.is_pending(seq(2)));
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(20)));

        timers.cancel(seq(7));
        assert_eq!(timers.len(), 1);

        assert_eq!(timers.expired_before(start + Duration::from_millis(50)), vec![seq(2)]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_restart_replaces_deadline() {
        let start = Instant::now();
        let mut timers = TimerSet::new();
        timers.start(seq(1), start + Duration::from_millis(10));
        timers.start(seq(1), start + Duration::from_millis(30));

        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(30)));
        assert!(timers.expired_before(start + Duration::from_millis(20)).is_empty());
        assert_eq!(timers.expired_before(start + Duration::from_millis(30)), vec![seq(1)]);
    }

    #[test]
    fn test_cancel_then_restart() {
        let start = Instant::now();
        let mut timers = TimerSet::new();
        timers.start(seq(1), start + Duration::from_millis(10));
        timers.start(seq(2), start + Duration::from_millis(15));
        timers.cancel(seq(1));
        timers.start(seq(1), start + Duration::from_millis(20));

        assert_eq!(timers.next_deadline(), Some(start + Duration::from_millis(15)));
        assert_eq!(timers.expired_before(start + Duration::from_millis(20)), vec![seq(2), seq(1)]);
    }
}
