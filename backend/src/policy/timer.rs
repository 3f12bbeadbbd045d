//! Deadline queue for the engine's periodic work.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// What a timer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// One step of the fade on this sink-input
    Fade(u32),
    /// Next burst-shot refill
    BurstShot,
    /// One-shot sample playback on this sink-input ended
    SampleEnd(u32),
}

/// Min-heap of `(deadline, kind)`. Equal deadlines fire in scheduling order.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, TimerKind)>>,
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, kind: TimerKind) {
        self.seq += 1;
        self.heap.push(Reverse((at, self.seq, kind)));
    }

    pub fn schedule_in(&mut self, now: Instant, after: Duration, kind: TimerKind) {
        self.schedule(now + after, kind);
    }

    /// Remove and return the earliest timer due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        match self.heap.peek() {
            Some(Reverse((at, _, _))) if *at <= now => self.heap.pop().map(|Reverse((_, _, k))| k),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Drop every pending timer of `kind`.
    pub fn cancel(&mut self, kind: TimerKind) {
        self.heap.retain(|Reverse((_, _, k))| *k != kind);
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.heap.iter().any(|Reverse((_, _, k))| *k == kind)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_in_deadline_order() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule_in(now, Duration::from_millis(30), TimerKind::BurstShot);
        timers.schedule_in(now, Duration::from_millis(10), TimerKind::Fade(3));
        timers.schedule_in(now, Duration::from_millis(10), TimerKind::Fade(1));

        assert_eq!(timers.pop_due(now), None);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));

        let later = now + Duration::from_millis(20);
        assert_eq!(timers.pop_due(later), Some(TimerKind::Fade(3)));
        assert_eq!(timers.pop_due(later), Some(TimerKind::Fade(1)));
        assert_eq!(timers.pop_due(later), None);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(now, TimerKind::SampleEnd(2));
        timers.schedule(now, TimerKind::BurstShot);
        timers.cancel(TimerKind::SampleEnd(2));
        assert!(!timers.is_scheduled(TimerKind::SampleEnd(2)));
        assert_eq!(timers.pop_due(now), Some(TimerKind::BurstShot));
        assert!(timers.is_empty());
    }
}
