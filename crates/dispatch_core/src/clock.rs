use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::Resource;

use crate::request::Request;

/// A request the host wants submitted once the clock reaches `at`.
#[derive(Debug, Clone)]
pub struct ScheduledSubmission {
    pub at: u64,
    seq: u64,
    pub request: Request,
}

impl PartialEq for ScheduledSubmission {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for ScheduledSubmission {}

impl Ord for ScheduledSubmission {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by time, then insertion order.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledSubmission {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dispatch-side view of host time plus the queue of future request submissions.
#[derive(Debug, Default, Resource)]
pub struct DispatchClock {
    now: u64,
    start: Option<u64>,
    ticks: u64,
    next_seq: u64,
    submissions: BinaryHeap<ScheduledSubmission>,
}

impl DispatchClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Time of the first tick, once one has run.
    pub fn start(&self) -> Option<u64> {
        self.start
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn schedule_submission(&mut self, at: u64, request: Request) {
        debug_assert!(
            self.start.is_none() || at >= self.now,
            "submission time must be >= current time"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.submissions.push(ScheduledSubmission { at, seq, request });
    }

    /// Move the clock to `now` and hand back every submission due by then.
    pub fn begin_tick(&mut self, now: u64) -> Vec<Request> {
        assert!(
            self.start.is_none() || now > self.now,
            "tick time must increase: {} after {}",
            now,
            self.now
        );
        self.start.get_or_insert(now);
        self.now = now;
        self.ticks += 1;

        let mut due = Vec::new();
        while self.submissions.peek().is_some_and(|s| s.at <= now) {
            if let Some(submission) = self.submissions.pop() {
                due.push(submission.request);
            }
        }
        due
    }

    /// `now % period == 0`, and always on the first tick.
    pub fn is_period_tick(&self, period: u64) -> bool {
        period > 0 && (self.start == Some(self.now) || self.now % period == 0)
    }

    pub fn pending_submissions(&self) -> usize {
        self.submissions.len()
    }
}

/// Requests pushed by the host for submission at the start of the next tick.
#[derive(Debug, Default, Resource)]
pub struct InboundRequests(pub Vec<Request>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestId;
    use crate::spatial::Location;

    fn request(id: u64, at: u64) -> Request {
        Request::new(RequestId(id), Location::new(0.0, 0.0), Location::new(1.0, 1.0), at)
    }

    #[test]
    fn clock_releases_submissions_in_time_order() {
        let mut clock = DispatchClock::default();
        clock.schedule_submission(10, request(1, 10));
        clock.schedule_submission(5, request(2, 5));
        clock.schedule_submission(5, request(3, 5));
        clock.schedule_submission(20, request(4, 20));

        let due: Vec<_> = clock.begin_tick(7).into_iter().map(|r| r.id).collect();
        assert_eq!(due, vec![RequestId(2), RequestId(3)]);
        assert_eq!(clock.now(), 7);

        let due: Vec<_> = clock.begin_tick(20).into_iter().map(|r| r.id).collect();
        assert_eq!(due, vec![RequestId(1), RequestId(4)]);
        assert_eq!(clock.pending_submissions(), 0);
        assert_eq!(clock.ticks(), 2);
    }

    #[test]
    fn first_tick_always_fires_periodic_work() {
        let mut clock = DispatchClock::default();
        clock.begin_tick(7);
        assert!(clock.is_period_tick(10));
        clock.begin_tick(8);
        assert!(!clock.is_period_tick(10));
        clock.begin_tick(10);
        assert!(clock.is_period_tick(10));
        assert!(!clock.is_period_tick(0));
    }

    #[test]
    #[should_panic(expected = "tick time must increase")]
    fn clock_rejects_time_going_backwards() {
        let mut clock = DispatchClock::default();
        clock.begin_tick(10);
        clock.begin_tick(10);
    }
}
