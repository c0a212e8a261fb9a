//! Per-vehicle task queue.
//!
//! The queue is append/truncate only. The task at the front is the one being
//! executed; everything behind it is lookahead, capped at [`MAX_LOOKAHEAD`].
//! Violating the ordering or the cap is a dispatch bug and panics.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::request::RequestId;
use crate::routing::{Path, PathSegment};
use crate::spatial::Location;

/// Tasks allowed beyond the one currently executing.
pub const MAX_LOOKAHEAD: usize = 2;

/// Why a vehicle is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrivePurpose {
    ToCustomer(RequestId),
    WithCustomer(RequestId),
    Rebalance,
    /// Empty move that is neither a pickup nor a rebalance (sign-on/off, halts).
    Reposition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskKind {
    Drive { path: Path, purpose: DrivePurpose },
    Stay { location: Location },
    Pickup { location: Location, request: RequestId },
    Dropoff { location: Location, request: RequestId },
    OffServiceStay { location: Location },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub begin: f64,
    pub end: f64,
}

impl Task {
    /// Open-ended stay; `until` is usually `f64::INFINITY`.
    pub fn stay(location: Location, begin: f64, until: f64) -> Self {
        Self {
            kind: TaskKind::Stay { location },
            begin,
            end: until.max(begin),
        }
    }

    pub fn off_service(location: Location, begin: f64, until: f64) -> Self {
        Self {
            kind: TaskKind::OffServiceStay { location },
            begin,
            end: until.max(begin),
        }
    }

    pub fn drive(path: Path, purpose: DrivePurpose) -> Self {
        Self {
            begin: path.departure,
            end: path.arrival,
            kind: TaskKind::Drive { path, purpose },
        }
    }

    pub fn pickup(location: Location, request: RequestId, begin: f64, duration: f64) -> Self {
        Self {
            kind: TaskKind::Pickup { location, request },
            begin,
            end: begin + duration.max(0.0),
        }
    }

    pub fn dropoff(location: Location, request: RequestId, begin: f64, duration: f64) -> Self {
        Self {
            kind: TaskKind::Dropoff { location, request },
            begin,
            end: begin + duration.max(0.0),
        }
    }

    /// Where the vehicle is when the task starts.
    pub fn start_location(&self) -> Location {
        match &self.kind {
            TaskKind::Drive { path, .. } => path.origin,
            TaskKind::Stay { location }
            | TaskKind::OffServiceStay { location }
            | TaskKind::Pickup { location, .. }
            | TaskKind::Dropoff { location, .. } => *location,
        }
    }

    /// Where the vehicle is when the task ends.
    pub fn end_location(&self) -> Location {
        match &self.kind {
            TaskKind::Drive { path, .. } => path.destination(),
            _ => self.start_location(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.kind,
            TaskKind::Stay { .. } | TaskKind::OffServiceStay { .. }
        )
    }

    pub fn drive_purpose(&self) -> Option<DrivePurpose> {
        match &self.kind {
            TaskKind::Drive { purpose, .. } => Some(*purpose),
            _ => None,
        }
    }

    /// Earliest point from which the vehicle can start something new, seen at `now`.
    /// Stays can be left immediately, drives at the end of the current segment,
    /// pickups and dropoffs only once finished.
    pub fn divertable_point(&self, now: f64) -> (Location, f64) {
        let now = now.max(self.begin);
        match &self.kind {
            TaskKind::Drive { path, .. } => path.divertable_point(now),
            TaskKind::Stay { location } | TaskKind::OffServiceStay { location } => {
                (*location, now.min(self.end))
            }
            TaskKind::Pickup { location, .. } | TaskKind::Dropoff { location, .. } => {
                (*location, self.end)
            }
        }
    }

    pub fn position_at(&self, time: f64) -> Location {
        match &self.kind {
            TaskKind::Drive { path, .. } => path.position_at(time),
            _ => self.start_location(),
        }
    }

    /// Cut the task short at `time`. Drives keep only the segments driven by then.
    fn shorten_to(&mut self, time: f64) {
        let time = time.clamp(self.begin, self.end);
        if let TaskKind::Drive { path, .. } = &mut self.kind {
            let mut clock = path.departure;
            let mut kept: Vec<PathSegment> = Vec::new();
            for segment in &path.segments {
                if clock + segment.travel_time > time {
                    break;
                }
                clock += segment.travel_time;
                kept.push(*segment);
            }
            let mut from = path.origin;
            let mut distance = 0.0;
            for segment in &kept {
                distance += from.distance_to(&segment.to);
                from = segment.to;
            }
            path.segments = kept;
            path.arrival = clock;
            path.distance_m = distance;
            self.end = clock;
        } else {
            self.end = time;
        }
    }
}

/// Ordered tasks of one vehicle. The front task is executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new(initial: Task) -> Self {
        Self {
            tasks: VecDeque::from([initial]),
        }
    }

    pub fn current(&self) -> &Task {
        &self.tasks[0]
    }

    pub fn upcoming(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().skip(1)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn last(&self) -> &Task {
        // The queue is never empty: advance keeps the final task.
        &self.tasks[self.tasks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn lookahead(&self) -> usize {
        self.tasks.len() - 1
    }

    /// End time of the whole schedule.
    pub fn end_time(&self) -> f64 {
        self.last().end
    }

    /// Stays that already ended are skipped: they only linger until the next advance.
    fn active_index(&self, now: f64) -> usize {
        let mut index = 0;
        while index + 1 < self.tasks.len()
            && self.tasks[index].is_open()
            && self.tasks[index].end <= now
        {
            index += 1;
        }
        index
    }

    /// Earliest location and time from which the schedule may be changed.
    pub fn divertable_point(&self, now: f64) -> (Location, f64) {
        self.tasks[self.active_index(now)].divertable_point(now)
    }

    /// Drop all lookahead and end the current task at the divertable time seen
    /// from `now`. Returns the location and time the vehicle is free from.
    pub fn truncate_at(&mut self, now: f64) -> (Location, f64) {
        let skipped = self.active_index(now);
        self.tasks.drain(..skipped);
        self.tasks.truncate(1);
        let (_, time) = self.tasks[0].divertable_point(now);
        self.tasks[0].shorten_to(time);
        (self.tasks[0].end_location(), self.tasks[0].end)
    }

    pub fn append(&mut self, task: Task) {
        let last_end = self.end_time();
        assert!(
            task.begin + 1e-9 >= last_end,
            "task begins at {} before the schedule ends at {}",
            task.begin,
            last_end
        );
        assert!(
            task.end >= task.begin,
            "task ends at {} before it begins at {}",
            task.end,
            task.begin
        );
        assert!(
            self.lookahead() < MAX_LOOKAHEAD,
            "task queue lookahead would exceed {MAX_LOOKAHEAD}"
        );
        self.tasks.push_back(task);
    }

    /// Pop every task that finished by `now`, keeping at least one.
    pub fn advance(&mut self, now: f64) -> Vec<Task> {
        let mut finished = Vec::new();
        while self.tasks.len() > 1 && self.tasks[0].end <= now {
            if let Some(task) = self.tasks.pop_front() {
                finished.push(task);
            }
        }
        finished
    }

    /// Panics unless end times are non-decreasing and the lookahead bound holds.
    pub fn assert_well_formed(&self) {
        assert!(
            self.lookahead() <= MAX_LOOKAHEAD,
            "task queue lookahead {} exceeds {MAX_LOOKAHEAD}",
            self.lookahead()
        );
        for pair in self.tasks.iter().collect::<Vec<_>>().windows(2) {
            assert!(
                pair[0].end <= pair[1].end,
                "task end times decrease: {} then {}",
                pair[0].end,
                pair[1].end
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{PathCalculator, StraightLineCalculator};

    fn calc() -> StraightLineCalculator {
        StraightLineCalculator {
            speed_mps: 10.0,
            max_segment_m: 100.0,
        }
    }

    #[test]
    fn truncating_a_stay_ends_it_now() {
        let mut queue = TaskQueue::new(Task::stay(Location::new(0.0, 0.0), 0.0, f64::INFINITY));
        let (location, time) = queue.truncate_at(42.0);
        assert_eq!(location, Location::new(0.0, 0.0));
        assert_eq!(time, 42.0);
        assert_eq!(queue.current().end, 42.0);
    }

    #[test]
    fn truncating_a_drive_stops_at_segment_end() {
        let path = calc().calc_path(Location::new(0.0, 0.0), Location::new(1000.0, 0.0), 0.0);
        let mut queue = TaskQueue::new(Task::drive(path, DrivePurpose::Rebalance));
        let (location, time) = queue.truncate_at(15.0);
        assert_eq!(location, Location::new(200.0, 0.0));
        assert_eq!(time, 20.0);
        assert_eq!(queue.current().end, 20.0);
        assert_eq!(queue.current().end_location(), Location::new(200.0, 0.0));
    }

    #[test]
    fn advance_keeps_the_final_task() {
        let mut queue = TaskQueue::new(Task::stay(Location::new(0.0, 0.0), 0.0, 10.0));
        queue.append(Task::stay(Location::new(0.0, 0.0), 10.0, f64::INFINITY));
        let finished = queue.advance(100.0);
        assert_eq!(finished.len(), 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.current().end.is_infinite());
    }

    #[test]
    #[should_panic(expected = "lookahead")]
    fn lookahead_is_bounded() {
        let at = Location::new(0.0, 0.0);
        let mut queue = TaskQueue::new(Task::stay(at, 0.0, 1.0));
        queue.append(Task::pickup(at, RequestId(1), 1.0, 1.0));
        queue.append(Task::dropoff(at, RequestId(1), 2.0, 1.0));
        queue.append(Task::stay(at, 3.0, f64::INFINITY));
    }

    #[test]
    #[should_panic(expected = "before the schedule ends")]
    fn appending_into_the_past_panics() {
        let at = Location::new(0.0, 0.0);
        let mut queue = TaskQueue::new(Task::stay(at, 0.0, 10.0));
        queue.append(Task::pickup(at, RequestId(1), 5.0, 1.0));
    }
}
