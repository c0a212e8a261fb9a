//! Passenger requests and their lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spatial::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Request lifecycle. Variants are declared in lifecycle order; `Cancelled`
/// sits outside that order and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Requested,
    Assigned,
    PickupDrive,
    Driving,
    Dropoff,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Dropoff | RequestStatus::Cancelled)
    }

    /// Still waiting for a vehicle to pick the passenger up.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RequestStatus::Requested | RequestStatus::Assigned | RequestStatus::PickupDrive
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Forward moves only, with two exceptions: a revoked assignment returns to
    /// `Requested`, and any non-terminal state may be cancelled.
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Cancelled) => true,
            (Requested, Assigned) => true,
            (Assigned, Assigned) | (PickupDrive, Assigned) => true,
            (Assigned, Requested) | (PickupDrive, Requested) => true,
            (Assigned, PickupDrive) => true,
            (Assigned, Driving) | (PickupDrive, Driving) => true,
            (Driving, Dropoff) => true,
            _ => false,
        }
    }
}

/// A pickup/dropoff request as submitted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub origin: Location,
    pub destination: Location,
    /// Submission time in simulation seconds.
    pub submission_time: u64,
    /// Seats needed; 1 unless the request is pooled.
    pub capacity: u32,
}

impl Request {
    pub fn new(id: RequestId, origin: Location, destination: Location, submission_time: u64) -> Self {
        Self {
            id,
            origin,
            destination,
            submission_time,
            capacity: 1,
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Seconds since submission.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.submission_time)
    }
}
