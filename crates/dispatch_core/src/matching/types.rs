use crate::request::RequestId;
use crate::spatial::Location;
use crate::vehicle::VehicleId;

/// A vehicle offered to the matcher, seen from its divertable point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AvailableVehicle {
    pub id: VehicleId,
    pub location: Location,
    pub divertable_time: f64,
}

/// An unassigned request offered to the matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenRequest {
    pub id: RequestId,
    pub origin: Location,
    pub submission_time: u64,
}

/// A vehicle-request pairing that passed the waiting-time gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCandidate {
    pub vehicle: VehicleId,
    pub request: RequestId,
    /// Beeline pickup distance in metres.
    pub distance: f64,
    /// Estimated arrival at the origin (simulation seconds).
    pub eta: f64,
}
