use crate::scenario::DispatchConfig;

use super::types::{AvailableVehicle, MatchCandidate, OpenRequest};

/// Admits a pairing only when the customer would be reached within 90% of the
/// maximum waiting time, counted from submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitingTimeGate {
    /// Speed used for the beeline ETA estimate (m/s).
    pub eta_speed_mps: f64,
    /// Longest admissible `eta - submission_time` in seconds.
    pub max_wait: f64,
}

impl WaitingTimeGate {
    pub fn new(eta_speed_mps: f64, max_customer_waiting_time: u64) -> Self {
        Self {
            eta_speed_mps,
            max_wait: 0.9 * max_customer_waiting_time as f64,
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.eta_speed_mps, config.max_customer_waiting_time)
    }

    /// Beeline distance and ETA of `vehicle` at the origin of `request`.
    pub fn estimate(&self, vehicle: &AvailableVehicle, request: &OpenRequest) -> (f64, f64) {
        let distance = vehicle.location.distance_to(&request.origin);
        (distance, vehicle.divertable_time + distance / self.eta_speed_mps)
    }

    pub fn admits(&self, eta: f64, submission_time: u64) -> bool {
        eta - submission_time as f64 <= self.max_wait
    }

    /// The candidate for this pairing, if it passes the gate.
    pub fn evaluate(&self, vehicle: &AvailableVehicle, request: &OpenRequest) -> Option<MatchCandidate> {
        let (distance, eta) = self.estimate(vehicle, request);
        self.admits(eta, request.submission_time).then_some(MatchCandidate {
            vehicle: vehicle.id,
            request: request.id,
            distance,
            eta,
        })
    }
}
