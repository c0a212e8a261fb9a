use super::gate::WaitingTimeGate;
use super::types::{AvailableVehicle, MatchCandidate, OpenRequest};

/// Trait for matching strategies that pair available vehicles with unassigned requests.
///
/// Implementations return only pairings that pass `gate`; a vehicle or request
/// appears in at most one returned candidate. Pairings are committed later,
/// after availability has been re-checked.
pub trait MatchingAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pair `vehicles` with `requests`. Both slices are in deterministic input
    /// order (vehicles by id, requests by submission time then id).
    fn find_matches(
        &self,
        vehicles: &[AvailableVehicle],
        requests: &[OpenRequest],
        gate: &WaitingTimeGate,
    ) -> Vec<MatchCandidate>;
}
