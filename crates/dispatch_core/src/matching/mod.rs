//! Vehicle-request matching.
//!
//! A [`MatchingAlgorithm`] only proposes pairings. [`commit_matches`] re-checks
//! each proposal against the live fleet and register before assigning, so a
//! pairing made stale earlier in the tick is dropped instead of committed.

pub mod algorithm;
pub mod gate;
pub mod hungarian;
pub mod ilp;
pub mod nearest;
pub mod types;

use tracing::debug;

use crate::error::DispatchResult;
use crate::events::DomainEvents;
use crate::executor::Fleet;
use crate::register::RequestRegister;
use crate::request::RequestStatus;
use crate::routing::RoutingOracle;
use crate::scenario::{DispatchConfig, MatchingAlgorithmType};

pub use algorithm::MatchingAlgorithm;
pub use gate::WaitingTimeGate;
pub use hungarian::HungarianMatching;
pub use ilp::ExactMatching;
pub use nearest::NearestNeighborMatching;
pub use types::{AvailableVehicle, MatchCandidate, OpenRequest};

/// Instantiate the configured matching strategy.
pub fn build_matcher(
    kind: MatchingAlgorithmType,
    config: &DispatchConfig,
) -> Box<dyn MatchingAlgorithm> {
    match kind {
        MatchingAlgorithmType::BipartiteHeuristic => Box::new(HungarianMatching),
        MatchingAlgorithmType::BipartiteExact => Box::new(ExactMatching::new(
            config.distance_weight,
            config.wait_weight,
        )),
        MatchingAlgorithmType::NearestNeighbor => Box::new(NearestNeighborMatching),
    }
}

/// Divertable, unassigned vehicles seen from their divertable point, in id order.
pub fn available_vehicles(fleet: &Fleet, now: u64) -> Vec<AvailableVehicle> {
    let now = now as f64;
    fleet
        .divertable_unassigned()
        .into_iter()
        .filter_map(|id| fleet.vehicle(id).ok())
        .map(|taxi| AvailableVehicle {
            id: taxi.id(),
            location: taxi.divertable_location(now),
            divertable_time: taxi.divertable_time(now),
        })
        .collect()
}

/// Unassigned requests, oldest first.
pub fn open_requests(register: &RequestRegister) -> Vec<OpenRequest> {
    register
        .unassigned_requests()
        .into_iter()
        .map(|r| OpenRequest {
            id: r.id,
            origin: r.origin,
            submission_time: r.submission_time,
        })
        .collect()
}

/// Whether `candidate` can still be committed against the current state.
pub fn is_still_valid(fleet: &Fleet, register: &RequestRegister, candidate: &MatchCandidate) -> bool {
    let Ok(taxi) = fleet.vehicle(candidate.vehicle) else {
        return false;
    };
    !fleet.is_dirty(candidate.vehicle)
        && taxi.status().is_unassigned()
        && !taxi.has_passenger()
        && register.assignment_of(candidate.vehicle).is_none()
        && register.status(candidate.request) == Some(RequestStatus::Requested)
}

/// Assign every still-valid candidate; returns how many were committed.
pub fn commit_matches(
    fleet: &mut Fleet,
    register: &mut RequestRegister,
    oracle: &dyn RoutingOracle,
    events: &mut DomainEvents,
    candidates: &[MatchCandidate],
    now: u64,
) -> DispatchResult<usize> {
    let mut committed = 0;
    for candidate in candidates {
        if !is_still_valid(fleet, register, candidate) {
            debug!(
                vehicle = %candidate.vehicle,
                request = %candidate.request,
                now,
                "dropping stale match"
            );
            continue;
        }
        register.assign(fleet, oracle, events, candidate.vehicle, candidate.request, now)?;
        committed += 1;
    }
    Ok(committed)
}

/// Run `matcher` over the current pools and commit the result.
pub fn match_and_commit(
    matcher: &dyn MatchingAlgorithm,
    gate: &WaitingTimeGate,
    fleet: &mut Fleet,
    register: &mut RequestRegister,
    oracle: &dyn RoutingOracle,
    events: &mut DomainEvents,
    now: u64,
) -> DispatchResult<usize> {
    let vehicles = available_vehicles(fleet, now);
    let requests = open_requests(register);
    if vehicles.is_empty() || requests.is_empty() {
        return Ok(0);
    }
    let candidates = matcher.find_matches(&vehicles, &requests, gate);
    debug!(
        algorithm = matcher.name(),
        vehicles = vehicles.len(),
        requests = requests.len(),
        proposed = candidates.len(),
        now,
        "matching round"
    );
    commit_matches(fleet, register, oracle, events, &candidates, now)
}
