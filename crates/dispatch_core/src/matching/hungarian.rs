//! Hungarian (Kuhn-Munkres) assignment on pickup distance.
//!
//! Solves the global minimum-distance assignment between all available
//! vehicles and all unassigned requests, then drops pairings that fail the
//! waiting-time gate. Those stay open for a later tick.

use pathfinding::kuhn_munkres::{kuhn_munkres, Weights};

use super::algorithm::MatchingAlgorithm;
use super::gate::WaitingTimeGate;
use super::types::{AvailableVehicle, MatchCandidate, OpenRequest};

/// Scale factor to convert metre distances to i64 weights (millimetre resolution).
const SCALE: f64 = 1_000.0;

/// Simple matrix type implementing pathfinding's Weights for i64.
struct I64Weights(Vec<Vec<i64>>);

impl Weights<i64> for I64Weights {
    fn rows(&self) -> usize {
        self.0.len()
    }

    fn columns(&self) -> usize {
        self.0.first().map_or(0, |r| r.len())
    }

    fn at(&self, row: usize, col: usize) -> i64 {
        self.0[row][col]
    }

    fn neg(&self) -> Self {
        I64Weights(
            self.0
                .iter()
                .map(|r| r.iter().map(|&x| x.saturating_neg()).collect())
                .collect(),
        )
    }
}

/// Distance in metres to a maximisation weight.
fn distance_to_weight(distance: f64) -> i64 {
    let w = -(distance * SCALE).round();
    if w <= i64::MIN as f64 / 4.0 {
        i64::MIN / 4
    } else {
        w as i64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HungarianMatching;

impl MatchingAlgorithm for HungarianMatching {
    fn name(&self) -> &'static str {
        "bipartite_heuristic"
    }

    fn find_matches(
        &self,
        vehicles: &[AvailableVehicle],
        requests: &[OpenRequest],
        gate: &WaitingTimeGate,
    ) -> Vec<MatchCandidate> {
        if vehicles.is_empty() || requests.is_empty() {
            return Vec::new();
        }

        // Kuhn-Munkres requires rows <= columns, so the smaller side becomes the rows.
        let requests_are_rows = requests.len() <= vehicles.len();
        let matrix: Vec<Vec<i64>> = if requests_are_rows {
            requests
                .iter()
                .map(|r| {
                    vehicles
                        .iter()
                        .map(|v| distance_to_weight(v.location.distance_to(&r.origin)))
                        .collect()
                })
                .collect()
        } else {
            vehicles
                .iter()
                .map(|v| {
                    requests
                        .iter()
                        .map(|r| distance_to_weight(v.location.distance_to(&r.origin)))
                        .collect()
                })
                .collect()
        };

        let (_total, assignments) = kuhn_munkres(&I64Weights(matrix));

        assignments
            .iter()
            .enumerate()
            .filter_map(|(row, &col)| {
                let (vehicle, request) = if requests_are_rows {
                    (&vehicles[col], &requests[row])
                } else {
                    (&vehicles[row], &requests[col])
                };
                gate.evaluate(vehicle, request)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestId;
    use crate::spatial::Location;
    use crate::vehicle::VehicleId;

    fn vehicle(id: usize, x: f64) -> AvailableVehicle {
        AvailableVehicle {
            id: VehicleId(id),
            location: Location::new(x, 0.0),
            divertable_time: 0.0,
        }
    }

    fn request(id: u64, x: f64) -> OpenRequest {
        OpenRequest {
            id: RequestId(id),
            origin: Location::new(x, 0.0),
            submission_time: 0,
        }
    }

    #[test]
    fn global_assignment_beats_greedy() {
        // Greedy on request 1 would take vehicle 0 and leave request 2 far away.
        let vehicles = [vehicle(0, 0.0), vehicle(1, 100.0)];
        let requests = [request(1, 60.0), request(2, -40.0)];
        let gate = WaitingTimeGate::new(10.0, 600);
        let mut matches = HungarianMatching.find_matches(&vehicles, &requests, &gate);
        matches.sort_by_key(|m| m.request);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].vehicle, VehicleId(1));
        assert_eq!(matches[1].vehicle, VehicleId(0));
    }

    #[test]
    fn more_requests_than_vehicles_assigns_each_vehicle_once() {
        let vehicles = [vehicle(0, 0.0)];
        let requests = [request(1, 500.0), request(2, 10.0), request(3, 900.0)];
        let gate = WaitingTimeGate::new(10.0, 600);
        let matches = HungarianMatching.find_matches(&vehicles, &requests, &gate);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].request, RequestId(2));
    }

    #[test]
    fn gated_pairs_are_dropped() {
        let vehicles = [vehicle(0, 0.0)];
        let requests = [request(1, 10_000.0)];
        let gate = WaitingTimeGate::new(10.0, 600);
        assert!(HungarianMatching
            .find_matches(&vehicles, &requests, &gate)
            .is_empty());
    }
}
