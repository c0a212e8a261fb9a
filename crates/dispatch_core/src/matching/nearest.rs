//! Greedy nearest-neighbour matching over R-trees.
//!
//! The larger side is indexed; the smaller side is walked in input order and
//! each element claims its nearest partner. A claimed pair leaves the index
//! immediately. A nearest partner that fails the waiting-time gate is left in
//! place for the remaining walkers.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use super::algorithm::MatchingAlgorithm;
use super::gate::WaitingTimeGate;
use super::types::{AvailableVehicle, MatchCandidate, OpenRequest};
use crate::spatial::Location;

/// R-tree entry: a planar point plus the index into the caller's slice.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedPoint {
    point: [f64; 2],
    index: usize,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.point[0] - point[0];
        let dy = self.point[1] - point[1];
        dx * dx + dy * dy
    }
}

fn bulk_index(points: impl Iterator<Item = Location>) -> RTree<IndexedPoint> {
    RTree::bulk_load(
        points
            .enumerate()
            .map(|(index, location)| IndexedPoint {
                point: location.as_array(),
                index,
            })
            .collect(),
    )
}

/// Nearest entry to `point`; among exactly equal distances the lowest index wins.
fn nearest(tree: &RTree<IndexedPoint>, point: [f64; 2]) -> Option<IndexedPoint> {
    let mut iter = tree.nearest_neighbor_iter_with_distance_2(&point);
    let (first, best) = iter.next()?;
    let mut winner = *first;
    for (entry, d2) in iter {
        if d2 > best {
            break;
        }
        if entry.index < winner.index {
            winner = *entry;
        }
    }
    Some(winner)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NearestNeighborMatching;

impl MatchingAlgorithm for NearestNeighborMatching {
    fn name(&self) -> &'static str {
        "nearest_neighbor"
    }

    fn find_matches(
        &self,
        vehicles: &[AvailableVehicle],
        requests: &[OpenRequest],
        gate: &WaitingTimeGate,
    ) -> Vec<MatchCandidate> {
        let mut matches = Vec::new();
        if vehicles.is_empty() || requests.is_empty() {
            return matches;
        }

        if vehicles.len() >= requests.len() {
            let mut tree = bulk_index(vehicles.iter().map(|v| v.location));
            for request in requests {
                let Some(entry) = nearest(&tree, request.origin.as_array()) else {
                    break;
                };
                if let Some(candidate) = gate.evaluate(&vehicles[entry.index], request) {
                    tree.remove(&entry);
                    matches.push(candidate);
                }
            }
        } else {
            let mut tree = bulk_index(requests.iter().map(|r| r.origin));
            for vehicle in vehicles {
                let Some(entry) = nearest(&tree, vehicle.location.as_array()) else {
                    break;
                };
                if let Some(candidate) = gate.evaluate(vehicle, &requests[entry.index]) {
                    tree.remove(&entry);
                    matches.push(candidate);
                }
            }
        }
        matches
    }
}
