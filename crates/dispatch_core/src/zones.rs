//! Taxi ranks and dispatching zones used by the rank/zone reference policy.

use std::fmt;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::grid::Grid;
use crate::spatial::{BoundingBox, Location};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RankId(pub usize);

impl fmt::Display for RankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneId(pub usize);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxiRank {
    pub id: RankId,
    pub location: Location,
    pub capacity: u32,
    /// Relative weight when a free rank is drawn at random.
    pub popularity: f64,
}

impl TaxiRank {
    pub fn new(id: RankId, location: Location, capacity: u32) -> Self {
        Self {
            id,
            location,
            capacity,
            popularity: 0.5,
        }
    }

    pub fn with_popularity(mut self, popularity: f64) -> Self {
        self.popularity = popularity;
        self
    }
}

/// All ranks plus the number of taxis currently waiting at each.
#[derive(Debug, Clone, Default)]
pub struct TaxiRanks {
    ranks: Vec<TaxiRank>,
    occupancy: Vec<u32>,
}

impl TaxiRanks {
    /// Rank ids must be dense: `ranks[i].id == RankId(i)`.
    pub fn new(ranks: Vec<TaxiRank>) -> DispatchResult<Self> {
        for (index, rank) in ranks.iter().enumerate() {
            if rank.id != RankId(index) {
                return Err(DispatchError::Tables(format!(
                    "rank at position {index} has id {}",
                    rank.id
                )));
            }
            if !(rank.popularity.is_finite() && rank.popularity >= 0.0) {
                return Err(DispatchError::Tables(format!(
                    "{} has invalid popularity {}",
                    rank.id, rank.popularity
                )));
            }
        }
        let occupancy = vec![0; ranks.len()];
        Ok(Self { ranks, occupancy })
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaxiRank> {
        self.ranks.iter()
    }

    pub fn get(&self, id: RankId) -> Option<&TaxiRank> {
        self.ranks.get(id.0)
    }

    pub fn occupancy(&self, id: RankId) -> u32 {
        self.occupancy.get(id.0).copied().unwrap_or(0)
    }

    pub fn has_space(&self, id: RankId) -> bool {
        self.get(id)
            .is_some_and(|rank| self.occupancy(id) < rank.capacity)
    }

    pub fn reset_occupancy(&mut self) {
        self.occupancy.iter_mut().for_each(|count| *count = 0);
    }

    /// Count a taxi at the rank. Returns `false` when the rank is full.
    pub fn occupy(&mut self, id: RankId) -> bool {
        if !self.has_space(id) {
            return false;
        }
        self.occupancy[id.0] += 1;
        true
    }

    /// Rank located at `location`, if any.
    pub fn rank_at(&self, location: &Location) -> Option<RankId> {
        self.ranks
            .iter()
            .find(|rank| rank.location.is_same_place(location))
            .map(|rank| rank.id)
    }

    /// Closest rank among `candidates` with a free slot.
    pub fn nearest_free(&self, from: &Location, candidates: &[RankId]) -> Option<RankId> {
        candidates
            .iter()
            .copied()
            .filter(|id| self.has_space(*id))
            .filter_map(|id| self.get(id).map(|rank| (id, rank.location.distance_to(from))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Free rank among `candidates`, drawn proportionally to popularity.
    pub fn random_free<R: Rng + ?Sized>(&self, candidates: &[RankId], rng: &mut R) -> Option<RankId> {
        let free: Vec<&TaxiRank> = candidates
            .iter()
            .filter(|id| self.has_space(**id))
            .filter_map(|id| self.get(*id))
            .collect();
        if free.is_empty() {
            return None;
        }
        match WeightedIndex::new(free.iter().map(|rank| rank.popularity)) {
            Ok(weights) => Some(free[weights.sample(rng)].id),
            // All popularities zero: fall back to a uniform draw.
            Err(_) => Some(free[rng.gen_range(0..free.len())].id),
        }
    }

    /// Ranks inside `bounds`, ordered by id.
    pub fn within(&self, bounds: &BoundingBox) -> Vec<RankId> {
        self.ranks
            .iter()
            .filter(|rank| bounds.contains(&rank.location))
            .map(|rank| rank.id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchingZone {
    pub id: ZoneId,
    pub bounds: BoundingBox,
    pub adjacent: Vec<ZoneId>,
}

impl DispatchingZone {
    pub fn contains(&self, location: &Location) -> bool {
        self.bounds.contains(location)
    }

    /// Euclidean distance from `location` to the zone rectangle; zero inside.
    pub fn distance_to(&self, location: &Location) -> f64 {
        let b = &self.bounds;
        let dx = (b.min_x - location.x).max(location.x - b.max_x).max(0.0);
        let dy = (b.min_y - location.y).max(location.y - b.max_y).max(0.0);
        dx.hypot(dy)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchingZones {
    zones: Vec<DispatchingZone>,
}

impl DispatchingZones {
    /// Zone ids must be dense and adjacency must reference existing zones.
    pub fn new(zones: Vec<DispatchingZone>) -> DispatchResult<Self> {
        for (index, zone) in zones.iter().enumerate() {
            if zone.id != ZoneId(index) {
                return Err(DispatchError::Tables(format!(
                    "zone at position {index} has id {}",
                    zone.id
                )));
            }
            if let Some(missing) = zone.adjacent.iter().find(|z| z.0 >= zones.len()) {
                return Err(DispatchError::Tables(format!(
                    "{} lists unknown neighbour {missing}",
                    zone.id
                )));
            }
        }
        Ok(Self { zones })
    }

    /// One zone per grid cell, adjacent to its 4-neighbours.
    pub fn from_grid(grid: &Grid) -> Self {
        let zones = grid
            .cells()
            .iter()
            .map(|cell| DispatchingZone {
                id: ZoneId(cell.index),
                bounds: cell.bounds,
                adjacent: grid.neighbours(cell.index).into_iter().map(ZoneId).collect(),
            })
            .collect();
        Self { zones }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DispatchingZone> {
        self.zones.iter()
    }

    pub fn get(&self, id: ZoneId) -> Option<&DispatchingZone> {
        self.zones.get(id.0)
    }

    /// First zone containing `location`.
    pub fn containing(&self, location: &Location) -> Option<ZoneId> {
        self.zones
            .iter()
            .find(|zone| zone.contains(location))
            .map(|zone| zone.id)
    }

    /// Containing zone, or the closest one when `location` lies outside all zones.
    pub fn nearest(&self, location: &Location) -> Option<ZoneId> {
        self.containing(location).or_else(|| {
            self.zones
                .iter()
                .map(|zone| (zone.id, zone.distance_to(location)))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(id, _)| id)
        })
    }

    pub fn adjacent(&self, id: ZoneId) -> &[ZoneId] {
        self.get(id).map_or(&[], |zone| zone.adjacent.as_slice())
    }
}
