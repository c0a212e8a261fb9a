//! Rank and zone based reference policy, modelled on how a city taxi
//! dispatcher works: taxis queue at ranks, requests are offered to the origin
//! zone first, and a share of the idle fleet is held near the centre.

use std::collections::BTreeSet;

use rand::Rng;
use tracing::{debug, trace};

use super::{DispatchContext, DispatchPolicy};
use crate::error::{DispatchError, DispatchResult};
use crate::matching::{AvailableVehicle, OpenRequest};
use crate::request::Request;
use crate::scenario::ReferenceConfig;
use crate::spatial::Location;
use crate::vehicle::VehicleId;
use crate::zones::{DispatchingZones, RankId, TaxiRanks, ZoneId};

pub struct ReferencePolicy {
    ranks: TaxiRanks,
    zones: DispatchingZones,
    /// Ranks per zone, indexed by zone id.
    zone_ranks: Vec<Vec<RankId>>,
    centre: Location,
    radius: f64,
    threshold: f64,
    centre_ranks: Vec<RankId>,
    outside_ranks: Vec<RankId>,
    /// Staying taxis counted at a rank during the last refresh.
    at_rank: BTreeSet<VehicleId>,
}

impl ReferencePolicy {
    /// `fallback_centre` is used when the config names no centre.
    pub fn new(
        ranks: TaxiRanks,
        zones: DispatchingZones,
        config: &ReferenceConfig,
        fallback_centre: Option<Location>,
    ) -> DispatchResult<Self> {
        let centre = config.centre.or(fallback_centre).ok_or_else(|| {
            DispatchError::Config("reference policy needs a centre or a grid".into())
        })?;
        let zone_ranks = zones
            .iter()
            .map(|zone| ranks.within(&zone.bounds))
            .collect();
        let (centre_ranks, outside_ranks): (Vec<RankId>, Vec<RankId>) = ranks
            .iter()
            .map(|rank| rank.id)
            .partition(|id| {
                ranks
                    .get(*id)
                    .is_some_and(|rank| rank.location.distance_to(&centre) <= config.centre_radius)
            });
        Ok(Self {
            ranks,
            zones,
            zone_ranks,
            centre,
            radius: config.centre_radius,
            threshold: config.centre_threshold,
            centre_ranks,
            outside_ranks,
            at_rank: BTreeSet::new(),
        })
    }

    pub fn is_at_rank(&self, vehicle: VehicleId) -> bool {
        self.at_rank.contains(&vehicle)
    }

    pub fn rank_occupancy(&self, rank: RankId) -> u32 {
        self.ranks.occupancy(rank)
    }

    fn ranks_in(&self, zone: ZoneId) -> &[RankId] {
        self.zone_ranks.get(zone.0).map_or(&[], Vec::as_slice)
    }

    /// Recount taxis at ranks. Staying taxis are processed longest-waiting
    /// first; a taxi arriving at a full rank is sent to another one.
    fn refresh_ranks(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        self.ranks.reset_occupancy();
        self.at_rank.clear();
        for vehicle in ctx.staying_fifo() {
            let destination = ctx.fleet.vehicle(vehicle)?.drive_destination();
            let Some(rank) = self.ranks.rank_at(&destination) else {
                continue;
            };
            if self.ranks.occupy(rank) {
                self.at_rank.insert(vehicle);
            } else {
                trace!(%vehicle, %rank, "rank full");
                self.send_to_rank(ctx, vehicle)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------

    fn try_assign(
        &mut self,
        ctx: &mut DispatchContext<'_>,
        available: &mut Vec<VehicleId>,
        request: &Request,
    ) -> DispatchResult<bool> {
        if let Some(zone) = self.zones.containing(&request.origin) {
            if let Some(vehicle) = self.taxi_at_rank_in(ctx, available, zone, &request.origin)? {
                if self.assign(ctx, available, vehicle, request)? {
                    return Ok(true);
                }
            }
            if let Some(vehicle) = self.cruising_taxi_in(ctx, available, zone, &request.origin)? {
                if self.assign(ctx, available, vehicle, request)? {
                    return Ok(true);
                }
            }
            let adjacent = self.zones.adjacent(zone).to_vec();
            for neighbour in &adjacent {
                if let Some(vehicle) = self.taxi_at_rank_in(ctx, available, *neighbour, &request.origin)? {
                    if self.assign(ctx, available, vehicle, request)? {
                        return Ok(true);
                    }
                }
            }
            for neighbour in &adjacent {
                if let Some(vehicle) = self.cruising_taxi_in(ctx, available, *neighbour, &request.origin)? {
                    if self.assign(ctx, available, vehicle, request)? {
                        return Ok(true);
                    }
                }
            }
        }
        match self.nearest_taxi(ctx, available, &request.origin)? {
            Some(vehicle) => self.assign(ctx, available, vehicle, request),
            None => Ok(false),
        }
    }

    /// Longest-waiting taxi at the closest occupied rank of `zone`.
    fn taxi_at_rank_in(
        &self,
        ctx: &DispatchContext<'_>,
        available: &[VehicleId],
        zone: ZoneId,
        origin: &Location,
    ) -> DispatchResult<Option<VehicleId>> {
        let mut ranks: Vec<(f64, RankId)> = self
            .ranks_in(zone)
            .iter()
            .filter(|id| self.ranks.occupancy(**id) > 0)
            .filter_map(|id| self.ranks.get(*id).map(|r| (r.location.distance_to(origin), *id)))
            .collect();
        ranks.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, rank) in ranks {
            let Some(rank_location) = self.ranks.get(rank).map(|r| r.location) else {
                continue;
            };
            let mut best: Option<(f64, VehicleId)> = None;
            for vehicle in available.iter().filter(|v| self.is_at_rank(**v)) {
                let taxi = ctx.fleet.vehicle(*vehicle)?;
                if !taxi.drive_destination().is_same_place(&rank_location) {
                    continue;
                }
                let since = taxi.tasks().current().begin;
                if best.map_or(true, |(b, _)| since < b) {
                    best = Some((since, *vehicle));
                }
            }
            if let Some((_, vehicle)) = best {
                return Ok(Some(vehicle));
            }
        }
        Ok(None)
    }

    /// Closest available taxi not at a rank whose position lies in `zone`.
    fn cruising_taxi_in(
        &self,
        ctx: &DispatchContext<'_>,
        available: &[VehicleId],
        zone: ZoneId,
        origin: &Location,
    ) -> DispatchResult<Option<VehicleId>> {
        let Some(zone) = self.zones.get(zone) else {
            return Ok(None);
        };
        let mut best: Option<(f64, VehicleId)> = None;
        for vehicle in available.iter().filter(|v| !self.is_at_rank(**v)) {
            let here = ctx.location_of(*vehicle)?;
            if !zone.contains(&here) {
                continue;
            }
            let distance = here.distance_to(origin);
            if best.map_or(true, |(b, _)| distance < b) {
                best = Some((distance, *vehicle));
            }
        }
        Ok(best.map(|(_, v)| v))
    }

    fn nearest_taxi(
        &self,
        ctx: &DispatchContext<'_>,
        available: &[VehicleId],
        origin: &Location,
    ) -> DispatchResult<Option<VehicleId>> {
        let mut best: Option<(f64, VehicleId)> = None;
        for vehicle in available {
            let distance = ctx.location_of(*vehicle)?.distance_to(origin);
            if best.map_or(true, |(b, _)| distance < b) {
                best = Some((distance, *vehicle));
            }
        }
        Ok(best.map(|(_, v)| v))
    }

    /// Assign when the waiting-time gate admits the pairing.
    fn assign(
        &mut self,
        ctx: &mut DispatchContext<'_>,
        available: &mut Vec<VehicleId>,
        vehicle: VehicleId,
        request: &Request,
    ) -> DispatchResult<bool> {
        let now = ctx.now as f64;
        let taxi = ctx.fleet.vehicle(vehicle)?;
        let offer = AvailableVehicle {
            id: vehicle,
            location: taxi.divertable_location(now),
            divertable_time: taxi.divertable_time(now),
        };
        let open = OpenRequest {
            id: request.id,
            origin: request.origin,
            submission_time: request.submission_time,
        };
        let gate = ctx.gate();
        let (_, eta) = gate.estimate(&offer, &open);
        if !gate.admits(eta, request.submission_time) {
            debug!(request = %request.id, %vehicle, eta, "pickup would be too late");
            return Ok(false);
        }
        ctx.register
            .assign(ctx.fleet, ctx.oracle, ctx.events, vehicle, request.id, ctx.now)?;
        available.retain(|v| *v != vehicle);
        self.at_rank.remove(&vehicle);
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Rebalancing
    // -------------------------------------------------------------------

    /// Nearest free rank in the taxi's zone, then in adjacent zones, then a
    /// random free centre rank.
    fn send_to_rank(&mut self, ctx: &mut DispatchContext<'_>, vehicle: VehicleId) -> DispatchResult<bool> {
        let here = ctx.location_of(vehicle)?;
        let mut target = None;
        if let Some(zone) = self.zones.nearest(&here) {
            target = self.ranks.nearest_free(&here, self.ranks_in(zone));
            if target.is_none() {
                for neighbour in self.zones.adjacent(zone) {
                    target = self.ranks.nearest_free(&here, self.ranks_in(*neighbour));
                    if target.is_some() {
                        break;
                    }
                }
            }
        }
        let target = target.or_else(|| self.ranks.random_free(&self.centre_ranks, &mut *ctx.rng));
        match target {
            Some(rank) => self.send_to(ctx, vehicle, rank),
            None => Ok(false),
        }
    }

    fn send_to(&mut self, ctx: &mut DispatchContext<'_>, vehicle: VehicleId, rank: RankId) -> DispatchResult<bool> {
        let Some(location) = self.ranks.get(rank).map(|r| r.location) else {
            return Ok(false);
        };
        // Reserve the slot so one round does not overfill the rank.
        self.ranks.occupy(rank);
        ctx.rebalance_vehicle(vehicle, location)
    }

    /// Random point between the centre and the taxi, within the centre circle.
    fn point_toward_centre(&self, from: &Location, rng: &mut impl Rng) -> Location {
        let distance = from.distance_to(&self.centre);
        if distance <= 0.0 {
            return self.centre;
        }
        let reach = rng.gen::<f64>() * self.radius;
        self.centre.lerp(from, reach / distance)
    }

    fn missing_in_centre(&self, ctx: &DispatchContext<'_>, staying: &[VehicleId]) -> DispatchResult<i64> {
        let mut inside = 0i64;
        for vehicle in staying {
            if ctx.location_of(*vehicle)?.distance_to(&self.centre) <= self.radius {
                inside += 1;
            }
        }
        Ok((self.threshold * staying.len() as f64).floor() as i64 - inside)
    }
}

impl DispatchPolicy for ReferencePolicy {
    fn name(&self) -> &str {
        "reference"
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        self.refresh_ranks(ctx)?;
        let requests: Vec<Request> = ctx
            .register
            .unassigned_requests()
            .into_iter()
            .cloned()
            .collect();
        let mut available = ctx.fleet.divertable_unassigned();
        let mut assigned = 0;
        for request in &requests {
            if available.is_empty() {
                break;
            }
            if self.try_assign(ctx, &mut available, request)? {
                assigned += 1;
            }
        }
        if assigned > 0 {
            debug!(t = ctx.now, assigned, open = requests.len(), "reference dispatch");
        }
        Ok(())
    }

    fn rebalance(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        self.refresh_ranks(ctx)?;
        let staying = ctx.staying_fifo();
        let mut missing = self.missing_in_centre(ctx, &staying)?;
        debug!(t = ctx.now, missing, staying = staying.len(), "reference rebalancing");

        for vehicle in staying {
            let here = ctx.location_of(vehicle)?;
            let inside = here.distance_to(&self.centre) <= self.radius;
            if missing > 0 && !inside {
                match self.ranks.random_free(&self.centre_ranks, &mut *ctx.rng) {
                    Some(rank) => {
                        self.send_to(ctx, vehicle, rank)?;
                    }
                    None => {
                        let target = self.point_toward_centre(&here, &mut *ctx.rng);
                        ctx.rebalance_vehicle(vehicle, target)?;
                    }
                }
                missing -= 1;
            } else if missing < 0 && inside {
                if let Some(rank) = self.ranks.random_free(&self.outside_ranks, &mut *ctx.rng) {
                    self.send_to(ctx, vehicle, rank)?;
                    missing += 1;
                }
            } else if !self.is_at_rank(vehicle) {
                self.send_to_rank(ctx, vehicle)?;
            }
        }
        Ok(())
    }
}
