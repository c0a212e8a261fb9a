//! Dispatch policies: what to do with open requests and idle vehicles.
//!
//! A policy only decides. Every decision goes through the register (customer
//! assignments) or the executor (rebalancing), which own the state.

pub mod bipartite;
pub mod lp_rebalancing;
pub mod nearest;
pub mod reference;
pub mod registry;

use bevy_ecs::prelude::Resource;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use crate::error::DispatchResult;
use crate::events::{DomainEvent, DomainEvents};
use crate::executor::{DiversionOutcome, Fleet};
use crate::grid::{DemandForecast, Grid, GridTables};
use crate::matching::WaitingTimeGate;
use crate::register::RequestRegister;
use crate::routing::RoutingOracle;
use crate::scenario::DispatchConfig;
use crate::spatial::Location;
use crate::vehicle::{VehicleId, VehicleStatus};
use crate::zones::{DispatchingZones, TaxiRanks};

pub use bipartite::BipartitePolicy;
pub use lp_rebalancing::LpRebalancingPolicy;
pub use nearest::NearestTaxiPolicy;
pub use reference::ReferencePolicy;
pub use registry::{PolicyConstructor, PolicyRegistry};

/// Seeded RNG shared by the policies.
#[derive(Debug, Resource)]
pub struct DispatchRng(pub StdRng);

impl DispatchRng {
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

/// Pre-computed, read-only inputs a policy may be built from.
#[derive(Debug, Clone, Default, Resource)]
pub struct PolicyInputs {
    pub grid: Option<Grid>,
    pub tables: Option<GridTables>,
    pub forecast: Option<DemandForecast>,
    pub ranks: Option<TaxiRanks>,
    pub zones: Option<DispatchingZones>,
}

/// Everything a policy may read or mutate during one call.
pub struct DispatchContext<'a> {
    pub fleet: &'a mut Fleet,
    pub register: &'a mut RequestRegister,
    pub events: &'a mut DomainEvents,
    pub config: &'a DispatchConfig,
    pub oracle: &'a dyn RoutingOracle,
    pub now: u64,
    pub rng: &'a mut StdRng,
}

impl DispatchContext<'_> {
    pub fn gate(&self) -> WaitingTimeGate {
        WaitingTimeGate::from_config(self.config)
    }

    pub fn location_of(&self, vehicle: VehicleId) -> DispatchResult<Location> {
        Ok(self.fleet.vehicle(vehicle)?.divertable_location(self.now as f64))
    }

    /// Staying vehicles, longest waiting first.
    pub fn staying_fifo(&self) -> Vec<VehicleId> {
        let mut staying: Vec<(f64, VehicleId)> = self
            .fleet
            .staying_vehicles()
            .into_iter()
            .filter_map(|id| {
                self.fleet
                    .vehicle(id)
                    .ok()
                    .map(|taxi| (taxi.tasks().current().begin, id))
            })
            .collect();
        staying.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        staying.into_iter().map(|(_, id)| id).collect()
    }

    /// Send an empty vehicle to `to` as a rebalancing drive. Returns whether a
    /// directive was issued.
    pub fn rebalance_vehicle(&mut self, vehicle: VehicleId, to: Location) -> DispatchResult<bool> {
        let from = self.location_of(vehicle)?;
        if from.is_same_place(&to) {
            trace!(%vehicle, "rebalancing target is the current position");
            return Ok(false);
        }
        let outcome =
            self.fleet
                .issue_diversion(self.oracle, vehicle, to, VehicleStatus::Rebalance, self.now)?;
        if matches!(outcome, DiversionOutcome::Issued { .. }) {
            self.events.push(DomainEvent::RebalanceIssued {
                time: self.now,
                vehicle,
                from,
                to,
            });
            return Ok(true);
        }
        Ok(false)
    }
}

pub trait DispatchPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Assign open requests. Expired requests have already been cancelled.
    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()>;

    /// Reposition empty vehicles. Called once per rebalancing period.
    fn rebalance(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()>;

    /// Policy-specific work on every tick, after dispatching and rebalancing.
    fn on_tick(&mut self, _ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        Ok(())
    }
}

/// The policy selected for this run.
#[derive(Resource)]
pub struct ActivePolicy(pub Box<dyn DispatchPolicy>);

impl ActivePolicy {
    pub fn name(&self) -> &str {
        self.0.name()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::routing::{StraightLineCalculator, SyncOracle};
    use crate::vehicle::RoboTaxi;

    /// Owns everything a [`DispatchContext`] borrows.
    pub struct PolicyHarness {
        pub fleet: Fleet,
        pub register: RequestRegister,
        pub events: DomainEvents,
        pub config: DispatchConfig,
        pub oracle: SyncOracle<StraightLineCalculator>,
        pub rng: StdRng,
    }

    impl PolicyHarness {
        pub fn new(vehicles: &[(f64, f64)]) -> Self {
            let vehicles = vehicles
                .iter()
                .enumerate()
                .map(|(i, (x, y))| RoboTaxi::new(VehicleId(i), Location::new(*x, *y), 4, 0.0))
                .collect();
            Self {
                fleet: Fleet::new(vehicles, 15.0, 10.0),
                register: RequestRegister::default(),
                events: DomainEvents::default(),
                config: DispatchConfig {
                    eta_speed_mps: 10.0,
                    ..DispatchConfig::default()
                },
                oracle: SyncOracle(StraightLineCalculator::new(10.0)),
                rng: StdRng::seed_from_u64(42),
            }
        }

        pub fn ctx(&mut self, now: u64) -> DispatchContext<'_> {
            DispatchContext {
                fleet: &mut self.fleet,
                register: &mut self.register,
                events: &mut self.events,
                config: &self.config,
                oracle: &self.oracle,
                now,
                rng: &mut self.rng,
            }
        }

        /// Start a new tick and commit every resolved directive.
        pub fn settle(&mut self, now: u64) {
            self.fleet.resolve_directives(&self.oracle, now);
            self.fleet.begin_tick();
        }
    }
}
