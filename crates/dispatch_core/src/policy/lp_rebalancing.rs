//! Grid policy: customer matching with the configured matcher plus LP-planned
//! rebalancing between grid cells.

use rand::Rng;
use tracing::{debug, info, warn};

use super::{DispatchContext, DispatchPolicy, PolicyInputs};
use crate::error::{DispatchError, DispatchResult};
use crate::executor::Fleet;
use crate::grid::{DemandForecast, Grid};
use crate::matching::{build_matcher, match_and_commit, MatchingAlgorithm};
use crate::rebalancing::{Rebalancer, RebalancingInputs, RebalancingModel};
use crate::scenario::DispatchConfig;
use crate::spatial::Location;
use crate::vehicle::{VehicleId, VehicleStatus};

pub struct LpRebalancingPolicy {
    matcher: Box<dyn MatchingAlgorithm>,
    grid: Grid,
    forecast: DemandForecast,
    /// Rank locations per grid cell.
    cell_ranks: Vec<Vec<Location>>,
    rebalancer: Rebalancer,
    period: u64,
    outside_period: u64,
}

impl LpRebalancingPolicy {
    pub fn new(inputs: &PolicyInputs, config: &DispatchConfig) -> DispatchResult<Self> {
        let missing = |what: &str| DispatchError::Config(format!("lp_rebalancing needs {what}"));
        let grid = inputs.grid.clone().ok_or_else(|| missing("a grid"))?;
        let tables = inputs.tables.clone().ok_or_else(|| missing("grid tables"))?;
        let forecast = inputs.forecast.clone().ok_or_else(|| missing("a demand forecast"))?;
        if tables.len() != grid.len() || forecast.cells() != grid.len() {
            return Err(DispatchError::Config(format!(
                "grid has {} cells but tables cover {} and the forecast {}",
                grid.len(),
                tables.len(),
                forecast.cells()
            )));
        }
        let steps = forecast.steps();
        if steps < 2 {
            return Err(DispatchError::Config(format!(
                "forecast must predict at least two steps, got {steps}"
            )));
        }
        let cell_ranks = grid
            .cells()
            .iter()
            .map(|cell| {
                inputs
                    .ranks
                    .iter()
                    .flat_map(|ranks| ranks.iter())
                    .filter(|rank| cell.contains(&rank.location))
                    .map(|rank| rank.location)
                    .collect()
            })
            .collect();
        let model = RebalancingModel::new(tables, steps, config.rebalancing_period as f64, config.rebalancing);
        let rebalancer = Rebalancer::new(model, config.rebalancing.solve_mode)?;
        info!(
            cells = grid.len(),
            steps,
            matcher = ?config.matching_algorithm,
            mode = ?config.rebalancing.solve_mode,
            "lp rebalancing policy ready"
        );
        Ok(Self {
            matcher: build_matcher(config.matching_algorithm, config),
            grid,
            forecast,
            cell_ranks,
            rebalancer,
            period: config.rebalancing_period,
            outside_period: config.outside_recovery_period,
        })
    }

    pub fn rebalancer(&self) -> &Rebalancer {
        &self.rebalancer
    }

    pub fn rebalancer_mut(&mut self) -> &mut Rebalancer {
        &mut self.rebalancer
    }

    /// A random rank in the cell, or its centre when it has none.
    fn target_in_cell(&self, cell: usize, rng: &mut impl Rng) -> Option<Location> {
        match self.cell_ranks.get(cell) {
            Some(ranks) if !ranks.is_empty() => Some(ranks[rng.gen_range(0..ranks.len())]),
            _ => self.grid.cell(cell).map(|c| c.center()),
        }
    }

    /// Empty in-service vehicles per cell, in id order.
    fn unassigned_per_cell(&self, fleet: &Fleet, now: u64) -> Vec<Vec<VehicleId>> {
        let mut per_cell = vec![Vec::new(); self.grid.len()];
        for vehicle in fleet.divertable_unassigned() {
            let Ok(taxi) = fleet.vehicle(vehicle) else {
                continue;
            };
            if let Some(cell) = self.grid.cell_of(&taxi.divertable_location(now as f64)) {
                per_cell[cell].push(vehicle);
            }
        }
        per_cell
    }

    /// Re-home staying taxis outside the grid to the cell with the fewest
    /// present or arriving taxis per unit of predicted demand.
    fn recover_outside(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        let now = ctx.now;
        let mut outside = Vec::new();
        let mut taxis = vec![0.0; self.grid.len()];
        for vehicle in ctx.fleet.staying_vehicles() {
            let here = ctx.location_of(vehicle)?;
            match self.grid.cell_of(&here) {
                Some(cell) => taxis[cell] += 1.0,
                None => outside.push(vehicle),
            }
        }
        if outside.is_empty() {
            return Ok(());
        }
        let demand = match self.forecast.current_demand(now) {
            Ok(demand) => demand,
            Err(err) => {
                warn!(error = %err, t = now, "cannot recover taxis outside the grid");
                return Ok(());
            }
        };
        let horizon = (now + self.period) as f64;
        for taxi in ctx.fleet.vehicles() {
            if let Some((at, time)) = ctx.fleet.planned_arrival(taxi.id()) {
                if time >= now as f64 && time < horizon {
                    if let Some(cell) = self.grid.cell_of(&at) {
                        taxis[cell] += 1.0;
                    }
                }
            }
        }

        info!(t = now, count = outside.len(), "sending taxis outside the grid back in");
        for vehicle in outside {
            let ratio = |cell: usize| {
                if demand[cell] > 0.0 {
                    taxis[cell] / demand[cell]
                } else {
                    f64::INFINITY
                }
            };
            let mut best = 0;
            for cell in 1..taxis.len() {
                if ratio(cell) < ratio(best) {
                    best = cell;
                }
            }
            if let Some(target) = self.target_in_cell(best, &mut *ctx.rng) {
                ctx.rebalance_vehicle(vehicle, target)?;
            }
            taxis[best] += 1.0;
        }
        Ok(())
    }
}

/// Dynamic LP inputs from the current fleet state and forecast.
fn collect_inputs(
    grid: &Grid,
    forecast: &DemandForecast,
    fleet: &Fleet,
    now: u64,
    period: u64,
    steps: usize,
) -> DispatchResult<RebalancingInputs> {
    let predicted_demand = forecast.all_cells(now)?.to_vec();
    let locations: Vec<Location> = fleet
        .divertable_unassigned()
        .into_iter()
        .filter_map(|id| fleet.vehicle(id).ok())
        .map(|taxi| taxi.divertable_location(now as f64))
        .collect();
    let initial_placement = grid
        .count_per_cell(&locations)
        .into_iter()
        .map(|n| n as f64)
        .collect();

    let mut becoming_free = vec![vec![0.0; grid.len()]; steps - 1];
    for taxi in fleet.vehicles() {
        if taxi.status() != VehicleStatus::DriveWithCustomer {
            continue;
        }
        let Some((at, time)) = fleet.planned_free_time(taxi.id()) else {
            continue;
        };
        if time < now as f64 {
            continue;
        }
        let step = ((time - now as f64) / period as f64).floor() as usize;
        if let (Some(row), Some(cell)) = (becoming_free.get_mut(step), grid.cell_of(&at)) {
            row[cell] += 1.0;
        }
    }
    Ok(RebalancingInputs {
        predicted_demand,
        initial_placement,
        becoming_free,
    })
}

impl DispatchPolicy for LpRebalancingPolicy {
    fn name(&self) -> &str {
        "lp_rebalancing"
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        let gate = ctx.gate();
        match_and_commit(
            self.matcher.as_ref(),
            &gate,
            ctx.fleet,
            ctx.register,
            ctx.oracle,
            ctx.events,
            ctx.now,
        )?;
        Ok(())
    }

    fn rebalance(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        let now = ctx.now;
        let steps = self.rebalancer.steps();
        let moves = {
            let (grid, forecast, fleet) = (&self.grid, &self.forecast, &*ctx.fleet);
            let period = self.period;
            self.rebalancer
                .next_moves(|| collect_inputs(grid, forecast, fleet, now, period, steps))?
        };
        if moves.is_empty() {
            return Ok(());
        }

        let mut per_cell = self.unassigned_per_cell(ctx.fleet, now);
        let mut moved = 0;
        for (origin, destination, planned) in moves {
            let Some(available) = per_cell.get_mut(origin) else {
                continue;
            };
            let count = (planned as usize).min(available.len());
            if count < planned as usize {
                warn!(
                    t = now,
                    origin,
                    destination,
                    planned,
                    available = available.len(),
                    "fewer taxis in cell than the plan moves"
                );
            }
            let taxis: Vec<VehicleId> = available.drain(..count).collect();
            for vehicle in taxis {
                let Some(target) = self.target_in_cell(destination, &mut *ctx.rng) else {
                    continue;
                };
                if ctx.rebalance_vehicle(vehicle, target)? {
                    moved += 1;
                }
            }
        }
        debug!(t = now, moved, "lp plan slice dispatched");
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        if self.outside_period > 0 && ctx.now % self.outside_period == 0 {
            self.recover_outside(ctx)?;
        }
        Ok(())
    }
}
