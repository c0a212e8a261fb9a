use rand::distributions::{Distribution, WeightedIndex};
use tracing::{debug, warn};

use super::{DispatchContext, DispatchPolicy};
use crate::error::DispatchResult;
use crate::grid::{DemandForecast, Grid};
use crate::matching::{match_and_commit, NearestNeighborMatching};

/// Nearest taxi / nearest request. With a grid and a demand forecast, idle
/// taxis are spread over the cells in proportion to the predicted demand.
pub struct NearestTaxiPolicy {
    matcher: NearestNeighborMatching,
    demand: Option<(Grid, DemandForecast)>,
}

impl NearestTaxiPolicy {
    pub fn new(grid: Option<Grid>, forecast: Option<DemandForecast>) -> Self {
        Self {
            matcher: NearestNeighborMatching,
            demand: grid.zip(forecast),
        }
    }
}

impl DispatchPolicy for NearestTaxiPolicy {
    fn name(&self) -> &str {
        "ntnr"
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        let gate = ctx.gate();
        match_and_commit(
            &self.matcher,
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
        let Some((grid, forecast)) = &self.demand else {
            return Ok(());
        };
        let demand = match forecast.current_demand(ctx.now) {
            Ok(demand) => demand,
            Err(err) => {
                warn!(error = %err, t = ctx.now, "no demand forecast; skipping rebalancing");
                return Ok(());
            }
        };
        let Ok(weights) = WeightedIndex::new(&demand) else {
            debug!(t = ctx.now, "no predicted demand; idle taxis stay put");
            return Ok(());
        };
        let mut moved = 0;
        for vehicle in ctx.staying_fifo() {
            let here = ctx.location_of(vehicle)?;
            let target = weights.sample(&mut *ctx.rng);
            if grid.cell_of(&here) == Some(target) {
                continue;
            }
            let Some(cell) = grid.cell(target) else {
                continue;
            };
            if ctx.rebalance_vehicle(vehicle, cell.center())? {
                moved += 1;
            }
        }
        debug!(t = ctx.now, moved, "idle taxis spread by demand");
        Ok(())
    }
}
