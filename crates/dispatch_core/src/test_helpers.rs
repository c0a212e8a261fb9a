//! Test helpers for common test setup and utilities.
//!
//! Shared by unit tests, integration tests and benches to keep fixtures in one place.

use bevy_ecs::prelude::World;

use crate::grid::{DemandForecast, Grid, GridTables};
use crate::policy::{PolicyInputs, PolicyRegistry};
use crate::request::{Request, RequestId};
use crate::routing::{OracleKind, StraightLineCalculator, SyncOracle};
use crate::scenario::{build_dispatch_world, DispatchConfig, DispatchScenario};
use crate::spatial::{BoundingBox, Location};
use crate::vehicle::{RoboTaxi, VehicleId};

/// Speed used by every test oracle (m/s).
pub const TEST_SPEED_MPS: f64 = 10.0;

/// Side length of one test grid cell in metres.
pub const TEST_CELL_SIZE_M: f64 = 1000.0;

pub fn test_oracle() -> SyncOracle<StraightLineCalculator> {
    SyncOracle(StraightLineCalculator::new(TEST_SPEED_MPS))
}

/// Square grid of `n` x `n` cells, each [`TEST_CELL_SIZE_M`] wide.
///
/// # Panics
///
/// Panics if `n` is zero.
pub fn test_grid(n: usize) -> Grid {
    let side = n as f64 * TEST_CELL_SIZE_M;
    Grid::new(BoundingBox::new(0.0, side, 0.0, side), n, n).expect("test grid should be valid")
}

/// Centre of grid cell `(row, col)` of a [`test_grid`].
pub fn cell_centre(row: usize, col: usize) -> Location {
    Location::new(
        (col as f64 + 0.5) * TEST_CELL_SIZE_M,
        (row as f64 + 0.5) * TEST_CELL_SIZE_M,
    )
}

/// In-service vehicles with dense ids at the given points.
pub fn vehicles_at(points: &[Location]) -> Vec<RoboTaxi> {
    points
        .iter()
        .enumerate()
        .map(|(i, location)| RoboTaxi::new(VehicleId(i), *location, 4, 0.0))
        .collect()
}

pub fn request(id: u64, origin: Location, destination: Location, submitted: u64) -> Request {
    Request::new(RequestId(id), origin, destination, submitted)
}

/// Forecast with the same per-cell predictions at every time in `times`.
///
/// # Panics
///
/// Panics if the rows do not all have the same number of steps.
pub fn constant_forecast(per_cell: Vec<Vec<f64>>, times: impl IntoIterator<Item = u64>) -> DemandForecast {
    let steps = per_cell.first().map_or(0, Vec::len);
    let mut forecast = DemandForecast::new(per_cell.len(), steps);
    for time in times {
        forecast
            .insert(time, per_cell.clone())
            .expect("forecast rows should be well formed");
    }
    forecast
}

/// Grid inputs with tables computed by the test oracle.
pub fn grid_inputs(grid: Grid, forecast: DemandForecast) -> PolicyInputs {
    let tables = GridTables::compute(&grid, &test_oracle());
    PolicyInputs {
        grid: Some(grid),
        tables: Some(tables),
        forecast: Some(forecast),
        ..PolicyInputs::default()
    }
}

/// Config with the test speed for ETA estimates.
pub fn test_config(policy: &str) -> DispatchConfig {
    DispatchConfig {
        eta_speed_mps: TEST_SPEED_MPS,
        ..DispatchConfig::default()
    }
    .with_policy(policy)
}

/// Scenario using the synchronous straight-line oracle at the test speed.
pub fn test_scenario(config: DispatchConfig, vehicles: Vec<RoboTaxi>) -> DispatchScenario {
    DispatchScenario::new(config)
        .with_vehicles(vehicles)
        .with_oracle(OracleKind::StraightLine {
            speed_mps: TEST_SPEED_MPS,
        })
}

/// Assemble a world from `scenario` with the built-in policies.
///
/// # Panics
///
/// Panics if the scenario is invalid.
pub fn create_test_world(scenario: DispatchScenario) -> World {
    let mut world = World::new();
    build_dispatch_world(&mut world, scenario, &PolicyRegistry::default())
        .expect("test scenario should assemble");
    world
}
