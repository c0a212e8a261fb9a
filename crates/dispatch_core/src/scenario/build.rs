use bevy_ecs::prelude::World;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::clock::{DispatchClock, InboundRequests};
use crate::error::{DispatchError, DispatchResult};
use crate::events::DomainEvents;
use crate::executor::Fleet;
use crate::fleet_size::{FleetSizeController, FleetSizeSchedule};
use crate::grid::GridTables;
use crate::policy::{ActivePolicy, DispatchRng, PolicyInputs, PolicyRegistry};
use crate::register::RequestRegister;
use crate::request::Request;
use crate::routing::{build_routing_oracle, OracleKind, RoutingOracleResource};
use crate::scenario::params::DispatchConfig;
use crate::spatial::{BoundingBox, Location};
use crate::systems::{TickArrivals, TickFaults};
use crate::telemetry::{DispatchTelemetry, TelemetryConfig, TickHooks};
use crate::vehicle::{RoboTaxi, VehicleId};

/// Default vehicle capacity for generated fleets.
const DEFAULT_CAPACITY: u32 = 4;

/// Everything needed to assemble a dispatch world.
#[derive(Debug, Clone, Default)]
pub struct DispatchScenario {
    pub config: DispatchConfig,
    pub vehicles: Vec<RoboTaxi>,
    pub inputs: PolicyInputs,
    pub oracle: OracleKind,
    pub fleet_schedule: Option<FleetSizeSchedule>,
    /// Requests handed to the clock for submission at their submission time.
    pub requests: Vec<Request>,
    pub telemetry: TelemetryConfig,
}

impl DispatchScenario {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_vehicles(mut self, vehicles: Vec<RoboTaxi>) -> Self {
        self.vehicles = vehicles;
        self
    }

    /// `count` in-service vehicles at uniform random points of `bounds`,
    /// seeded from the config seed.
    pub fn with_random_fleet(mut self, count: usize, bounds: BoundingBox) -> Self {
        self.vehicles = random_fleet(count, bounds, self.config.seed);
        self
    }

    pub fn with_inputs(mut self, inputs: PolicyInputs) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_oracle(mut self, oracle: OracleKind) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_fleet_schedule(mut self, schedule: FleetSizeSchedule) -> Self {
        self.fleet_schedule = Some(schedule);
        self
    }

    pub fn with_requests(mut self, requests: Vec<Request>) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}

/// In-service vehicles with dense ids at seeded random locations.
pub fn random_fleet(count: usize, bounds: BoundingBox, seed: u64) -> Vec<RoboTaxi> {
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed_f1ee);
    (0..count)
        .map(|i| {
            let location = random_location(&mut rng, bounds);
            RoboTaxi::new(VehicleId(i), location, DEFAULT_CAPACITY, 0.0)
        })
        .collect()
}

pub fn random_location<R: Rng>(rng: &mut R, bounds: BoundingBox) -> Location {
    let x = if bounds.width() > 0.0 {
        rng.gen_range(bounds.min_x..bounds.max_x)
    } else {
        bounds.min_x
    };
    let y = if bounds.height() > 0.0 {
        rng.gen_range(bounds.min_y..bounds.max_y)
    } else {
        bounds.min_y
    };
    Location::new(x, y)
}

/// Insert every resource the dispatch schedule reads and build the configured
/// policy through `registry`. Grid tables are computed with the scenario's
/// oracle when a grid is given without them.
pub fn build_dispatch_world(
    world: &mut World,
    scenario: DispatchScenario,
    registry: &PolicyRegistry,
) -> DispatchResult<()> {
    let DispatchScenario {
        config,
        vehicles,
        mut inputs,
        oracle,
        fleet_schedule,
        requests,
        telemetry,
    } = scenario;
    config.validate()?;
    for (index, taxi) in vehicles.iter().enumerate() {
        if taxi.id() != VehicleId(index) {
            return Err(DispatchError::Config(format!(
                "vehicle ids must be dense: found {} at position {index}",
                taxi.id()
            )));
        }
    }

    let oracle = build_routing_oracle(&oracle);
    if let (Some(grid), None) = (&inputs.grid, &inputs.tables) {
        inputs.tables = Some(GridTables::compute(grid, oracle.as_ref()));
    }
    let policy = registry.build(&config.policy, &inputs, &config)?;

    let mut clock = DispatchClock::default();
    for request in requests {
        clock.schedule_submission(request.submission_time, request);
    }

    info!(
        policy = policy.name(),
        vehicles = vehicles.len(),
        scheduled = clock.pending_submissions(),
        "dispatch world assembled"
    );

    world.insert_resource(clock);
    world.insert_resource(InboundRequests::default());
    world.insert_resource(Fleet::new(vehicles, config.pickup_duration, config.dropoff_duration));
    world.insert_resource(RequestRegister::default());
    world.insert_resource(DomainEvents::default());
    world.insert_resource(RoutingOracleResource(oracle));
    world.insert_resource(DispatchRng::seeded(config.seed));
    world.insert_resource(ActivePolicy(policy));
    if let Some(schedule) = fleet_schedule {
        world.insert_resource(FleetSizeController::new(schedule));
    }
    world.insert_resource(inputs);
    world.insert_resource(config);
    world.insert_resource(telemetry);
    world.insert_resource(DispatchTelemetry::default());
    world.insert_resource(TickHooks::default());
    world.insert_resource(TickArrivals::default());
    world.insert_resource(TickFaults::default());
    Ok(())
}
