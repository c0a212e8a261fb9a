#![allow(dead_code)]

use bevy_ecs::prelude::World;
use dispatch_core::fleet_size::FleetSizeSchedule;
use dispatch_core::grid::{DemandForecast, Grid};
use dispatch_core::policy::{PolicyInputs, PolicyRegistry};
use dispatch_core::request::Request;
use dispatch_core::scenario::{
    build_dispatch_world, DispatchConfig, DispatchScenario, MatchingAlgorithmType,
};
use dispatch_core::test_helpers::{grid_inputs, test_config, test_scenario};
use dispatch_core::vehicle::RoboTaxi;
use dispatch_core::zones::{DispatchingZones, TaxiRanks};

/// Builder configuration for reproducible test worlds.
#[derive(Clone, Debug)]
pub struct TestWorldConfig {
    pub config: DispatchConfig,
    pub vehicles: Vec<RoboTaxi>,
    pub requests: Vec<Request>,
    pub inputs: PolicyInputs,
    pub fleet_schedule: Option<FleetSizeSchedule>,
}

impl Default for TestWorldConfig {
    fn default() -> Self {
        Self {
            config: test_config("bipartite"),
            vehicles: Vec::new(),
            requests: Vec::new(),
            inputs: PolicyInputs::default(),
            fleet_schedule: None,
        }
    }
}

/// Populates the ECS world with every resource the dispatch schedule reads.
#[derive(Debug, Default)]
pub struct TestWorldBuilder {
    config: TestWorldConfig,
}

impl TestWorldBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry name of the dispatch policy.
    pub fn with_policy(mut self, policy: &str) -> Self {
        self.config.config.policy = policy.to_string();
        self
    }

    pub fn with_matching(mut self, algorithm: MatchingAlgorithmType) -> Self {
        self.config.config.matching_algorithm = algorithm;
        self
    }

    /// Adjust any config field not covered by a dedicated method.
    pub fn with_config(mut self, edit: impl FnOnce(&mut DispatchConfig)) -> Self {
        edit(&mut self.config.config);
        self
    }

    pub fn with_vehicles(mut self, vehicles: Vec<RoboTaxi>) -> Self {
        self.config.vehicles = vehicles;
        self
    }

    pub fn with_requests(mut self, requests: Vec<Request>) -> Self {
        self.config.requests = requests;
        self
    }

    /// Grid and forecast; tables are computed with the test oracle.
    pub fn with_grid(mut self, grid: Grid, forecast: DemandForecast) -> Self {
        let ranks = self.config.inputs.ranks.take();
        let zones = self.config.inputs.zones.take();
        self.config.inputs = PolicyInputs {
            ranks,
            zones,
            ..grid_inputs(grid, forecast)
        };
        self
    }

    pub fn with_ranks(mut self, ranks: TaxiRanks, zones: DispatchingZones) -> Self {
        self.config.inputs.ranks = Some(ranks);
        self.config.inputs.zones = Some(zones);
        self
    }

    pub fn with_fleet_schedule(mut self, schedule: FleetSizeSchedule) -> Self {
        self.config.fleet_schedule = Some(schedule);
        self
    }

    pub fn scenario(self) -> DispatchScenario {
        let TestWorldConfig {
            config,
            vehicles,
            requests,
            inputs,
            fleet_schedule,
        } = self.config;
        let mut scenario = test_scenario(config, vehicles)
            .with_requests(requests)
            .with_inputs(inputs);
        if let Some(schedule) = fleet_schedule {
            scenario = scenario.with_fleet_schedule(schedule);
        }
        scenario
    }

    /// Build the ECS world with the configured resources.
    pub fn build(self) -> World {
        let mut world = World::new();
        build_dispatch_world(&mut world, self.scenario(), &PolicyRegistry::default())
            .expect("test world should assemble");
        world
    }
}
