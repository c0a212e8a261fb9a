//! Scenario setup: typed configuration and assembly of a dispatch world.

mod build;
mod params;

pub use build::{build_dispatch_world, random_fleet, random_location, DispatchScenario};
pub use params::{
    DispatchConfig, MatchingAlgorithmType, RebalancingConfig, ReferenceConfig, SolveMode,
};
