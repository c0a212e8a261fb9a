pub mod spatial;
pub mod routing;
pub mod clock;
pub mod error;
pub mod request;
pub mod task;
pub mod menu;
pub mod vehicle;
pub mod events;
pub mod executor;
pub mod register;
pub mod grid;
pub mod matching;
pub mod rebalancing;
pub mod fleet_size;
pub mod zones;
pub mod policy;
pub mod runner;
pub mod scenario;
pub mod systems;
pub mod telemetry;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
