//! Per-tick systems. [`crate::runner::dispatch_schedule`] chains them in a
//! fixed order so every mutation of the fleet and the register is sequential.

pub mod consistency;
pub mod directives;
pub mod dispatch;
pub mod fleet_size;
pub mod inbound;
pub mod movement;
pub mod telemetry_snapshot;

use bevy_ecs::prelude::Resource;
use tracing::error;

use crate::error::DispatchError;
use crate::executor::Arrival;

/// Recoverable errors raised by systems during the current tick. The runner
/// hands the first one back to the host.
#[derive(Debug, Default, Resource)]
pub struct TickFaults(pub Vec<DispatchError>);

impl TickFaults {
    pub fn record(&mut self, system: &str, err: DispatchError) {
        error!(system, error = %err, "dispatch step failed");
        self.0.push(err);
    }
}

/// Customer stops reached while the task queues advanced this tick.
#[derive(Debug, Default, Resource)]
pub struct TickArrivals(pub Vec<Arrival>);
