use bevy_ecs::prelude::{Res, ResMut};

use crate::clock::DispatchClock;
use crate::events::DomainEvents;
use crate::executor::Fleet;
use crate::register::RequestRegister;
use crate::telemetry::{DispatchTelemetry, TelemetryConfig, TickHooks, TickSnapshot};

/// Drain the tick's events into a snapshot, run the host hooks and keep the
/// snapshot in the rolling buffer when one is installed.
pub fn capture_snapshot_system(
    clock: Res<DispatchClock>,
    fleet: Res<Fleet>,
    register: Res<RequestRegister>,
    mut events: ResMut<DomainEvents>,
    hooks: Option<ResMut<TickHooks>>,
    telemetry: Option<ResMut<DispatchTelemetry>>,
    config: Option<Res<TelemetryConfig>>,
) {
    let snapshot = TickSnapshot::capture(clock.now(), &fleet, &register, events.drain());
    if let Some(mut hooks) = hooks {
        hooks.run(&snapshot);
    }
    if let Some(mut telemetry) = telemetry {
        let config = config.map(|c| *c).unwrap_or_default();
        telemetry.record(snapshot, config.max_snapshots);
    }
}
