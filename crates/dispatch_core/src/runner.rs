//! Tick runner: advances the dispatch clock and runs the chained schedule.
//!
//! Clock progression happens here, outside systems. Each tick moves
//! [`DispatchClock`] to the host time, hands due submissions to
//! [`InboundRequests`], clears the executor's dirty set and runs the schedule.

use bevy_ecs::prelude::{Res, Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;

use crate::clock::{DispatchClock, InboundRequests};
use crate::error::{DispatchError, DispatchResult};
use crate::executor::Fleet;
use crate::fleet_size::FleetSizeController;
use crate::policy::ActivePolicy;
use crate::scenario::DispatchConfig;
use crate::systems::{
    consistency::consistency_check_system,
    directives::resolve_directives_system,
    dispatch::{dispatch_system, policy_tick_system, rebalance_system},
    fleet_size::fleet_size_system,
    inbound::request_inbound_system,
    movement::{advance_fleet_system, arrivals_system},
    telemetry_snapshot::capture_snapshot_system,
    TickArrivals, TickFaults,
};

fn is_period_tick(clock: Option<Res<DispatchClock>>, period: Option<u64>) -> bool {
    match (clock, period) {
        (Some(clock), Some(period)) => clock.is_period_tick(period),
        _ => false,
    }
}

fn has_policy(policy: &Option<Res<ActivePolicy>>) -> bool {
    policy.is_some()
}

fn is_fleet_size_tick(
    clock: Option<Res<DispatchClock>>,
    config: Option<Res<DispatchConfig>>,
    controller: Option<Res<FleetSizeController>>,
) -> bool {
    controller.is_some() && is_period_tick(clock, config.map(|c| c.fleet_size_period))
}

fn is_dispatch_tick(
    clock: Option<Res<DispatchClock>>,
    config: Option<Res<DispatchConfig>>,
    policy: Option<Res<ActivePolicy>>,
) -> bool {
    has_policy(&policy) && is_period_tick(clock, config.map(|c| c.dispatch_period))
}

fn is_rebalancing_tick(
    clock: Option<Res<DispatchClock>>,
    config: Option<Res<DispatchConfig>>,
    policy: Option<Res<ActivePolicy>>,
) -> bool {
    has_policy(&policy) && is_period_tick(clock, config.map(|c| c.rebalancing_period))
}

fn has_active_policy(policy: Option<Res<ActivePolicy>>) -> bool {
    has_policy(&policy)
}

/// Builds the per-tick schedule. Systems are chained: every step sees the
/// fleet and register exactly as the previous step left them.
pub fn dispatch_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems(
        (
            request_inbound_system,
            advance_fleet_system,
            resolve_directives_system,
            arrivals_system,
            fleet_size_system.run_if(is_fleet_size_tick),
            dispatch_system.run_if(is_dispatch_tick),
            rebalance_system.run_if(is_rebalancing_tick),
            policy_tick_system.run_if(has_active_policy),
            // Second pass so synchronous oracles commit this tick's directives.
            resolve_directives_system,
            consistency_check_system,
            capture_snapshot_system,
        )
            .chain(),
    );
    schedule
}

/// Runs one tick at host time `now`. Returns the first recoverable error a
/// system raised; the tick itself always runs to completion.
pub fn run_tick(world: &mut World, schedule: &mut Schedule, now: u64) -> DispatchResult<()> {
    let due = {
        let mut clock = world
            .get_resource_mut::<DispatchClock>()
            .ok_or_else(|| DispatchError::Fatal("world has no DispatchClock".into()))?;
        clock.begin_tick(now)
    };
    world
        .get_resource_or_insert_with(InboundRequests::default)
        .0
        .extend(due);
    world
        .get_resource_mut::<Fleet>()
        .ok_or_else(|| DispatchError::Fatal("world has no Fleet".into()))?
        .begin_tick();
    world.get_resource_or_insert_with(TickArrivals::default).0.clear();
    world.get_resource_or_insert_with(TickFaults::default).0.clear();

    schedule.run(world);

    let faults = std::mem::take(&mut world.resource_mut::<TickFaults>().0);
    match faults.into_iter().next() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Runs one tick and invokes `hook` after the schedule completes.
pub fn run_tick_with_hook<F>(world: &mut World, schedule: &mut Schedule, now: u64, mut hook: F) -> DispatchResult<()>
where
    F: FnMut(&World, u64),
{
    let result = run_tick(world, schedule, now);
    hook(world, now);
    result
}

/// Runs a tick at every time in `times`, stopping at the first error.
/// Returns the number of ticks executed.
pub fn run_ticks(
    world: &mut World,
    schedule: &mut Schedule,
    times: impl IntoIterator<Item = u64>,
) -> DispatchResult<usize> {
    run_ticks_with_hook(world, schedule, times, |_, _| {})
}

/// [`run_ticks`] with a hook invoked after each tick.
pub fn run_ticks_with_hook<F>(
    world: &mut World,
    schedule: &mut Schedule,
    times: impl IntoIterator<Item = u64>,
    mut hook: F,
) -> DispatchResult<usize>
where
    F: FnMut(&World, u64),
{
    let mut ticks = 0;
    for now in times {
        run_tick_with_hook(world, schedule, now, &mut hook)?;
        ticks += 1;
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DomainEvents;
    use crate::register::RequestRegister;
    use crate::routing::{RoutingOracleResource, StraightLineCalculator, SyncOracle};
    use crate::spatial::Location;
    use crate::telemetry::DispatchTelemetry;
    use crate::vehicle::{RoboTaxi, VehicleId};

    fn bare_world() -> World {
        let mut world = World::new();
        world.insert_resource(DispatchClock::default());
        world.insert_resource(DispatchConfig::default());
        world.insert_resource(RoutingOracleResource(Box::new(SyncOracle(
            StraightLineCalculator::new(10.0),
        ))));
        world.insert_resource(Fleet::new(
            vec![RoboTaxi::new(VehicleId(0), Location::new(0.0, 0.0), 4, 0.0)],
            10.0,
            10.0,
        ));
        world.insert_resource(RequestRegister::default());
        world.insert_resource(DomainEvents::default());
        world.insert_resource(DispatchTelemetry::default());
        world
    }

    #[test]
    fn ticks_run_without_a_policy() {
        let mut world = bare_world();
        let mut schedule = dispatch_schedule();
        let ticks = run_ticks(&mut world, &mut schedule, (0..50).step_by(10)).unwrap();
        assert_eq!(ticks, 5);
        assert_eq!(world.resource::<DispatchClock>().ticks(), 5);
        assert_eq!(world.resource::<DispatchTelemetry>().snapshots.len(), 5);
    }

    #[test]
    fn missing_clock_is_fatal() {
        let mut world = World::new();
        let mut schedule = dispatch_schedule();
        assert!(matches!(
            run_tick(&mut world, &mut schedule, 0),
            Err(DispatchError::Fatal(_))
        ));
    }

    #[test]
    fn hook_sees_every_tick() {
        let mut world = bare_world();
        let mut schedule = dispatch_schedule();
        let mut seen = Vec::new();
        run_ticks_with_hook(&mut world, &mut schedule, [1, 2, 3], |world, now| {
            seen.push((now, world.resource::<DispatchClock>().now()));
        })
        .unwrap();
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3)]);
    }
}
