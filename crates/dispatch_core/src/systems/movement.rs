use bevy_ecs::prelude::{Res, ResMut};
use tracing::debug;

use super::{TickArrivals, TickFaults};
use crate::clock::DispatchClock;
use crate::events::DomainEvents;
use crate::executor::{Arrival, Fleet};
use crate::register::RequestRegister;
use crate::routing::RoutingOracleResource;

/// Advance every task queue to the current time and collect customer stops reached.
pub fn advance_fleet_system(
    clock: Res<DispatchClock>,
    mut fleet: ResMut<Fleet>,
    mut arrivals: ResMut<TickArrivals>,
) {
    arrivals.0 = fleet.advance(clock.now());
    if !arrivals.0.is_empty() {
        debug!(t = clock.now(), count = arrivals.0.len(), "customer stops reached");
    }
}

/// Load passengers at their origin and unload them at their destination.
#[allow(clippy::too_many_arguments)]
pub fn arrivals_system(
    clock: Res<DispatchClock>,
    oracle: Res<RoutingOracleResource>,
    mut arrivals: ResMut<TickArrivals>,
    mut fleet: ResMut<Fleet>,
    mut register: ResMut<RequestRegister>,
    mut events: ResMut<DomainEvents>,
    mut faults: ResMut<TickFaults>,
) {
    let now = clock.now();
    let batch: Vec<Arrival> = arrivals.0.drain(..).collect();
    for err in register.handle_arrivals(&mut fleet, &**oracle, &mut events, batch, now) {
        faults.record("arrivals", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Request, RequestId, RequestStatus};
    use crate::routing::{StraightLineCalculator, SyncOracle};
    use crate::spatial::Location;
    use crate::vehicle::{RoboTaxi, VehicleId};
    use bevy_ecs::prelude::{IntoSystemConfigs, Schedule, World};

    #[test]
    fn arrival_at_origin_picks_the_customer_up() {
        let oracle = SyncOracle(StraightLineCalculator::new(10.0));
        let mut fleet = Fleet::new(
            vec![RoboTaxi::new(VehicleId(0), Location::new(0.0, 0.0), 4, 0.0)],
            10.0,
            10.0,
        );
        let mut register = RequestRegister::default();
        let mut events = DomainEvents::default();
        let request = Request::new(RequestId(1), Location::new(100.0, 0.0), Location::new(300.0, 0.0), 0);
        register.submit(&mut events, request, 0);
        register
            .assign(&mut fleet, &oracle, &mut events, VehicleId(0), RequestId(1), 0)
            .unwrap();
        fleet.resolve_directives(&oracle, 0);
        register.mark_departed(VehicleId(0), RequestId(1), 0).unwrap();
        fleet.begin_tick();

        let mut world = World::new();
        let mut clock = DispatchClock::default();
        clock.begin_tick(10);
        world.insert_resource(clock);
        world.insert_resource(RoutingOracleResource(Box::new(oracle)));
        world.insert_resource(fleet);
        world.insert_resource(register);
        world.insert_resource(events);
        world.insert_resource(TickArrivals::default());
        world.insert_resource(TickFaults::default());

        let mut schedule = Schedule::default();
        schedule.add_systems((advance_fleet_system, arrivals_system).chain());
        schedule.run(&mut world);

        assert!(world.resource::<TickFaults>().0.is_empty());
        assert_eq!(
            world.resource::<RequestRegister>().status(RequestId(1)),
            Some(RequestStatus::Driving)
        );
        assert!(world.resource::<TickArrivals>().0.is_empty());
    }
}
