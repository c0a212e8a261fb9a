use bevy_ecs::prelude::{Res, ResMut};
use tracing::debug;

use super::TickFaults;
use crate::clock::DispatchClock;
use crate::executor::{DirectiveOutcome, Fleet};
use crate::register::RequestRegister;
use crate::routing::RoutingOracleResource;
use crate::task::DrivePurpose;

/// Commit every path lookup that has completed. A committed pickup drive moves
/// its request from Assigned to PickupDrive; a bypassed one hands the request
/// back to the unassigned pool.
pub fn resolve_directives_system(
    clock: Res<DispatchClock>,
    oracle: Res<RoutingOracleResource>,
    mut fleet: ResMut<Fleet>,
    mut register: ResMut<RequestRegister>,
    mut faults: ResMut<TickFaults>,
) {
    let now = clock.now();
    for outcome in fleet.resolve_directives(&**oracle, now) {
        let result = match outcome {
            DirectiveOutcome::Applied {
                vehicle,
                purpose: Some(DrivePurpose::ToCustomer(request)),
                ..
            } => register.mark_departed(vehicle, request, now),
            DirectiveOutcome::Bypassed {
                vehicle,
                purpose: DrivePurpose::ToCustomer(request),
            } if register.assigned_vehicle(request) == Some(vehicle)
                && !fleet.carries_request(vehicle, request) =>
            {
                debug!(%vehicle, %request, t = now, "pickup unreachable in service time; request released");
                register.release_vehicle(vehicle, now).map(|_| ())
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            faults.record("resolve_directives", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DomainEvents;
    use crate::request::{Request, RequestId, RequestStatus};
    use crate::routing::{StraightLineCalculator, SyncOracle};
    use crate::spatial::Location;
    use crate::vehicle::{RoboTaxi, VehicleId, VehicleStatus};
    use bevy_ecs::prelude::{Schedule, World};

    #[test]
    fn bypassed_pickup_returns_the_request_to_the_pool() {
        let oracle = SyncOracle(StraightLineCalculator::new(10.0));
        let taxi = RoboTaxi::new(VehicleId(0), Location::new(0.0, 0.0), 4, 0.0).with_service_end(50.0);
        let mut fleet = Fleet::new(vec![taxi], 10.0, 10.0);
        fleet.halt(VehicleId(0), 0).unwrap();
        let mut register = RequestRegister::default();
        let mut events = DomainEvents::default();
        let request = Request::new(RequestId(1), Location::new(1000.0, 0.0), Location::new(1200.0, 0.0), 0);
        register.submit(&mut events, request, 0);
        register
            .assign(&mut fleet, &oracle, &mut events, VehicleId(0), RequestId(1), 0)
            .unwrap();

        let mut world = World::new();
        let mut clock = DispatchClock::default();
        clock.begin_tick(0);
        world.insert_resource(clock);
        world.insert_resource(RoutingOracleResource(Box::new(oracle)));
        world.insert_resource(fleet);
        world.insert_resource(register);
        world.insert_resource(TickFaults::default());

        let mut schedule = Schedule::default();
        schedule.add_systems(resolve_directives_system);
        schedule.run(&mut world);

        assert!(world.resource::<TickFaults>().0.is_empty());
        let register = world.resource::<RequestRegister>();
        let fleet = world.resource::<Fleet>();
        assert_eq!(register.status(RequestId(1)), Some(RequestStatus::Requested));
        assert_eq!(register.assigned_vehicle(RequestId(1)), None);
        assert_eq!(fleet.vehicle(VehicleId(0)).unwrap().status(), VehicleStatus::Stay);
        register.consistency_check(fleet);
    }
}
