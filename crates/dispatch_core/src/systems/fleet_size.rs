use bevy_ecs::prelude::{Res, ResMut};

use super::TickFaults;
use crate::clock::DispatchClock;
use crate::events::DomainEvents;
use crate::executor::Fleet;
use crate::fleet_size::FleetSizeController;
use crate::register::RequestRegister;
use crate::routing::RoutingOracleResource;

/// Sign vehicles off or on to follow the fleet-size schedule.
pub fn fleet_size_system(
    clock: Res<DispatchClock>,
    oracle: Res<RoutingOracleResource>,
    controller: Res<FleetSizeController>,
    mut fleet: ResMut<Fleet>,
    mut register: ResMut<RequestRegister>,
    mut events: ResMut<DomainEvents>,
    mut faults: ResMut<TickFaults>,
) {
    if let Err(err) = controller.adjust(&mut fleet, &mut register, &mut events, &**oracle, clock.now()) {
        faults.record("fleet_size", err);
    }
}
