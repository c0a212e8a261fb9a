use bevy_ecs::prelude::{Res, ResMut};

use crate::clock::{DispatchClock, InboundRequests};
use crate::events::DomainEvents;
use crate::register::RequestRegister;

/// Submit every request handed over for this tick.
pub fn request_inbound_system(
    clock: Res<DispatchClock>,
    mut inbound: ResMut<InboundRequests>,
    mut register: ResMut<RequestRegister>,
    mut events: ResMut<DomainEvents>,
) {
    let now = clock.now();
    for request in inbound.0.drain(..) {
        register.submit(&mut events, request, now);
    }
}
