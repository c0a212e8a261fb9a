use bevy_ecs::prelude::Res;

use crate::executor::Fleet;
use crate::register::RequestRegister;

/// Panics when the register and the fleet disagree at the end of the tick.
pub fn consistency_check_system(fleet: Res<Fleet>, register: Res<RequestRegister>) {
    register.consistency_check(&fleet);
}
