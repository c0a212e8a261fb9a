//! Systems that hand control to the active [`DispatchPolicy`](crate::policy::DispatchPolicy).

use bevy_ecs::prelude::{Res, ResMut};
use tracing::debug;

use super::TickFaults;
use crate::clock::DispatchClock;
use crate::events::DomainEvents;
use crate::executor::Fleet;
use crate::policy::{ActivePolicy, DispatchContext, DispatchRng};
use crate::register::RequestRegister;
use crate::routing::RoutingOracleResource;
use crate::scenario::DispatchConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyStep {
    Dispatch,
    Rebalance,
    Tick,
}

impl PolicyStep {
    fn label(self) -> &'static str {
        match self {
            PolicyStep::Dispatch => "dispatch",
            PolicyStep::Rebalance => "rebalance",
            PolicyStep::Tick => "policy_tick",
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_policy(
    step: PolicyStep,
    now: u64,
    policy: &mut ActivePolicy,
    fleet: &mut Fleet,
    register: &mut RequestRegister,
    events: &mut DomainEvents,
    config: &DispatchConfig,
    oracle: &RoutingOracleResource,
    rng: &mut DispatchRng,
    faults: &mut TickFaults,
) {
    let mut ctx = DispatchContext {
        fleet,
        register,
        events,
        config,
        oracle: &**oracle,
        now,
        rng: &mut rng.0,
    };
    let result = match step {
        PolicyStep::Dispatch => policy.0.dispatch(&mut ctx),
        PolicyStep::Rebalance => policy.0.rebalance(&mut ctx),
        PolicyStep::Tick => policy.0.on_tick(&mut ctx),
    };
    if let Err(err) = result {
        faults.record(step.label(), err);
    }
}

/// Cancel requests that waited too long, then let the policy match the rest.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_system(
    clock: Res<DispatchClock>,
    config: Res<DispatchConfig>,
    oracle: Res<RoutingOracleResource>,
    mut policy: ResMut<ActivePolicy>,
    mut fleet: ResMut<Fleet>,
    mut register: ResMut<RequestRegister>,
    mut events: ResMut<DomainEvents>,
    mut rng: ResMut<DispatchRng>,
    mut faults: ResMut<TickFaults>,
) {
    let now = clock.now();
    match register.cancel_expired(
        &mut fleet,
        &mut events,
        now,
        config.max_customer_waiting_time,
        config.max_customer_assignment_time,
    ) {
        Ok(cancelled) if !cancelled.is_empty() => {
            debug!(t = now, count = cancelled.len(), "expired requests cancelled");
        }
        Ok(_) => {}
        Err(err) => faults.record("cancel_expired", err),
    }
    run_policy(
        PolicyStep::Dispatch,
        now,
        &mut policy,
        &mut fleet,
        &mut register,
        &mut events,
        &config,
        &oracle,
        &mut rng,
        &mut faults,
    );
}

#[allow(clippy::too_many_arguments)]
pub fn rebalance_system(
    clock: Res<DispatchClock>,
    config: Res<DispatchConfig>,
    oracle: Res<RoutingOracleResource>,
    mut policy: ResMut<ActivePolicy>,
    mut fleet: ResMut<Fleet>,
    mut register: ResMut<RequestRegister>,
    mut events: ResMut<DomainEvents>,
    mut rng: ResMut<DispatchRng>,
    mut faults: ResMut<TickFaults>,
) {
    run_policy(
        PolicyStep::Rebalance,
        clock.now(),
        &mut policy,
        &mut fleet,
        &mut register,
        &mut events,
        &config,
        &oracle,
        &mut rng,
        &mut faults,
    );
}

/// Per-tick policy hook, after dispatching and rebalancing.
#[allow(clippy::too_many_arguments)]
pub fn policy_tick_system(
    clock: Res<DispatchClock>,
    config: Res<DispatchConfig>,
    oracle: Res<RoutingOracleResource>,
    mut policy: ResMut<ActivePolicy>,
    mut fleet: ResMut<Fleet>,
    mut register: ResMut<RequestRegister>,
    mut events: ResMut<DomainEvents>,
    mut rng: ResMut<DispatchRng>,
    mut faults: ResMut<TickFaults>,
) {
    run_policy(
        PolicyStep::Tick,
        clock.now(),
        &mut policy,
        &mut fleet,
        &mut register,
        &mut events,
        &config,
        &oracle,
        &mut rng,
        &mut faults,
    );
}
