//! Fleet-size controller: keeps the number of in-service vehicles at the
//! scheduled target by signing vehicles off and back on.

use std::collections::BTreeMap;

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DispatchResult;
use crate::events::{DomainEvent, DomainEvents};
use crate::executor::{DiversionOutcome, Fleet};
use crate::register::RequestRegister;
use crate::routing::RoutingOracle;
use crate::vehicle::{VehicleId, VehicleStatus};

/// Target number of in-service vehicles over time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSizeSchedule {
    targets: BTreeMap<u64, usize>,
}

impl FleetSizeSchedule {
    /// Same target for the whole run.
    pub fn constant(target: usize) -> Self {
        Self::from_entries([(0, target)])
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (u64, usize)>) -> Self {
        Self {
            targets: entries.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, time: u64, target: usize) {
        self.targets.insert(time, target);
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Latest target set at or before `now`.
    pub fn target_at(&self, now: u64) -> Option<usize> {
        self.targets.range(..=now).next_back().map(|(_, t)| *t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjustmentReport {
    pub target: Option<usize>,
    pub active_before: usize,
    pub signed_off: Vec<VehicleId>,
    pub signed_on: Vec<VehicleId>,
}

#[derive(Debug, Default, Resource)]
pub struct FleetSizeController {
    schedule: FleetSizeSchedule,
}

impl FleetSizeController {
    pub fn new(schedule: FleetSizeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FleetSizeSchedule {
        &self.schedule
    }

    /// Move the in-service count toward the target in effect at `now`.
    ///
    /// Surplus vehicles are taken from the staying pool first, then from the
    /// remaining empty vehicles. Whatever cannot be retired now is retried on
    /// the next call.
    pub fn adjust(
        &self,
        fleet: &mut Fleet,
        register: &mut RequestRegister,
        events: &mut DomainEvents,
        oracle: &dyn RoutingOracle,
        now: u64,
    ) -> DispatchResult<AdjustmentReport> {
        let active_before = fleet.active_count();
        let mut report = AdjustmentReport {
            target: self.schedule.target_at(now),
            active_before,
            ..AdjustmentReport::default()
        };
        let Some(target) = report.target else {
            return Ok(report);
        };

        if active_before > target {
            let surplus = active_before - target;
            let staying = fleet.staying_vehicles();
            for vehicle in staying.into_iter().take(surplus) {
                if sign_off(fleet, register, events, oracle, vehicle, now)? {
                    report.signed_off.push(vehicle);
                }
            }
            let remaining = surplus - report.signed_off.len();
            if remaining > 0 {
                let empty = fleet.divertable_unassigned();
                for vehicle in empty.into_iter().take(remaining) {
                    if sign_off(fleet, register, events, oracle, vehicle, now)? {
                        report.signed_off.push(vehicle);
                    }
                }
            }
            if report.signed_off.len() < surplus {
                debug!(
                    t = now,
                    missing = surplus - report.signed_off.len(),
                    "not enough empty vehicles to retire; retrying next period"
                );
            }
        } else if active_before < target {
            let deficit = target - active_before;
            for vehicle in fleet.off_service_vehicles().into_iter().take(deficit) {
                let location = fleet.vehicle(vehicle)?.divertable_location(now as f64);
                let outcome = fleet.issue_diversion(oracle, vehicle, location, VehicleStatus::Stay, now)?;
                if matches!(outcome, DiversionOutcome::Issued { .. }) {
                    events.push(DomainEvent::VehicleSignedOn { time: now, vehicle });
                    report.signed_on.push(vehicle);
                }
            }
        }

        if !report.signed_off.is_empty() || !report.signed_on.is_empty() {
            info!(
                t = now,
                target,
                active = active_before,
                signed_off = report.signed_off.len(),
                signed_on = report.signed_on.len(),
                "fleet size adjusted"
            );
        }
        Ok(report)
    }
}

fn sign_off(
    fleet: &mut Fleet,
    register: &mut RequestRegister,
    events: &mut DomainEvents,
    oracle: &dyn RoutingOracle,
    vehicle: VehicleId,
    now: u64,
) -> DispatchResult<bool> {
    if let Some(request) = register.release_vehicle(vehicle, now)? {
        debug!(%vehicle, %request, "assignment released on sign-off");
    }
    let location = fleet.vehicle(vehicle)?.divertable_location(now as f64);
    let outcome = fleet.issue_diversion(oracle, vehicle, location, VehicleStatus::OffService, now)?;
    if matches!(outcome, DiversionOutcome::Issued { .. }) {
        events.push(DomainEvent::VehicleSignedOff { time: now, vehicle });
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{StraightLineCalculator, SyncOracle};
    use crate::spatial::Location;
    use crate::vehicle::RoboTaxi;

    fn fleet(active: usize, off: usize) -> Fleet {
        let vehicles = (0..active + off)
            .map(|i| {
                let at = Location::new(i as f64 * 100.0, 0.0);
                if i < active {
                    RoboTaxi::new(VehicleId(i), at, 4, 0.0)
                } else {
                    RoboTaxi::new_off_service(VehicleId(i), at, 4, 0.0)
                }
            })
            .collect();
        Fleet::new(vehicles, 15.0, 10.0)
    }

    #[test]
    fn schedule_uses_floor_lookup() {
        let schedule = FleetSizeSchedule::from_entries([(100, 10), (500, 7)]);
        assert_eq!(schedule.target_at(99), None);
        assert_eq!(schedule.target_at(100), Some(10));
        assert_eq!(schedule.target_at(499), Some(10));
        assert_eq!(schedule.target_at(10_000), Some(7));
        assert_eq!(FleetSizeSchedule::default().target_at(0), None);
    }

    #[test]
    fn empty_schedule_leaves_fleet_unchanged() {
        let oracle = SyncOracle(StraightLineCalculator::new(10.0));
        let mut fleet = fleet(3, 0);
        let mut register = RequestRegister::default();
        let mut events = DomainEvents::default();
        let report = FleetSizeController::default()
            .adjust(&mut fleet, &mut register, &mut events, &oracle, 0)
            .unwrap();
        assert_eq!(report.target, None);
        assert!(report.signed_off.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn surplus_is_signed_off_and_deficit_signed_on() {
        let oracle = SyncOracle(StraightLineCalculator::new(10.0));
        let mut fleet = fleet(4, 2);
        let mut register = RequestRegister::default();
        let mut events = DomainEvents::default();

        let down = FleetSizeController::new(FleetSizeSchedule::constant(2));
        let report = down
            .adjust(&mut fleet, &mut register, &mut events, &oracle, 0)
            .unwrap();
        assert_eq!(report.signed_off, vec![VehicleId(0), VehicleId(1)]);
        fleet.resolve_directives(&oracle, 0);
        assert_eq!(fleet.count_with_status(VehicleStatus::OffService), 4);

        fleet.begin_tick();
        let up = FleetSizeController::new(FleetSizeSchedule::constant(5));
        let report = up
            .adjust(&mut fleet, &mut register, &mut events, &oracle, 10)
            .unwrap();
        assert_eq!(report.active_before, 2);
        assert_eq!(report.signed_on.len(), 3);
        let kinds: Vec<_> = events
            .iter()
            .map(|e| matches!(e, DomainEvent::VehicleSignedOff { .. }))
            .collect();
        assert_eq!(kinds, vec![true, true, false, false, false]);
    }
}
