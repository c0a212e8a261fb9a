//! Vehicle directive executor.
//!
//! [`Fleet`] owns every [`RoboTaxi`] and is the only place their task queues
//! and statuses change. Dispatch decisions arrive as directives ("drive there
//! with this status"); the path is requested from the routing oracle and the
//! task queue is edited once the path resolves.
//!
//! Rules enforced here:
//! - one directive per vehicle per tick (dirty set, cleared by [`Fleet::begin_tick`]);
//! - a directive to the current destination with the current status is a no-op;
//! - resolutions addressed to an outdated vehicle version are discarded;
//! - the task queue never holds more than two tasks beyond the current one.

use std::collections::{BTreeMap, BTreeSet};

use bevy_ecs::prelude::Resource;
use tracing::{debug, trace};

use crate::error::{DispatchError, DispatchResult};
use crate::menu::{Course, SharedMenu};
use crate::request::RequestId;
use crate::routing::{Path, PathFuture, RoutingOracle};
use crate::spatial::Location;
use crate::task::{DrivePurpose, Task, TaskKind};
use crate::vehicle::{RoboTaxi, VehicleId, VehicleStatus};

/// Result of issuing a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiversionOutcome {
    /// A path lookup was started; it resolves through [`Fleet::resolve_directives`].
    Issued { version: u64 },
    /// Same destination and status as already commanded. Nothing changed.
    Unchanged,
}

/// What happened to a resolved directive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DirectiveOutcome {
    Applied {
        vehicle: VehicleId,
        status: VehicleStatus,
        purpose: Option<DrivePurpose>,
        arrival: f64,
    },
    /// The new path would not arrive before the current schedule ends. The
    /// vehicle keeps its committed status and destination.
    Bypassed {
        vehicle: VehicleId,
        purpose: DrivePurpose,
    },
    /// Superseded by a halt or a newer directive before it resolved.
    Stale { vehicle: VehicleId },
}

/// A vehicle reached a customer stop while its queue advanced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arrival {
    AtPickup {
        vehicle: VehicleId,
        request: RequestId,
        time: f64,
    },
    AtDropoff {
        vehicle: VehicleId,
        request: RequestId,
        time: f64,
    },
}

#[derive(Debug)]
struct PendingDirective {
    version: u64,
    destination: Location,
    status: VehicleStatus,
    purpose: DrivePurpose,
    future: PathFuture,
    /// Status and destination backed by the task queue when the directive was issued.
    committed: (VehicleStatus, Location),
}

#[derive(Debug, Resource)]
pub struct Fleet {
    vehicles: Vec<RoboTaxi>,
    pending: BTreeMap<VehicleId, PendingDirective>,
    dirty: BTreeSet<VehicleId>,
    pickup_duration: f64,
    dropoff_duration: f64,
}

impl Fleet {
    /// Vehicles must be indexed densely: `vehicles[i].id() == VehicleId(i)`.
    pub fn new(vehicles: Vec<RoboTaxi>, pickup_duration: f64, dropoff_duration: f64) -> Self {
        for (index, taxi) in vehicles.iter().enumerate() {
            assert_eq!(
                taxi.id,
                VehicleId(index),
                "vehicle ids must be dense and ordered"
            );
        }
        Self {
            vehicles,
            pending: BTreeMap::new(),
            dirty: BTreeSet::new(),
            pickup_duration,
            dropoff_duration,
        }
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn vehicles(&self) -> &[RoboTaxi] {
        &self.vehicles
    }

    pub fn vehicle(&self, id: VehicleId) -> DispatchResult<&RoboTaxi> {
        self.vehicles
            .get(id.0)
            .ok_or(DispatchError::UnknownVehicle(id))
    }

    fn vehicle_mut(&mut self, id: VehicleId) -> DispatchResult<&mut RoboTaxi> {
        self.vehicles
            .get_mut(id.0)
            .ok_or(DispatchError::UnknownVehicle(id))
    }

    /// Clear the per-tick dirty set.
    pub fn begin_tick(&mut self) {
        self.dirty.clear();
    }

    pub fn is_dirty(&self, id: VehicleId) -> bool {
        self.dirty.contains(&id)
    }

    /// A directive for the vehicle's current version is still waiting for its path.
    pub fn has_pending(&self, id: VehicleId) -> bool {
        match (self.pending.get(&id), self.vehicles.get(id.0)) {
            (Some(directive), Some(taxi)) => directive.version == taxi.version,
            _ => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.vehicles
            .iter()
            .filter(|taxi| self.has_pending(taxi.id))
            .count()
    }

    // -----------------------------------------------------------------------
    // Directives
    // -----------------------------------------------------------------------

    /// Send an empty vehicle to `destination` with status `status`
    /// (`Stay`, `Rebalance` or `OffService`). Pickup drives go through
    /// [`Fleet::issue_pickup`].
    pub fn issue_diversion(
        &mut self,
        oracle: &dyn RoutingOracle,
        vehicle: VehicleId,
        destination: Location,
        status: VehicleStatus,
        now: u64,
    ) -> DispatchResult<DiversionOutcome> {
        assert!(
            !matches!(
                status,
                VehicleStatus::DriveToCustomer | VehicleStatus::DriveWithCustomer
            ),
            "customer drives are issued through issue_pickup or apply_menu"
        );
        let purpose = match status {
            VehicleStatus::Rebalance => DrivePurpose::Rebalance,
            _ => DrivePurpose::Reposition,
        };
        self.divert(oracle, vehicle, destination, status, purpose, now, false)
    }

    /// Send an empty vehicle to the origin of `request`.
    pub fn issue_pickup(
        &mut self,
        oracle: &dyn RoutingOracle,
        vehicle: VehicleId,
        request: RequestId,
        origin: Location,
        now: u64,
    ) -> DispatchResult<DiversionOutcome> {
        self.divert(
            oracle,
            vehicle,
            origin,
            VehicleStatus::DriveToCustomer,
            DrivePurpose::ToCustomer(request),
            now,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn divert(
        &mut self,
        oracle: &dyn RoutingOracle,
        vehicle: VehicleId,
        destination: Location,
        status: VehicleStatus,
        purpose: DrivePurpose,
        now: u64,
        allow_passenger: bool,
    ) -> DispatchResult<DiversionOutcome> {
        let taxi = self.vehicle(vehicle)?;
        if taxi.has_passenger() && !allow_passenger {
            return Err(DispatchError::VehicleBusy(vehicle));
        }
        assert!(
            self.dirty.insert(vehicle),
            "vehicle {vehicle} received a second directive at t={now}"
        );

        let taxi = self.vehicle(vehicle)?;
        let same_purpose = match self.pending.get(&vehicle) {
            Some(directive) if directive.version == taxi.version => directive.purpose == purpose,
            _ => taxi
                .tasks
                .iter()
                .filter_map(Task::drive_purpose)
                .last()
                .map_or(true, |current| current == purpose),
        };
        if status == taxi.status && same_purpose && destination.is_same_place(&taxi.drive_destination)
        {
            trace!(%vehicle, ?status, "diversion to current destination ignored");
            return Ok(DiversionOutcome::Unchanged);
        }

        let committed = match self.pending.get(&vehicle) {
            Some(directive) if directive.version == taxi.version => directive.committed,
            _ => (taxi.status, taxi.drive_destination),
        };
        let (from, start) = taxi.tasks.divertable_point(now as f64);
        let future = oracle.compute_path(from, destination, start);

        let taxi = self.vehicle_mut(vehicle)?;
        taxi.version += 1;
        taxi.status = status;
        taxi.drive_destination = destination;
        let version = taxi.version;
        self.pending.insert(
            vehicle,
            PendingDirective {
                version,
                destination,
                status,
                purpose,
                future,
                committed,
            },
        );
        trace!(%vehicle, ?status, version, "diversion issued");
        Ok(DiversionOutcome::Issued { version })
    }

    /// Poll outstanding path lookups and commit the resolved ones.
    pub fn resolve_directives(&mut self, oracle: &dyn RoutingOracle, now: u64) -> Vec<DirectiveOutcome> {
        let now = now as f64;
        let mut resolved = Vec::new();
        for (vehicle, directive) in self.pending.iter_mut() {
            if let Some(path) = directive.future.poll() {
                resolved.push((*vehicle, path));
            }
        }

        let mut outcomes = Vec::with_capacity(resolved.len());
        for (vehicle, path) in resolved {
            let Some(directive) = self.pending.remove(&vehicle) else {
                continue;
            };
            let Some(taxi) = self.vehicles.get_mut(vehicle.0) else {
                continue;
            };
            if directive.version != taxi.version {
                debug!(%vehicle, version = directive.version, current = taxi.version, "stale path resolution discarded");
                outcomes.push(DirectiveOutcome::Stale { vehicle });
                continue;
            }
            if path.arrival.is_nan() || path.arrival >= taxi.tasks.end_time() {
                debug!(%vehicle, arrival = path.arrival, end = taxi.tasks.end_time(), "diversion bypassed: no earlier arrival");
                (taxi.status, taxi.drive_destination) = directive.committed;
                outcomes.push(DirectiveOutcome::Bypassed {
                    vehicle,
                    purpose: directive.purpose,
                });
                continue;
            }
            let purpose = directive.purpose;
            let arrival = apply_directive(taxi, oracle, directive, path, now, self.dropoff_duration);
            outcomes.push(DirectiveOutcome::Applied {
                vehicle,
                status: taxi.status,
                purpose: Some(purpose),
                arrival,
            });
        }
        outcomes
    }

    /// Stop the vehicle at its divertable point and leave it staying there.
    /// Supersedes any pending directive. Not counted as a diversion.
    pub fn halt(&mut self, vehicle: VehicleId, now: u64) -> DispatchResult<()> {
        if self.vehicle(vehicle)?.has_passenger() {
            return Err(DispatchError::VehicleBusy(vehicle));
        }
        self.stop(vehicle, now)
    }

    /// [`Fleet::halt`] for a vehicle whose passenger trip is being cancelled.
    pub fn abort_trip(&mut self, vehicle: VehicleId, now: u64) -> DispatchResult<()> {
        self.stop(vehicle, now)?;
        let taxi = self.vehicle_mut(vehicle)?;
        taxi.onboard = 0;
        taxi.menu = SharedMenu::default();
        Ok(())
    }

    fn stop(&mut self, vehicle: VehicleId, now: u64) -> DispatchResult<()> {
        let taxi = self.vehicle_mut(vehicle)?;
        taxi.version += 1;
        let (location, time) = taxi.tasks.truncate_at(now as f64);
        taxi.tasks.append(Task::stay(location, time, taxi.service_end));
        taxi.status = VehicleStatus::Stay;
        taxi.drive_destination = location;
        taxi.tasks.assert_well_formed();
        debug!(%vehicle, t = now, "vehicle halted");
        Ok(())
    }

    /// Start loading `request` at the vehicle's position and queue the drive to
    /// `destination`. The vehicle must be standing; the path is computed inline.
    pub fn begin_pickup(
        &mut self,
        oracle: &dyn RoutingOracle,
        vehicle: VehicleId,
        request: RequestId,
        destination: Location,
        now: u64,
    ) -> DispatchResult<()> {
        let pickup_duration = self.pickup_duration;
        let taxi = self.vehicle_mut(vehicle)?;
        if !taxi.is_standing() {
            return Err(DispatchError::VehicleBusy(vehicle));
        }
        taxi.version += 1;
        let (location, time) = taxi.tasks.truncate_at(now as f64);
        taxi.tasks
            .append(Task::pickup(location, request, time, pickup_duration));
        let departure = time + pickup_duration;
        let path = oracle.compute_path_now(location, destination, departure);
        taxi.tasks
            .append(Task::drive(path, DrivePurpose::WithCustomer(request)));
        taxi.status = VehicleStatus::DriveWithCustomer;
        taxi.onboard += 1;
        taxi.drive_destination = destination;
        taxi.tasks.assert_well_formed();
        Ok(())
    }

    /// Re-derive status from the menu head and drive to the head course.
    pub fn apply_menu(
        &mut self,
        oracle: &dyn RoutingOracle,
        vehicle: VehicleId,
        now: u64,
    ) -> DispatchResult<DiversionOutcome> {
        let taxi = self.vehicle(vehicle)?;
        let status = taxi.menu.derived_status(taxi.onboard);
        let (destination, purpose) = match taxi.menu.head() {
            Some(Course::Pickup { request, at }) => (*at, DrivePurpose::ToCustomer(*request)),
            Some(Course::Dropoff { request, at }) => (*at, DrivePurpose::WithCustomer(*request)),
            Some(Course::Redirect { to }) => (*to, DrivePurpose::Rebalance),
            None => (taxi.divertable_location(now as f64), DrivePurpose::Reposition),
        };
        self.divert(oracle, vehicle, destination, status, purpose, now, true)
    }

    /// Edit a vehicle's shared menu. Menu invariants are checked by the menu itself.
    pub fn edit_menu<R>(
        &mut self,
        vehicle: VehicleId,
        edit: impl FnOnce(&mut SharedMenu) -> R,
    ) -> DispatchResult<R> {
        let taxi = self.vehicle_mut(vehicle)?;
        Ok(edit(&mut taxi.menu))
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Complete every task that ended by `now`, extend customer trips lazily and
    /// report customer stops reached.
    pub fn advance(&mut self, now: u64) -> Vec<Arrival> {
        let now = now as f64;
        let dropoff_duration = self.dropoff_duration;
        let mut arrivals = Vec::new();
        for taxi in &mut self.vehicles {
            let has_pending = self
                .pending
                .get(&taxi.id)
                .is_some_and(|d| d.version == taxi.version);
            loop {
                for task in taxi.tasks.advance(now) {
                    finish_task(taxi, &task, has_pending, &mut arrivals);
                }
                if !extend_trip(taxi, dropoff_duration) {
                    break;
                }
            }
            taxi.tasks.assert_well_formed();
        }
        arrivals
    }

    // -----------------------------------------------------------------------
    // Pools
    // -----------------------------------------------------------------------

    /// Idle vehicles: status `Stay`, no directive pending or issued this tick.
    pub fn staying_vehicles(&self) -> Vec<VehicleId> {
        self.vehicles
            .iter()
            .filter(|t| {
                t.status == VehicleStatus::Stay && !self.has_pending(t.id) && !self.is_dirty(t.id)
            })
            .map(|t| t.id)
            .collect()
    }

    /// Empty in-service vehicles (`Stay` or `Rebalance`) not touched this tick.
    pub fn divertable_unassigned(&self) -> Vec<VehicleId> {
        self.vehicles
            .iter()
            .filter(|t| t.status.is_unassigned() && !t.has_passenger() && !self.is_dirty(t.id))
            .map(|t| t.id)
            .collect()
    }

    pub fn off_service_vehicles(&self) -> Vec<VehicleId> {
        self.vehicles
            .iter()
            .filter(|t| t.status == VehicleStatus::OffService && !self.is_dirty(t.id))
            .map(|t| t.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.vehicles
            .iter()
            .filter(|t| t.status.is_in_service())
            .count()
    }

    pub fn count_with_status(&self, status: VehicleStatus) -> usize {
        self.vehicles.iter().filter(|t| t.status == status).count()
    }

    /// Whether the vehicle is visibly working on the pickup of `request`:
    /// a queued task, a pending directive or a menu course.
    pub fn carries_request(&self, vehicle: VehicleId, request: RequestId) -> bool {
        let Some(taxi) = self.vehicles.get(vehicle.0) else {
            return false;
        };
        let in_tasks = taxi.tasks.iter().any(|task| match &task.kind {
            TaskKind::Pickup { request: r, .. } => *r == request,
            TaskKind::Drive {
                purpose: DrivePurpose::ToCustomer(r),
                ..
            } => *r == request,
            _ => false,
        });
        let in_directive = self.pending.get(&vehicle).is_some_and(|d| {
            d.version == taxi.version && d.purpose == DrivePurpose::ToCustomer(request)
        });
        in_tasks || in_directive || taxi.menu.contains_request(request)
    }

    /// Time the vehicle becomes empty again, if it is serving a customer.
    pub fn planned_free_time(&self, vehicle: VehicleId) -> Option<(Location, f64)> {
        let taxi = self.vehicles.get(vehicle.0)?;
        if !matches!(
            taxi.status,
            VehicleStatus::DriveToCustomer | VehicleStatus::DriveWithCustomer
        ) {
            return None;
        }
        let last = taxi.tasks.iter().rev().find(|task| !task.is_open())?;
        Some((last.end_location(), last.end))
    }

    /// Where and when a moving vehicle (customer or rebalancing drive) ends its
    /// scheduled work.
    pub fn planned_arrival(&self, vehicle: VehicleId) -> Option<(Location, f64)> {
        let taxi = self.vehicles.get(vehicle.0)?;
        if taxi.status == VehicleStatus::Rebalance {
            let last = taxi.tasks.iter().rev().find(|task| !task.is_open())?;
            return Some((last.end_location(), last.end));
        }
        self.planned_free_time(vehicle)
    }
}

fn apply_directive(
    taxi: &mut RoboTaxi,
    oracle: &dyn RoutingOracle,
    directive: PendingDirective,
    path: Path,
    now: f64,
    dropoff_duration: f64,
) -> f64 {
    let (location, time) = taxi.tasks.truncate_at(now);
    let path = if !path.origin.is_same_place(&location) {
        oracle.compute_path_now(location, directive.destination, time)
    } else if path.departure < time {
        path.retimed(time)
    } else {
        path
    };
    let arrival = path.arrival;
    let destination = path.destination();
    let service_end = taxi.service_end;

    match directive.status {
        VehicleStatus::Stay | VehicleStatus::OffService => {
            if path.distance_m > 0.0 {
                taxi.tasks.append(Task::drive(path, directive.purpose));
            }
            let begin = taxi.tasks.end_time();
            let task = if directive.status == VehicleStatus::OffService {
                Task::off_service(destination, begin, service_end)
            } else {
                Task::stay(destination, begin, service_end)
            };
            taxi.tasks.append(task);
        }
        VehicleStatus::DriveWithCustomer => {
            taxi.tasks.append(Task::drive(path, directive.purpose));
            if let DrivePurpose::WithCustomer(request) = directive.purpose {
                taxi.tasks
                    .append(Task::dropoff(destination, request, arrival, dropoff_duration));
            }
        }
        VehicleStatus::DriveToCustomer | VehicleStatus::Rebalance => {
            taxi.tasks.append(Task::drive(path, directive.purpose));
            taxi.tasks
                .append(Task::stay(destination, arrival, service_end));
        }
    }
    taxi.tasks.assert_well_formed();
    arrival
}

fn finish_task(taxi: &mut RoboTaxi, task: &Task, has_pending: bool, arrivals: &mut Vec<Arrival>) {
    match &task.kind {
        TaskKind::Drive { path, purpose } => {
            let time = task.end;
            match purpose {
                DrivePurpose::WithCustomer(request) => {
                    taxi.ledger.distance_with_customer_m += path.distance_m;
                    arrivals.push(Arrival::AtDropoff {
                        vehicle: taxi.id,
                        request: *request,
                        time,
                    });
                }
                DrivePurpose::ToCustomer(request) => {
                    taxi.ledger.distance_empty_m += path.distance_m;
                    arrivals.push(Arrival::AtPickup {
                        vehicle: taxi.id,
                        request: *request,
                        time,
                    });
                }
                DrivePurpose::Rebalance => {
                    taxi.ledger.distance_empty_m += path.distance_m;
                    if taxi.status == VehicleStatus::Rebalance && !has_pending {
                        taxi.status = VehicleStatus::Stay;
                    }
                }
                DrivePurpose::Reposition => {
                    taxi.ledger.distance_empty_m += path.distance_m;
                }
            }
        }
        TaskKind::Dropoff { .. } => {
            taxi.ledger.trips_served += 1;
            taxi.onboard = taxi.onboard.saturating_sub(1);
            if taxi.onboard == 0 && taxi.status == VehicleStatus::DriveWithCustomer && !has_pending {
                taxi.status = VehicleStatus::Stay;
                taxi.drive_destination = task.end_location();
            }
        }
        TaskKind::Stay { .. } | TaskKind::OffServiceStay { .. } | TaskKind::Pickup { .. } => {}
    }
}

/// Append the next step of a customer trip once the previous one starts.
fn extend_trip(taxi: &mut RoboTaxi, dropoff_duration: f64) -> bool {
    if taxi.tasks.lookahead() > 0 {
        return false;
    }
    let current = taxi.tasks.current();
    let next = match &current.kind {
        TaskKind::Drive {
            path,
            purpose: DrivePurpose::WithCustomer(request),
        } => Task::dropoff(path.destination(), *request, current.end, dropoff_duration),
        TaskKind::Dropoff { location, .. } => Task::stay(*location, current.end, taxi.service_end),
        _ => return false,
    };
    taxi.tasks.append(next);
    true
}
