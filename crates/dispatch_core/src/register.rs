//! Request lifecycle register.
//!
//! Tracks every request, the pending set (submitted but not picked up), the
//! pickup register (request -> vehicle driving to it) and the onboard register.
//! Every mutation ends with [`RequestRegister::consistency_check`], which panics
//! when the register and the fleet disagree. A batch of arrivals is checked
//! once, after the whole batch.

use std::collections::{BTreeMap, BTreeSet};

use bevy_ecs::prelude::Resource;
use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult};
use crate::events::{DomainEvent, DomainEvents};
use crate::executor::{Arrival, DiversionOutcome, Fleet};
use crate::request::{Request, RequestId, RequestStatus};
use crate::routing::RoutingOracle;
use crate::vehicle::VehicleId;

#[derive(Debug, Clone)]
struct RequestRecord {
    request: Request,
    status: RequestStatus,
    history: Vec<(u64, RequestStatus)>,
}

impl RequestRecord {
    fn set_status(&mut self, status: RequestStatus, now: u64) -> DispatchResult<()> {
        if !self.status.can_transition_to(status) {
            return Err(DispatchError::InvalidTransition {
                request: self.request.id,
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.history.push((now, status));
        Ok(())
    }
}

#[derive(Debug, Default, Resource)]
pub struct RequestRegister {
    records: BTreeMap<RequestId, RequestRecord>,
    pending: BTreeSet<RequestId>,
    pickup: BTreeMap<RequestId, VehicleId>,
    onboard: BTreeMap<RequestId, VehicleId>,
}

impl RequestRegister {
    pub fn submit(&mut self, events: &mut DomainEvents, request: Request, now: u64) {
        let id = request.id;
        assert!(
            !self.records.contains_key(&id),
            "request {id} submitted twice"
        );
        self.records.insert(
            id,
            RequestRecord {
                request,
                status: RequestStatus::Requested,
                history: vec![(now, RequestStatus::Requested)],
            },
        );
        self.pending.insert(id);
        events.push(DomainEvent::RequestSubmitted {
            time: now,
            request: id,
        });
    }

    fn record(&self, id: RequestId) -> DispatchResult<&RequestRecord> {
        self.records.get(&id).ok_or(DispatchError::UnknownRequest(id))
    }

    fn record_mut(&mut self, id: RequestId) -> DispatchResult<&mut RequestRecord> {
        self.records
            .get_mut(&id)
            .ok_or(DispatchError::UnknownRequest(id))
    }

    /// Commit `vehicle` to `request`, revoking whatever either of them was paired with.
    pub fn assign(
        &mut self,
        fleet: &mut Fleet,
        oracle: &dyn RoutingOracle,
        events: &mut DomainEvents,
        vehicle: VehicleId,
        request: RequestId,
        now: u64,
    ) -> DispatchResult<DiversionOutcome> {
        let record = self.record(request)?;
        if !self.pending.contains(&request) {
            return Err(DispatchError::InvalidTransition {
                request,
                from: record.status,
                to: RequestStatus::Assigned,
            });
        }
        let origin = record.request.origin;
        let taxi = fleet.vehicle(vehicle)?;
        if taxi.has_passenger() || fleet.is_dirty(vehicle) {
            return Err(DispatchError::VehicleBusy(vehicle));
        }
        if self.pickup.get(&request) == Some(&vehicle) {
            return Ok(DiversionOutcome::Unchanged);
        }

        if let Some(previous) = self.pickup.remove(&request) {
            debug!(%request, %previous, %vehicle, "assignment moved to another vehicle");
            fleet.halt(previous, now)?;
        }
        if let Some(other) = self.assignment_of(vehicle) {
            self.pickup.remove(&other);
            self.record_mut(other)?
                .set_status(RequestStatus::Requested, now)?;
            debug!(request = %other, %vehicle, "request returned to the unassigned pool");
        }

        let outcome = fleet.issue_pickup(oracle, vehicle, request, origin, now)?;
        self.pickup.insert(request, vehicle);
        self.record_mut(request)?
            .set_status(RequestStatus::Assigned, now)?;
        events.push(DomainEvent::RequestAssigned {
            time: now,
            request,
            vehicle,
        });
        self.consistency_check(fleet);
        Ok(outcome)
    }

    /// The pickup drive of `request` has been committed to the vehicle's task queue.
    pub fn mark_departed(&mut self, vehicle: VehicleId, request: RequestId, now: u64) -> DispatchResult<()> {
        if self.pickup.get(&request) != Some(&vehicle) {
            debug!(%request, %vehicle, "departure for a request no longer assigned to this vehicle");
            return Ok(());
        }
        let record = self.record_mut(request)?;
        if record.status == RequestStatus::Assigned {
            record.set_status(RequestStatus::PickupDrive, now)?;
        }
        Ok(())
    }

    /// The vehicle reached the origin: load the passenger and start the trip.
    pub fn pickup(
        &mut self,
        fleet: &mut Fleet,
        oracle: &dyn RoutingOracle,
        events: &mut DomainEvents,
        vehicle: VehicleId,
        request: RequestId,
        now: u64,
    ) -> DispatchResult<()> {
        self.load(fleet, oracle, events, vehicle, request, now)?;
        self.consistency_check(fleet);
        Ok(())
    }

    /// The vehicle reached the destination and is unloading.
    pub fn dropoff(
        &mut self,
        fleet: &Fleet,
        events: &mut DomainEvents,
        vehicle: VehicleId,
        request: RequestId,
        now: u64,
    ) -> DispatchResult<()> {
        self.unload(fleet, events, vehicle, request, now)?;
        self.consistency_check(fleet);
        Ok(())
    }

    /// Process every customer stop reached by one fleet advance and check
    /// consistency once at the end.
    ///
    /// Advancing pops the finished pickup drive of every arriving vehicle, so a
    /// vehicle whose arrival comes later in the batch carries no task for its
    /// request until it is loaded. Failed stops are returned, not propagated.
    pub fn handle_arrivals(
        &mut self,
        fleet: &mut Fleet,
        oracle: &dyn RoutingOracle,
        events: &mut DomainEvents,
        arrivals: impl IntoIterator<Item = Arrival>,
        now: u64,
    ) -> Vec<DispatchError> {
        let mut errors = Vec::new();
        for arrival in arrivals {
            let result = match arrival {
                Arrival::AtPickup {
                    vehicle, request, ..
                } => self.load(fleet, oracle, events, vehicle, request, now),
                Arrival::AtDropoff {
                    vehicle, request, ..
                } => self.unload(fleet, events, vehicle, request, now),
            };
            if let Err(err) = result {
                errors.push(err);
            }
        }
        self.consistency_check(fleet);
        errors
    }

    fn load(
        &mut self,
        fleet: &mut Fleet,
        oracle: &dyn RoutingOracle,
        events: &mut DomainEvents,
        vehicle: VehicleId,
        request: RequestId,
        now: u64,
    ) -> DispatchResult<()> {
        let record = self.record(request)?;
        if self.pickup.get(&request) != Some(&vehicle) {
            return Err(DispatchError::InvalidTransition {
                request,
                from: record.status,
                to: RequestStatus::Driving,
            });
        }
        let (origin, destination) = (record.request.origin, record.request.destination);
        if !fleet
            .vehicle(vehicle)?
            .divertable_location(now as f64)
            .is_same_place(&origin)
        {
            return Err(DispatchError::NotAtLocation { vehicle, request });
        }

        fleet.begin_pickup(oracle, vehicle, request, destination, now)?;
        self.record_mut(request)?
            .set_status(RequestStatus::Driving, now)?;
        self.pending.remove(&request);
        self.pickup.remove(&request);
        self.onboard.insert(request, vehicle);
        events.push(DomainEvent::RequestPickedUp {
            time: now,
            request,
            vehicle,
        });
        Ok(())
    }

    fn unload(
        &mut self,
        fleet: &Fleet,
        events: &mut DomainEvents,
        vehicle: VehicleId,
        request: RequestId,
        now: u64,
    ) -> DispatchResult<()> {
        let record = self.record(request)?;
        if self.onboard.get(&request) != Some(&vehicle) {
            return Err(DispatchError::InvalidTransition {
                request,
                from: record.status,
                to: RequestStatus::Dropoff,
            });
        }
        if !fleet
            .vehicle(vehicle)?
            .divertable_location(now as f64)
            .is_same_place(&record.request.destination)
        {
            return Err(DispatchError::NotAtLocation { vehicle, request });
        }
        self.record_mut(request)?
            .set_status(RequestStatus::Dropoff, now)?;
        self.onboard.remove(&request);
        events.push(DomainEvent::RequestDroppedOff {
            time: now,
            request,
            vehicle,
        });
        Ok(())
    }

    /// Cancel a request that has not been dropped off. A vehicle serving it is
    /// stopped and left staying where it is.
    pub fn cancel(
        &mut self,
        fleet: &mut Fleet,
        events: &mut DomainEvents,
        request: RequestId,
        now: u64,
    ) -> DispatchResult<()> {
        self.record_mut(request)?
            .set_status(RequestStatus::Cancelled, now)?;
        self.pending.remove(&request);

        let vehicle = if let Some(vehicle) = self.pickup.remove(&request) {
            fleet.halt(vehicle, now)?;
            Some(vehicle)
        } else if let Some(vehicle) = self.onboard.remove(&request) {
            fleet.abort_trip(vehicle, now)?;
            Some(vehicle)
        } else {
            None
        };
        if let Some(vehicle) = vehicle {
            fleet.edit_menu(vehicle, |menu| menu.remove_request(request))?;
        }

        info!(%request, t = now, vehicle = ?vehicle, "request cancelled");
        events.push(DomainEvent::RequestCancelled {
            time: now,
            request,
            vehicle,
        });
        self.consistency_check(fleet);
        Ok(())
    }

    /// Cancel requests waiting longer than `max_waiting` and unassigned requests
    /// older than `max_assignment`. Returns the cancelled ids.
    pub fn cancel_expired(
        &mut self,
        fleet: &mut Fleet,
        events: &mut DomainEvents,
        now: u64,
        max_waiting: u64,
        max_assignment: u64,
    ) -> DispatchResult<Vec<RequestId>> {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| {
                let age = record.request.age(now);
                age > max_waiting
                    || (record.status == RequestStatus::Requested && age > max_assignment)
            })
            .map(|record| record.request.id)
            .collect();
        for request in &expired {
            self.cancel(fleet, events, *request, now)?;
        }
        Ok(expired)
    }

    /// Drop the pickup assignment held by `vehicle`; the request becomes unassigned.
    pub fn release_vehicle(&mut self, vehicle: VehicleId, now: u64) -> DispatchResult<Option<RequestId>> {
        let Some(request) = self.assignment_of(vehicle) else {
            return Ok(None);
        };
        self.pickup.remove(&request);
        self.record_mut(request)?
            .set_status(RequestStatus::Requested, now)?;
        Ok(Some(request))
    }

    /// Panics when the register disagrees with itself or with the fleet.
    pub fn consistency_check(&self, fleet: &Fleet) {
        assert!(
            self.pickup.len() <= self.pending.len(),
            "pickup register holds {} requests but only {} are pending",
            self.pickup.len(),
            self.pending.len()
        );
        let mut seen = BTreeSet::new();
        for (request, vehicle) in &self.pickup {
            assert!(
                seen.insert(*vehicle),
                "vehicle {vehicle} is registered for more than one pickup"
            );
            assert!(
                self.pending.contains(request),
                "assigned request {request} is not pending"
            );
            assert!(
                fleet.carries_request(*vehicle, *request),
                "vehicle {vehicle} is assigned to {request} but carries no matching task"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.records.get(&id).map(|r| &r.request)
    }

    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.records.get(&id).map(|r| r.status)
    }

    pub fn status_history(&self, id: RequestId) -> Option<&[(u64, RequestStatus)]> {
        self.records.get(&id).map(|r| r.history.as_slice())
    }

    pub fn assigned_vehicle(&self, id: RequestId) -> Option<VehicleId> {
        self.pickup.get(&id).copied()
    }

    pub fn onboard_vehicle(&self, id: RequestId) -> Option<VehicleId> {
        self.onboard.get(&id).copied()
    }

    pub fn assignment_of(&self, vehicle: VehicleId) -> Option<RequestId> {
        self.pickup
            .iter()
            .find(|(_, v)| **v == vehicle)
            .map(|(r, _)| *r)
    }

    /// Submitted and not yet picked up, oldest first.
    pub fn pending_requests(&self) -> Vec<&Request> {
        self.sorted(self.pending.iter().copied())
    }

    /// Pending and not assigned to any vehicle, oldest first.
    pub fn unassigned_requests(&self) -> Vec<&Request> {
        self.sorted(
            self.pending
                .iter()
                .copied()
                .filter(|id| !self.pickup.contains_key(id)),
        )
    }

    /// Requests currently assigned, with their vehicle.
    pub fn assignments(&self) -> impl Iterator<Item = (RequestId, VehicleId)> + '_ {
        self.pickup.iter().map(|(r, v)| (*r, *v))
    }

    fn sorted(&self, ids: impl Iterator<Item = RequestId>) -> Vec<&Request> {
        let mut requests: Vec<&Request> = ids
            .filter_map(|id| self.records.get(&id).map(|r| &r.request))
            .collect();
        requests.sort_by_key(|r| (r.submission_time, r.id));
        requests
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn assigned_count(&self) -> usize {
        self.pickup.len()
    }

    pub fn onboard_count(&self) -> usize {
        self.onboard.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{StraightLineCalculator, SyncOracle};
    use crate::spatial::Location;
    use crate::vehicle::{RoboTaxi, VehicleStatus};

    struct Harness {
        fleet: Fleet,
        register: RequestRegister,
        events: DomainEvents,
        oracle: SyncOracle<StraightLineCalculator>,
    }

    impl Harness {
        fn new(vehicles: &[(f64, f64)]) -> Self {
            let vehicles = vehicles
                .iter()
                .enumerate()
                .map(|(i, (x, y))| RoboTaxi::new(VehicleId(i), Location::new(*x, *y), 4, 0.0))
                .collect();
            Self {
                fleet: Fleet::new(vehicles, 0.0, 0.0),
                register: RequestRegister::default(),
                events: DomainEvents::default(),
                oracle: SyncOracle(StraightLineCalculator::new(10.0)),
            }
        }

        fn submit(&mut self, id: u64, origin: (f64, f64), destination: (f64, f64), now: u64) -> RequestId {
            let request = Request::new(
                RequestId(id),
                Location::new(origin.0, origin.1),
                Location::new(destination.0, destination.1),
                now,
            );
            self.register.submit(&mut self.events, request, now);
            RequestId(id)
        }

        fn assign(&mut self, vehicle: usize, request: RequestId, now: u64) -> DispatchResult<DiversionOutcome> {
            self.register.assign(
                &mut self.fleet,
                &self.oracle,
                &mut self.events,
                VehicleId(vehicle),
                request,
                now,
            )
        }
    }

    #[test]
    fn reassignment_revokes_the_previous_vehicle() {
        let mut h = Harness::new(&[(0.0, 0.0), (50.0, 0.0)]);
        let r = h.submit(1, (100.0, 0.0), (200.0, 0.0), 0);
        h.assign(0, r, 0).unwrap();
        h.fleet.resolve_directives(&h.oracle, 0);

        h.fleet.begin_tick();
        h.assign(1, r, 1).unwrap();
        assert_eq!(h.register.assigned_vehicle(r), Some(VehicleId(1)));
        assert_eq!(h.fleet.vehicle(VehicleId(0)).unwrap().status(), VehicleStatus::Stay);
        assert_eq!(h.register.assignments().count(), 1);
    }

    #[test]
    fn reassigning_a_vehicle_returns_its_old_request() {
        let mut h = Harness::new(&[(0.0, 0.0)]);
        let first = h.submit(1, (100.0, 0.0), (200.0, 0.0), 0);
        let second = h.submit(2, (0.0, 100.0), (0.0, 200.0), 0);
        h.assign(0, first, 0).unwrap();
        h.fleet.resolve_directives(&h.oracle, 0);
        h.fleet.begin_tick();
        h.assign(0, second, 1).unwrap();
        assert_eq!(h.register.status(first), Some(RequestStatus::Requested));
        assert_eq!(h.register.unassigned_requests()[0].id, first);
    }

    #[test]
    fn dirty_vehicle_cannot_be_assigned() {
        let mut h = Harness::new(&[(0.0, 0.0)]);
        let first = h.submit(1, (100.0, 0.0), (200.0, 0.0), 0);
        let second = h.submit(2, (0.0, 100.0), (0.0, 200.0), 0);
        h.assign(0, first, 0).unwrap();
        assert!(matches!(h.assign(0, second, 0), Err(DispatchError::VehicleBusy(_))));
    }

    #[test]
    fn pickup_requires_the_vehicle_at_the_origin() {
        let mut h = Harness::new(&[(0.0, 0.0)]);
        let r = h.submit(1, (100.0, 0.0), (200.0, 0.0), 0);
        h.assign(0, r, 0).unwrap();
        h.fleet.resolve_directives(&h.oracle, 0);
        let err = h
            .register
            .pickup(&mut h.fleet, &h.oracle, &mut h.events, VehicleId(0), r, 0)
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotAtLocation { .. }));
    }

    #[test]
    fn simultaneous_pickups_are_checked_after_the_batch() {
        let mut h = Harness::new(&[(0.0, 0.0), (0.0, 100.0)]);
        let first = h.submit(1, (100.0, 0.0), (300.0, 0.0), 0);
        let second = h.submit(2, (100.0, 100.0), (300.0, 100.0), 0);
        h.assign(0, first, 0).unwrap();
        h.assign(1, second, 0).unwrap();
        h.fleet.resolve_directives(&h.oracle, 0);

        h.fleet.begin_tick();
        let arrivals = h.fleet.advance(10);
        assert_eq!(arrivals.len(), 2);
        let errors = h
            .register
            .handle_arrivals(&mut h.fleet, &h.oracle, &mut h.events, arrivals, 10);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(h.register.status(first), Some(RequestStatus::Driving));
        assert_eq!(h.register.status(second), Some(RequestStatus::Driving));
        assert_eq!(h.register.onboard_vehicle(second), Some(VehicleId(1)));
        assert_eq!(h.register.assigned_count(), 0);
    }

    #[test]
    fn cancelling_an_assigned_request_frees_the_vehicle() {
        let mut h = Harness::new(&[(0.0, 0.0)]);
        let r = h.submit(1, (100.0, 0.0), (200.0, 0.0), 0);
        h.assign(0, r, 0).unwrap();
        h.register.cancel(&mut h.fleet, &mut h.events, r, 3).unwrap();
        assert_eq!(h.register.status(r), Some(RequestStatus::Cancelled));
        assert_eq!(h.register.pending_count(), 0);
        assert_eq!(h.fleet.vehicle(VehicleId(0)).unwrap().status(), VehicleStatus::Stay);
        assert!(matches!(
            h.events.iter().last(),
            Some(DomainEvent::RequestCancelled { vehicle: Some(VehicleId(0)), .. })
        ));
        assert!(h.register.cancel(&mut h.fleet, &mut h.events, r, 4).is_err());
    }

    #[test]
    fn expiry_uses_strict_age_limits() {
        let mut h = Harness::new(&[]);
        let r = h.submit(1, (0.0, 0.0), (1.0, 0.0), 0);
        let cancelled = h
            .register
            .cancel_expired(&mut h.fleet, &mut h.events, 300, 600, 300)
            .unwrap();
        assert!(cancelled.is_empty());
        let cancelled = h
            .register
            .cancel_expired(&mut h.fleet, &mut h.events, 301, 600, 300)
            .unwrap();
        assert_eq!(cancelled, vec![r]);
    }

    #[test]
    #[should_panic(expected = "submitted twice")]
    fn duplicate_submission_panics() {
        let mut h = Harness::new(&[]);
        h.submit(1, (0.0, 0.0), (1.0, 0.0), 0);
        h.submit(1, (0.0, 0.0), (1.0, 0.0), 0);
    }
}
