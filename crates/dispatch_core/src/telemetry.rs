//! Tick-end telemetry: immutable per-tick snapshots, host hooks and trip statistics.

use std::collections::VecDeque;

use bevy_ecs::prelude::Resource;
use rayon::prelude::*;
use serde::Serialize;

use crate::events::DomainEvent;
use crate::executor::Fleet;
use crate::register::RequestRegister;
use crate::vehicle::{VehicleId, VehicleStatus};

/// Vehicle count per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetStatus {
    pub stay: usize,
    pub drive_to_customer: usize,
    pub drive_with_customer: usize,
    pub rebalance: usize,
    pub off_service: usize,
}

impl FleetStatus {
    pub fn of(fleet: &Fleet) -> Self {
        let mut status = Self::default();
        for taxi in fleet.vehicles() {
            status.add(taxi.status());
        }
        status
    }

    pub fn add(&mut self, status: VehicleStatus) {
        match status {
            VehicleStatus::Stay => self.stay += 1,
            VehicleStatus::DriveToCustomer => self.drive_to_customer += 1,
            VehicleStatus::DriveWithCustomer => self.drive_with_customer += 1,
            VehicleStatus::Rebalance => self.rebalance += 1,
            VehicleStatus::OffService => self.off_service += 1,
        }
    }

    pub fn in_service(&self) -> usize {
        self.fleet_size() - self.off_service
    }

    pub fn fleet_size(&self) -> usize {
        self.stay + self.drive_to_customer + self.drive_with_customer + self.rebalance + self.off_service
    }
}

/// What the host sees at the end of a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSnapshot {
    pub now: u64,
    pub fleet: FleetStatus,
    pub pending: usize,
    pub assigned: usize,
    pub onboard: usize,
    pub events: Vec<DomainEvent>,
}

impl TickSnapshot {
    pub fn capture(now: u64, fleet: &Fleet, register: &RequestRegister, events: Vec<DomainEvent>) -> Self {
        Self {
            now,
            fleet: FleetStatus::of(fleet),
            pending: register.pending_count(),
            assigned: register.assigned_count(),
            onboard: register.onboard_count(),
            events,
        }
    }
}

pub type TickHook = Box<dyn FnMut(&TickSnapshot) + Send + Sync>;

/// Host callbacks run in registration order at the end of every tick.
#[derive(Default, Resource)]
pub struct TickHooks {
    hooks: Vec<TickHook>,
}

impl TickHooks {
    pub fn register<F>(&mut self, hook: F)
    where
        F: FnMut(&TickSnapshot) + Send + Sync + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run(&mut self, snapshot: &TickSnapshot) {
        for hook in &mut self.hooks {
            hook(snapshot);
        }
    }
}

/// Snapshot capture configuration.
#[derive(Debug, Clone, Copy, Resource)]
pub struct TelemetryConfig {
    pub max_snapshots: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 10_000,
        }
    }
}

/// Rolling snapshot buffer plus run totals.
#[derive(Debug, Default, Resource)]
pub struct DispatchTelemetry {
    pub snapshots: VecDeque<TickSnapshot>,
    pub submitted: usize,
    pub assigned: usize,
    pub picked_up: usize,
    pub dropped_off: usize,
    pub cancelled: usize,
    pub rebalances: usize,
}

impl DispatchTelemetry {
    pub fn record(&mut self, snapshot: TickSnapshot, max_snapshots: usize) {
        for event in &snapshot.events {
            match event {
                DomainEvent::RequestSubmitted { .. } => self.submitted += 1,
                DomainEvent::RequestAssigned { .. } => self.assigned += 1,
                DomainEvent::RequestPickedUp { .. } => self.picked_up += 1,
                DomainEvent::RequestDroppedOff { .. } => self.dropped_off += 1,
                DomainEvent::RequestCancelled { .. } => self.cancelled += 1,
                DomainEvent::RebalanceIssued { .. } => self.rebalances += 1,
                DomainEvent::VehicleSignedOn { .. } | DomainEvent::VehicleSignedOff { .. } => {}
            }
        }
        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > max_snapshots {
            self.snapshots.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&TickSnapshot> {
        self.snapshots.back()
    }

    /// Every event still held in the snapshot buffer, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &DomainEvent> {
        self.snapshots.iter().flat_map(|s| s.events.iter())
    }
}

/// Distance and trip counters of one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VehicleTripStats {
    pub vehicle: VehicleId,
    pub distance_empty_m: f64,
    pub distance_with_customer_m: f64,
    pub trips_served: u32,
}

impl VehicleTripStats {
    /// Share of driven distance with a customer on board.
    pub fn occupancy(&self) -> f64 {
        let total = self.distance_empty_m + self.distance_with_customer_m;
        if total > 0.0 {
            self.distance_with_customer_m / total
        } else {
            0.0
        }
    }
}

/// Per-vehicle statistics in id order.
pub fn vehicle_trip_stats(fleet: &Fleet) -> Vec<VehicleTripStats> {
    fleet
        .vehicles()
        .par_iter()
        .map(|taxi| {
            let ledger = taxi.ledger();
            VehicleTripStats {
                vehicle: taxi.id(),
                distance_empty_m: ledger.distance_empty_m,
                distance_with_customer_m: ledger.distance_with_customer_m,
                trips_served: ledger.trips_served,
            }
        })
        .collect()
}

/// Fleet-wide totals of [`vehicle_trip_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FleetTripTotals {
    pub distance_empty_m: f64,
    pub distance_with_customer_m: f64,
    pub trips_served: u64,
}

pub fn fleet_trip_totals(fleet: &Fleet) -> FleetTripTotals {
    vehicle_trip_stats(fleet)
        .par_iter()
        .map(|s| FleetTripTotals {
            distance_empty_m: s.distance_empty_m,
            distance_with_customer_m: s.distance_with_customer_m,
            trips_served: u64::from(s.trips_served),
        })
        .reduce(FleetTripTotals::default, |a, b| FleetTripTotals {
            distance_empty_m: a.distance_empty_m + b.distance_empty_m,
            distance_with_customer_m: a.distance_with_customer_m + b.distance_with_customer_m,
            trips_served: a.trips_served + b.trips_served,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestId;
    use crate::spatial::Location;
    use crate::vehicle::RoboTaxi;
    use std::sync::{Arc, Mutex};

    fn fleet() -> Fleet {
        Fleet::new(
            vec![
                RoboTaxi::new(VehicleId(0), Location::new(0.0, 0.0), 4, 0.0),
                RoboTaxi::new_off_service(VehicleId(1), Location::new(0.0, 0.0), 4, 0.0),
            ],
            10.0,
            10.0,
        )
    }

    #[test]
    fn fleet_status_counts_every_vehicle() {
        let status = FleetStatus::of(&fleet());
        assert_eq!(status.stay, 1);
        assert_eq!(status.off_service, 1);
        assert_eq!(status.in_service(), 1);
        assert_eq!(status.fleet_size(), 2);
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = TickHooks::default();
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hooks.register(move |snapshot: &TickSnapshot| {
                seen.lock().unwrap().push((tag, snapshot.now));
            });
        }
        let snapshot = TickSnapshot::capture(7, &fleet(), &RequestRegister::default(), Vec::new());
        hooks.run(&snapshot);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn history_is_bounded() {
        let mut telemetry = DispatchTelemetry::default();
        let fleet = fleet();
        let register = RequestRegister::default();
        for now in 0..5 {
            let events = vec![DomainEvent::RequestSubmitted {
                time: now,
                request: RequestId(now),
            }];
            telemetry.record(TickSnapshot::capture(now, &fleet, &register, events), 3);
        }
        assert_eq!(telemetry.snapshots.len(), 3);
        assert_eq!(telemetry.latest().map(|s| s.now), Some(4));
        assert_eq!(telemetry.submitted, 5);
        assert_eq!(telemetry.events().count(), 3);
    }

    #[test]
    fn trip_stats_start_at_zero() {
        let stats = vehicle_trip_stats(&fleet());
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].vehicle, VehicleId(1));
        assert_eq!(stats[0].occupancy(), 0.0);
        assert_eq!(fleet_trip_totals(&fleet()), FleetTripTotals::default());
    }
}
