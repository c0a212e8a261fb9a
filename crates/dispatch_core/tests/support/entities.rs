#![allow(dead_code)]

use bevy_ecs::prelude::World;
use dispatch_core::events::DomainEvent;
use dispatch_core::executor::Fleet;
use dispatch_core::register::RequestRegister;
use dispatch_core::request::{RequestId, RequestStatus};
use dispatch_core::spatial::Location;
use dispatch_core::telemetry::DispatchTelemetry;
use dispatch_core::test_helpers::vehicles_at;
use dispatch_core::vehicle::{RoboTaxi, VehicleId, VehicleStatus};

/// Idle in-service vehicles at the given coordinates.
pub fn idle_fleet(points: &[(f64, f64)]) -> Vec<RoboTaxi> {
    let points: Vec<Location> = points.iter().map(|(x, y)| Location::new(*x, *y)).collect();
    vehicles_at(&points)
}

/// `active` in-service vehicles followed by `off` off-service ones, all at the origin.
pub fn mixed_fleet(active: usize, off: usize) -> Vec<RoboTaxi> {
    (0..active + off)
        .map(|i| {
            let at = Location::new(i as f64 * 10.0, 0.0);
            if i < active {
                RoboTaxi::new(VehicleId(i), at, 4, 0.0)
            } else {
                RoboTaxi::new_off_service(VehicleId(i), at, 4, 0.0)
            }
        })
        .collect()
}

pub fn status_of(world: &World, vehicle: usize) -> VehicleStatus {
    world
        .resource::<Fleet>()
        .vehicle(VehicleId(vehicle))
        .expect("vehicle exists")
        .status()
}

pub fn request_status(world: &World, id: u64) -> Option<RequestStatus> {
    world.resource::<RequestRegister>().status(RequestId(id))
}

/// Status sequence of a request without timestamps.
pub fn status_trail(world: &World, id: u64) -> Vec<RequestStatus> {
    world
        .resource::<RequestRegister>()
        .status_history(RequestId(id))
        .map(|history| history.iter().map(|(_, status)| *status).collect())
        .unwrap_or_default()
}

/// Every event captured so far, oldest first.
pub fn all_events(world: &World) -> Vec<DomainEvent> {
    world.resource::<DispatchTelemetry>().events().cloned().collect()
}
