mod support;

use dispatch_core::events::DomainEvent;
use dispatch_core::register::RequestRegister;
use dispatch_core::request::{RequestId, RequestStatus};
use dispatch_core::spatial::Location;
use dispatch_core::test_helpers::request;
use dispatch_core::vehicle::VehicleId;

use support::entities::{all_events, idle_fleet, request_status, status_trail};
use support::schedule::ScheduleRunner;
use support::world::TestWorldBuilder;

fn two_requests_one_vehicle() -> bevy_ecs::prelude::World {
    // Long trip so the single vehicle stays busy past the assignment limit.
    let origin = Location::new(100.0, 0.0);
    let destination = Location::new(5000.0, 0.0);
    TestWorldBuilder::new()
        .with_vehicles(idle_fleet(&[(0.0, 0.0)]))
        .with_requests(vec![
            request(1, origin, destination, 0),
            request(2, origin, destination, 0),
        ])
        .build()
}

#[test]
fn second_request_is_cancelled_after_the_assignment_limit() {
    let mut world = two_requests_one_vehicle();
    let mut runner = ScheduleRunner::new().with_step(10);
    runner.run_range(&mut world, 0, 0);

    let register = world.resource::<RequestRegister>();
    assert_eq!(register.assigned_count(), 1);
    let served = [RequestId(1), RequestId(2)]
        .into_iter()
        .find(|id| register.assigned_vehicle(*id) == Some(VehicleId(0)))
        .expect("one request assigned");
    let waiting = if served == RequestId(1) { 2 } else { 1 };
    assert_eq!(request_status(&world, waiting), Some(RequestStatus::Requested));

    // Age 300 is not yet expired; 310 is.
    runner.run_range(&mut world, 10, 300);
    assert_eq!(request_status(&world, waiting), Some(RequestStatus::Requested));
    runner.run_range(&mut world, 310, 310);
    assert_eq!(
        status_trail(&world, waiting),
        vec![RequestStatus::Requested, RequestStatus::Cancelled]
    );

    let cancelled: Vec<(u64, Option<VehicleId>)> = all_events(&world)
        .iter()
        .filter_map(|e| match e {
            DomainEvent::RequestCancelled { time, vehicle, .. } => Some((*time, *vehicle)),
            _ => None,
        })
        .collect();
    assert_eq!(cancelled, vec![(310, None)]);
    assert_ne!(request_status(&world, served.0), Some(RequestStatus::Cancelled));
}

#[test]
fn served_request_is_not_cancelled_by_the_waiting_limit() {
    let mut world = two_requests_one_vehicle();
    ScheduleRunner::new().with_step(10).run_range(&mut world, 0, 700);
    let statuses: Vec<_> = [1, 2].iter().map(|id| request_status(&world, *id)).collect();
    assert!(statuses.contains(&Some(RequestStatus::Dropoff)));
    assert!(statuses.contains(&Some(RequestStatus::Cancelled)));
}
