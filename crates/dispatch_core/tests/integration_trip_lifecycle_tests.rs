mod support;

use dispatch_core::events::DomainEvent;
use dispatch_core::executor::Fleet;
use dispatch_core::register::RequestRegister;
use dispatch_core::request::{RequestId, RequestStatus};
use dispatch_core::scenario::MatchingAlgorithmType;
use dispatch_core::spatial::Location;
use dispatch_core::test_helpers::{cell_centre, request, vehicles_at};
use dispatch_core::vehicle::{VehicleId, VehicleStatus};

use support::entities::{all_events, status_of, status_trail};
use support::schedule::ScheduleRunner;
use support::world::TestWorldBuilder;

fn one_ride(policy: &str, algorithm: MatchingAlgorithmType) -> bevy_ecs::prelude::World {
    // The request starts where the first vehicle stands.
    TestWorldBuilder::new()
        .with_policy(policy)
        .with_matching(algorithm)
        .with_vehicles(vehicles_at(&[cell_centre(0, 0), cell_centre(5, 5)]))
        .with_requests(vec![request(1, cell_centre(0, 0), cell_centre(1, 1), 0)])
        .build()
}

#[test]
fn nearest_vehicle_serves_the_request_end_to_end() {
    let mut world = one_ride("ntnr", MatchingAlgorithmType::NearestNeighbor);
    ScheduleRunner::new().run_range(&mut world, 0, 300);

    assert_eq!(
        status_trail(&world, 1),
        vec![
            RequestStatus::Requested,
            RequestStatus::Assigned,
            RequestStatus::PickupDrive,
            RequestStatus::Driving,
            RequestStatus::Dropoff,
        ]
    );

    let events = all_events(&world);
    let assigned_to = events.iter().find_map(|e| match e {
        DomainEvent::RequestAssigned { vehicle, .. } => Some(*vehicle),
        _ => None,
    });
    assert_eq!(assigned_to, Some(VehicleId(0)));

    let history = world
        .resource::<RequestRegister>()
        .status_history(RequestId(1))
        .expect("history")
        .to_vec();
    let picked_up_at = history
        .iter()
        .find(|(_, s)| *s == RequestStatus::Driving)
        .map(|(t, _)| *t)
        .expect("picked up");
    assert!(picked_up_at <= 540, "pickup within 90% of the waiting limit");

    assert_eq!(status_of(&world, 0), VehicleStatus::Stay);
    assert_eq!(status_of(&world, 1), VehicleStatus::Stay);
    let fleet = world.resource::<Fleet>();
    assert_eq!(fleet.vehicle(VehicleId(0)).unwrap().ledger().trips_served, 1);
    assert_eq!(fleet.vehicle(VehicleId(1)).unwrap().ledger().trips_served, 0);
}

#[test]
fn every_matcher_completes_the_same_ride() {
    for algorithm in [
        MatchingAlgorithmType::BipartiteHeuristic,
        MatchingAlgorithmType::BipartiteExact,
        MatchingAlgorithmType::NearestNeighbor,
    ] {
        let mut world = one_ride("bipartite", algorithm);
        ScheduleRunner::new().run_range(&mut world, 0, 300);
        let register = world.resource::<RequestRegister>();
        assert_eq!(register.status(RequestId(1)), Some(RequestStatus::Dropoff), "{algorithm:?}");
        assert_eq!(register.pending_count(), 0);
    }
}

#[test]
fn event_stream_follows_the_lifecycle_order() {
    let mut world = one_ride("bipartite", MatchingAlgorithmType::BipartiteHeuristic);
    ScheduleRunner::new().run_range(&mut world, 0, 300);

    let kinds: Vec<&str> = all_events(&world)
        .iter()
        .filter(|e| e.request() == Some(RequestId(1)))
        .map(|e| match e {
            DomainEvent::RequestSubmitted { .. } => "submitted",
            DomainEvent::RequestAssigned { .. } => "assigned",
            DomainEvent::RequestPickedUp { .. } => "picked_up",
            DomainEvent::RequestDroppedOff { .. } => "dropped_off",
            DomainEvent::RequestCancelled { .. } => "cancelled",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["submitted", "assigned", "picked_up", "dropped_off"]);

    let times: Vec<u64> = all_events(&world).iter().map(DomainEvent::time).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]), "events are emitted in time order");
}

#[test]
fn simultaneous_pickups_complete_both_rides() {
    // Both vehicles are 200 m from their customer and arrive in the same tick.
    let mut world = TestWorldBuilder::new()
        .with_policy("ntnr")
        .with_matching(MatchingAlgorithmType::NearestNeighbor)
        .with_vehicles(vehicles_at(&[Location::new(0.0, 0.0), Location::new(0.0, 3000.0)]))
        .with_requests(vec![
            request(1, Location::new(200.0, 0.0), Location::new(1200.0, 0.0), 0),
            request(2, Location::new(200.0, 3000.0), Location::new(1200.0, 3000.0), 0),
        ])
        .build();
    ScheduleRunner::new().run_range(&mut world, 0, 400);

    let events = all_events(&world);
    let pickup_times: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            DomainEvent::RequestPickedUp { time, .. } => Some(*time),
            _ => None,
        })
        .collect();
    assert_eq!(pickup_times.len(), 2);
    assert_eq!(pickup_times[0], pickup_times[1]);

    let register = world.resource::<RequestRegister>();
    assert_eq!(register.status(RequestId(1)), Some(RequestStatus::Dropoff));
    assert_eq!(register.status(RequestId(2)), Some(RequestStatus::Dropoff));
    assert_eq!(status_of(&world, 0), VehicleStatus::Stay);
    assert_eq!(status_of(&world, 1), VehicleStatus::Stay);
}
