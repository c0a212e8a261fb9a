mod support;

use dispatch_core::events::DomainEvent;
use dispatch_core::grid::Grid;
use dispatch_core::request::RequestId;
use dispatch_core::spatial::{BoundingBox, Location};
use dispatch_core::test_helpers::{constant_forecast, request};
use dispatch_core::vehicle::VehicleId;
use dispatch_core::zones::{DispatchingZones, RankId, TaxiRank, TaxiRanks};

use support::entities::{all_events, idle_fleet};
use support::schedule::ScheduleRunner;
use support::world::TestWorldBuilder;

fn two_zones() -> (Grid, DispatchingZones, TaxiRanks) {
    let grid = Grid::new(BoundingBox::new(0.0, 2000.0, 0.0, 1000.0), 1, 2).expect("grid");
    let zones = DispatchingZones::from_grid(&grid);
    let ranks = TaxiRanks::new(vec![
        TaxiRank::new(RankId(0), Location::new(100.0, 500.0), 2),
        TaxiRank::new(RankId(1), Location::new(1900.0, 500.0), 1),
    ])
    .expect("ranks");
    (grid, zones, ranks)
}

fn assignments(events: &[DomainEvent]) -> Vec<(RequestId, VehicleId)> {
    events
        .iter()
        .filter_map(|e| match e {
            DomainEvent::RequestAssigned {
                request, vehicle, ..
            } => Some((*request, *vehicle)),
            _ => None,
        })
        .collect()
}

fn reference_world(vehicles: &[(f64, f64)], origin: Location) -> bevy_ecs::prelude::World {
    let (grid, zones, ranks) = two_zones();
    TestWorldBuilder::new()
        .with_policy("reference")
        .with_grid(grid, constant_forecast(vec![vec![0.0], vec![0.0]], [0]))
        .with_ranks(ranks, zones)
        .with_requests(vec![request(1, origin, Location::new(1000.0, 900.0), 0)])
        .with_vehicles(idle_fleet(vehicles))
        .build()
}

#[test]
fn rank_taxi_in_the_origin_zone_beats_a_closer_cruiser() {
    // Vehicle 0 waits at the zone-0 rank, vehicle 1 cruises right next to the origin.
    let mut world = reference_world(&[(100.0, 500.0), (850.0, 500.0)], Location::new(800.0, 500.0));
    ScheduleRunner::new().run_range(&mut world, 0, 0);
    assert_eq!(assignments(&all_events(&world)), vec![(RequestId(1), VehicleId(0))]);
}

#[test]
fn cruising_taxi_in_the_zone_beats_an_adjacent_rank() {
    // Vehicle 0 waits at the zone-1 rank, vehicle 1 cruises in zone 0.
    let mut world = reference_world(&[(1900.0, 500.0), (300.0, 500.0)], Location::new(800.0, 500.0));
    ScheduleRunner::new().run_range(&mut world, 0, 0);
    assert_eq!(assignments(&all_events(&world)), vec![(RequestId(1), VehicleId(1))]);
}

#[test]
fn adjacent_zone_serves_when_the_origin_zone_is_empty() {
    let mut world = reference_world(&[(1900.0, 500.0)], Location::new(800.0, 500.0));
    ScheduleRunner::new().run_range(&mut world, 0, 0);
    assert_eq!(assignments(&all_events(&world)), vec![(RequestId(1), VehicleId(0))]);
}
