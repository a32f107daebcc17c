//! End-to-end trip planning: meetpoint, sequential route legs and the rendered
//! timeline, against in-memory services.

mod common;

use std::sync::Arc;

use common::{
    friend, init_logging, meetpoint_body, route_with_duration, FakeFriends, FakeMeetpoints,
    FakeRoutes,
};
use rendezvous_planner::{
    AppState, FriendTransport, LatLng, PlannerConfig, PlannerError, RouteResponse, ScheduleError,
    ScheduleMode, Stage, TransportMode, TripPlanner,
};
use serde_json::json;

const NOW: i64 = 1_700_000_000_000;
const MEETPOINT: LatLng = LatLng { lat: 55.05, lng: 37.05 };
const DESTINATION: LatLng = LatLng { lat: 56.0, lng: 38.0 };
const ANNA: LatLng = LatLng { lat: 55.1, lng: 37.1 };

/// Friend legs take 600 s, the destination leg 1200 s, everything else 900 s.
fn scripted_routes() -> Arc<FakeRoutes> {
    FakeRoutes::new(|request| {
        Ok(if request.start == ANNA && request.destination == MEETPOINT {
            route_with_duration(600.0)
        } else if request.destination == DESTINATION {
            route_with_duration(1200.0)
        } else {
            route_with_duration(900.0)
        })
    })
}

fn planner_with(routes: Arc<FakeRoutes>, friends: Arc<FakeFriends>) -> TripPlanner {
    let meetpoints = FakeMeetpoints::always(Ok(meetpoint_body(MEETPOINT.lat, MEETPOINT.lng)));
    TripPlanner::new(PlannerConfig::default(), meetpoints, routes, friends)
}

async fn loaded_state(planner: &TripPlanner) -> AppState {
    let mut state = planner.new_state();
    state.set_start(LatLng::new(55.0, 37.0), "Home");
    planner.load_friends(&mut state).await.unwrap();
    state
}

#[tokio::test]
async fn friend_departure_is_aligned_with_meetpoint_arrival() {
    init_logging();
    let friends = FakeFriends::new(vec![friend(1, "Anna", ANNA.lat, ANNA.lng, "car")]);
    let mut planner = planner_with(scripted_routes(), friends);
    let mut state = loaded_state(&planner).await;
    state.set_destination(DESTINATION, "Office");

    let data = planner.build_route(&mut state).await.unwrap();
    assert!(data.ready);
    assert_eq!(data.stages(), vec![Stage::Z, Stage::Stop, Stage::D]);
    assert_eq!(data.target_source.as_deref(), Some("find_meetpoint"));
    assert_eq!(data.meetpoint_method.as_deref(), Some("minisum"));

    let entries = planner.render(ScheduleMode::DepartNow, NOW).unwrap();
    let anna = entries.iter().find(|e| e.title == "Anna").unwrap();
    assert_eq!(anna.time_ms, NOW + 300_000);
    let arrival = entries.iter().find(|e| e.title == "Arrival at point B").unwrap();
    assert_eq!(arrival.time_ms, NOW + (900 + 180 + 1200) * 1000);
    assert!(entries.windows(2).all(|w| w[0].time_ms <= w[1].time_ms));
    assert_eq!(state.target_z, Some(MEETPOINT));
}

#[tokio::test]
async fn pickup_stages_with_and_without_destination() {
    let routes = scripted_routes();
    let friends = FakeFriends::new(vec![
        friend(1, "Anna", ANNA.lat, ANNA.lng, "car"),
        friend(2, "Boris", 55.0, 37.3, "walking"),
    ]);
    let mut planner = planner_with(routes.clone(), friends);
    let mut state = loaded_state(&planner).await;
    state.select_pickup_friend(Some("1"));

    let data = planner.build_route(&mut state).await.unwrap();
    assert_eq!(data.stages(), vec![Stage::Pickup, Stage::Z]);
    assert_eq!(data.pickup.as_ref().map(|p| p.label.as_str()), Some("Anna"));
    let friend_ids: Vec<&str> = data.friend_segments.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(friend_ids, vec!["2"]);

    state.set_destination(DESTINATION, "Office");
    let data = planner.build_route(&mut state).await.unwrap();
    assert_eq!(
        data.stages(),
        vec![Stage::Pickup, Stage::Z, Stage::Stop, Stage::D]
    );

    let entries = planner.render(ScheduleMode::DepartNow, NOW).unwrap();
    let pickup = entries.iter().find(|e| e.title == "Anna (pickup)").unwrap();
    assert_eq!(pickup.time_ms, NOW + 900_000);
    assert_eq!(pickup.note.as_deref(), Some("Be ready for pickup"));

    // The pickup leg targets Anna, the next one leaves from her
    let requests = routes.requests();
    assert!(requests.iter().any(|r| r.destination == ANNA));
    assert!(requests.iter().any(|r| r.start == ANNA && r.destination == MEETPOINT));
}

#[tokio::test]
async fn walking_tail_becomes_its_own_segment() {
    let routes = FakeRoutes::new(|request| {
        if request.destination != DESTINATION {
            return Ok(route_with_duration(900.0));
        }
        let route: RouteResponse = serde_json::from_value(json!({
            "properties": {"summary": {"duration_sec": 1500}},
            "features": [
                {"properties": {"transport": "driving", "duration_sec": 1300}},
                {
                    "properties": {"transport": "walking", "duration_sec": 200},
                    "geometry": {"coordinates": [[37.95, 55.95], [38.0, 56.0]]}
                }
            ]
        }))
        .unwrap();
        Ok(route)
    });
    let mut planner = planner_with(routes, FakeFriends::new(Vec::new()));
    let mut state = loaded_state(&planner).await;
    state.set_destination(DESTINATION, "Office");

    let data = planner.build_route(&mut state).await.unwrap();
    assert_eq!(
        data.stages(),
        vec![Stage::Z, Stage::Stop, Stage::D, Stage::Walk]
    );
    let durations: Vec<Option<f64>> = data.user_segments.iter().map(|s| s.duration_sec).collect();
    assert_eq!(durations, vec![Some(900.0), Some(180.0), Some(1300.0), Some(200.0)]);
    let parking = data.parking.unwrap();
    assert_eq!(parking.parking_point, Some(LatLng::new(55.95, 37.95)));

    let entries = planner.render(ScheduleMode::DepartNow, NOW).unwrap();
    let walk = entries.iter().find(|e| e.title == "Walk from parking").unwrap();
    assert_eq!(walk.time_ms, NOW + (900 + 180 + 1300) * 1000);
    assert_eq!(walk.note.as_deref(), Some("Leave the car and walk (~3 min)"));
}

#[tokio::test]
async fn arrive_by_rejects_impossible_targets() {
    let friends = FakeFriends::new(vec![friend(1, "Anna", ANNA.lat, ANNA.lng, "car")]);
    let mut planner = planner_with(scripted_routes(), friends);
    let mut state = loaded_state(&planner).await;

    planner.build_route(&mut state).await.unwrap();
    assert_eq!(
        planner.render(ScheduleMode::ArriveBy(NOW), NOW),
        Err(ScheduleError::NoDestination)
    );

    state.set_destination(DESTINATION, "Office");
    planner.build_route(&mut state).await.unwrap();
    assert_eq!(
        planner.render(ScheduleMode::ArriveBy(1_000_000), NOW),
        Err(ScheduleError::ArrivalBeforeDeparture)
    );

    let target = NOW + 7_200_000;
    let entries = planner.render(ScheduleMode::ArriveBy(target), NOW).unwrap();
    assert_eq!(entries.last().unwrap().time_ms, target);
    assert_eq!(entries[0].title, "You");
    assert_eq!(entries[0].time_ms, target - 2_280_000);
}

#[tokio::test]
async fn failed_leg_leaves_schedule_not_ready() {
    let routes = FakeRoutes::new(|_| Err(PlannerError::http("routing backend down", Some(502))));
    let mut planner = planner_with(routes.clone(), FakeFriends::new(Vec::new()));
    let mut state = loaded_state(&planner).await;
    state.set_destination(DESTINATION, "Office");

    let data = planner.build_route(&mut state).await.unwrap();
    assert!(!data.ready);
    assert_eq!(routes.requests().len(), 1);

    let rendered = planner.render(ScheduleMode::DepartNow, NOW);
    assert!(matches!(rendered, Err(ScheduleError::RunFailed(ref m)) if m.contains("routing backend down")));
    assert_eq!(planner.status().count_containing("routing backend down"), 2);
}

#[tokio::test]
async fn missing_start_is_reported() {
    let mut planner = planner_with(scripted_routes(), FakeFriends::new(Vec::new()));
    let mut state = planner.new_state();
    let result = planner.build_route(&mut state).await;
    assert!(matches!(result, Err(PlannerError::MissingStart)));
    assert_eq!(planner.render_now(), Err(ScheduleError::NotComputed));
}

#[tokio::test]
async fn server_target_is_used_when_nothing_else_resolves() {
    let meetpoints = FakeMeetpoints::always(Err(PlannerError::http("HTTP 500", Some(500))));
    let friends = FakeFriends::build(Vec::new(), Some(json!({"lat": "54.5", "lng": 36.5})), false);
    let planner = TripPlanner::new(PlannerConfig::default(), meetpoints, scripted_routes(), friends);

    let mut state = planner.new_state();
    planner.load_friends(&mut state).await.unwrap();
    assert_eq!(state.target_z, Some(LatLng::new(54.5, 36.5)));

    let target = planner.resolver().resolve_target(&mut state).unwrap();
    assert_eq!(target.source, "cached");
    assert_eq!(target.point, LatLng::new(54.5, 36.5));
}

#[tokio::test]
async fn friend_transport_reverts_when_directory_rejects() {
    let friends = FakeFriends::build(
        vec![friend(1, "Anna", ANNA.lat, ANNA.lng, "walking")],
        None,
        true,
    );
    let planner = planner_with(scripted_routes(), friends.clone());
    let mut state = loaded_state(&planner).await;

    let result = planner
        .set_friend_transport(&mut state, "1", FriendTransport::Car)
        .await;
    assert!(result.is_err());
    assert_eq!(friends.updates(), vec![("1".to_string(), FriendTransport::Car)]);

    let anna = state.friend("1").unwrap().clone();
    assert_eq!(state.friend_transport(&anna), FriendTransport::Walking);
    assert_eq!(anna.mode.as_deref(), Some("walking"));
    assert_eq!(
        planner
            .status()
            .count_containing("Failed to save transport for Anna: directory is read-only"),
        1
    );
}

#[tokio::test]
async fn friend_transport_cycles_and_persists() {
    let friends = FakeFriends::new(vec![friend(1, "Anna", ANNA.lat, ANNA.lng, "bicycle")]);
    let planner = planner_with(scripted_routes(), friends.clone());
    let mut state = loaded_state(&planner).await;

    let next = planner.cycle_friend_transport(&mut state, "1").await.unwrap();
    assert_eq!(next, FriendTransport::PublicTransport);
    let next = planner.cycle_friend_transport(&mut state, "1").await.unwrap();
    assert_eq!(next, FriendTransport::Car);
    assert_eq!(
        friends.updates(),
        vec![
            ("1".to_string(), FriendTransport::PublicTransport),
            ("1".to_string(), FriendTransport::Car),
        ]
    );
    assert_eq!(planner.status().count_containing("Transport for Anna: Public transport"), 1);
    assert_eq!(planner.status().count_containing("Transport for Anna: Car"), 1);

    let request = planner.resolver().build_request(&state).unwrap();
    assert_eq!(request.participants[1].transport, TransportMode::Driving);
}

#[tokio::test]
async fn excluding_a_friend_removes_them_from_the_payload() {
    let friends = FakeFriends::new(vec![
        friend(1, "Anna", ANNA.lat, ANNA.lng, "car"),
        friend(2, "Boris", 55.0, 37.3, "walking"),
    ]);
    let planner = planner_with(scripted_routes(), friends);
    let mut state = loaded_state(&planner).await;

    assert_eq!(planner.toggle_friend_included(&mut state, "1"), Some(false));
    let request = planner.resolver().build_request(&state).unwrap();
    let ids: Vec<&str> = request.participants.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["user", "friend:2"]);
    assert_eq!(planner.toggle_friend_included(&mut state, "missing"), None);
}

#[tokio::test]
async fn excluding_the_last_participant_forgets_the_target() {
    let friends = FakeFriends::new(vec![friend(1, "Anna", ANNA.lat, ANNA.lng, "car")]);
    let planner = planner_with(scripted_routes(), friends);
    let mut state = planner.new_state();
    planner.load_friends(&mut state).await.unwrap();

    planner.resolver().request_update(&state, true).await.unwrap();
    let target = planner.resolver().resolve_target(&mut state).unwrap();
    assert_eq!(target.point, MEETPOINT);
    assert_eq!(state.target_z, Some(MEETPOINT));

    assert_eq!(planner.toggle_friend_included(&mut state, "1"), Some(false));
    assert_eq!(state.target_z, None);
    assert_eq!(planner.resolver().state().point, None);
    assert!(planner.resolver().resolve_target(&mut state).is_none());
}
