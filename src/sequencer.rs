//! Route leg planning and sequential execution.
//!
//! Planning is pure: [`plan_user_legs`] turns the start, the optional pickup,
//! the meetpoint and the optional destination into an ordered list of tagged
//! legs. Execution then requests each routed leg strictly in order, folding
//! every response into [`ScheduleData`] before the next request is sent. The
//! friends' routes follow once the user's path is complete.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::meetpoint::ResolvedTarget;
use crate::participants::{AppState, NamedPoint};
use crate::route::{
    describe_route, split_drive_and_walk, DriveWalkSplit, RouteOptions, RouteRequest,
    RouteResponse, RouteService,
};
use crate::status_log::StatusLog;
use crate::transport::TransportMode;
use crate::LatLng;

const MEETPOINT_NAME: &str = "Meetpoint";
const DESTINATION_NAME: &str = "Point B";
const STOP_LABEL: &str = "Gathering and boarding";
const WALK_LABEL: &str = "Walk to point B";

/// Role of a user segment in the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Start to the picked-up friend
    #[serde(rename = "pickup")]
    Pickup,
    /// Arrival at the meetpoint
    Z,
    /// Gathering dwell at the meetpoint
    #[serde(rename = "stop")]
    Stop,
    /// Parking to the destination on foot
    #[serde(rename = "walk")]
    Walk,
    /// Meetpoint to the destination
    D,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pickup => "pickup",
            Stage::Z => "Z",
            Stage::Stop => "stop",
            Stage::Walk => "walk",
            Stage::D => "D",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Planning
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LegKind {
    /// A leg answered by the route service
    Route(RouteRequest),
    /// A fixed wait with no route
    Dwell { duration_sec: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLeg {
    pub stage: Stage,
    pub label: String,
    pub kind: LegKind,
}

/// A validated pickup: the friend exists and has coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PickupPlan {
    pub friend_id: String,
    pub label: String,
    pub point: LatLng,
}

/// Everything needed to lay out the user's legs.
#[derive(Debug, Clone)]
pub struct LegPlanInput<'a> {
    pub start: &'a NamedPoint,
    pub pickup: Option<&'a PickupPlan>,
    pub meetpoint: LatLng,
    pub destination: Option<&'a NamedPoint>,
    pub transport: TransportMode,
    pub options: &'a RouteOptions,
    pub stop_duration_sec: f64,
}

/// Lay out the user's legs: `[pickup?, Z, stop?, D?]`.
///
/// The stop dwell exists only with a destination and sits between the last
/// `Z` leg and the `D` leg.
pub fn plan_user_legs(input: &LegPlanInput<'_>) -> Vec<PlannedLeg> {
    let route = |from: LatLng, to: LatLng, from_name: &str, to_name: &str| {
        LegKind::Route(
            RouteRequest::new(from, to, input.transport, input.options).with_names(from_name, to_name),
        )
    };
    let mut legs = Vec::with_capacity(4);

    match input.pickup {
        Some(pickup) => {
            legs.push(PlannedLeg {
                stage: Stage::Pickup,
                label: format!("User: start → {}", pickup.label),
                kind: route(input.start.point, pickup.point, &input.start.label, &pickup.label),
            });
            legs.push(PlannedLeg {
                stage: Stage::Z,
                label: format!("User: {} → meetpoint", pickup.label),
                kind: route(pickup.point, input.meetpoint, &pickup.label, MEETPOINT_NAME),
            });
        }
        None => legs.push(PlannedLeg {
            stage: Stage::Z,
            label: "User: start → meetpoint".to_string(),
            kind: route(input.start.point, input.meetpoint, &input.start.label, MEETPOINT_NAME),
        }),
    }

    if let Some(destination) = input.destination {
        let destination_name = if destination.label.is_empty() {
            DESTINATION_NAME
        } else {
            destination.label.as_str()
        };
        legs.push(PlannedLeg {
            stage: Stage::Stop,
            label: STOP_LABEL.to_string(),
            kind: LegKind::Dwell {
                duration_sec: input.stop_duration_sec,
            },
        });
        legs.push(PlannedLeg {
            stage: Stage::D,
            label: "User: meetpoint → point B".to_string(),
            kind: route(input.meetpoint, destination.point, MEETPOINT_NAME, destination_name),
        });
    }

    legs
}

// ============================================================================
// Schedule Data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSegment {
    pub stage: Stage,
    pub label: String,
    pub duration_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriendSegment {
    pub id: String,
    pub name: String,
    pub duration_sec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PickupInfo {
    pub friend_id: String,
    pub label: String,
}

/// Result of a route run, consumed by the schedule synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleData {
    pub user_segments: Vec<UserSegment>,
    pub friend_segments: Vec<FriendSegment>,
    pub pickup: Option<PickupInfo>,
    pub parking: Option<DriveWalkSplit>,
    pub ready: bool,
    /// Set once any leg has no usable duration; never cleared
    pub missing_duration: bool,
    pub stop_duration_sec: f64,
    pub has_destination: bool,
    pub target_source: Option<String>,
    pub meetpoint_method: Option<String>,
    /// Why the run failed, when it did
    pub failure: Option<String>,
}

impl ScheduleData {
    pub fn new(stop_duration_sec: f64, has_destination: bool) -> Self {
        Self {
            user_segments: Vec::new(),
            friend_segments: Vec::new(),
            pickup: None,
            parking: None,
            ready: false,
            missing_duration: false,
            stop_duration_sec,
            has_destination,
            target_source: None,
            meetpoint_method: None,
            failure: None,
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.user_segments.iter().map(|s| s.stage).collect()
    }

    pub(crate) fn push_user(&mut self, stage: Stage, label: &str, duration_sec: Option<f64>) {
        let duration_sec = duration_sec.filter(|d| d.is_finite());
        if duration_sec.is_none() {
            self.missing_duration = true;
        }
        self.user_segments.push(UserSegment {
            stage,
            label: label.to_string(),
            duration_sec,
        });
    }
}

// ============================================================================
// Sequencer
// ============================================================================

/// Runs the user's legs and the friends' routes against the route service.
pub struct RouteSegmentSequencer {
    routes: Arc<dyn RouteService>,
    stop_duration_sec: f64,
    status: StatusLog,
}

impl RouteSegmentSequencer {
    pub fn new(routes: Arc<dyn RouteService>, config: &PlannerConfig, status: StatusLog) -> Self {
        Self {
            routes,
            stop_duration_sec: config.stop_duration_sec,
            status,
        }
    }

    /// Build every route towards `target` and fold them into schedule data.
    ///
    /// A failed leg aborts the run; the returned data then has `ready == false`
    /// and `failure` set.
    pub async fn run(&self, state: &mut AppState, target: &ResolvedTarget) -> ScheduleData {
        let destination = state.valid_destination().cloned();
        let mut data = ScheduleData::new(self.stop_duration_sec, destination.is_some());
        data.target_source = Some(target.source.clone());
        data.meetpoint_method = target.method.clone();

        let Some(start) = state.valid_start().cloned() else {
            self.fail(&mut data, PlannerError::MissingStart);
            return data;
        };

        let pickup = self.resolve_pickup(state);
        if let Some(plan) = &pickup {
            self.status.push(format!("User will pick up {}", plan.label));
            data.pickup = Some(PickupInfo {
                friend_id: plan.friend_id.clone(),
                label: plan.label.clone(),
            });
        }

        let legs = plan_user_legs(&LegPlanInput {
            start: &start,
            pickup: pickup.as_ref(),
            meetpoint: target.point,
            destination: destination.as_ref(),
            transport: state.transport,
            options: &state.route_options,
            stop_duration_sec: self.stop_duration_sec,
        });
        debug!(
            "[RouteSegmentSequencer] Planned legs: {:?}",
            legs.iter().map(|l| l.stage.as_str()).collect::<Vec<_>>()
        );

        if let Err(error) = self.run_user_legs(&legs, &mut data).await {
            self.fail(&mut data, error);
            return data;
        }

        let pickup_id = pickup.map(|p| p.friend_id);
        if let Err(error) = self
            .run_friend_routes(state, target.point, pickup_id.as_deref(), &mut data)
            .await
        {
            self.fail(&mut data, error);
            return data;
        }

        data.ready = true;
        info!(
            "[RouteSegmentSequencer] Run complete: {} user segments, {} friends",
            data.user_segments.len(),
            data.friend_segments.len()
        );
        data
    }

    /// Validate the pickup selection, resetting it with a notice when unusable.
    fn resolve_pickup(&self, state: &mut AppState) -> Option<PickupPlan> {
        if !state.pickup.enabled {
            return None;
        }
        let selected = state.pickup.friend_id.clone();
        let problem = match selected {
            None => "Choose a friend to pick up from the list.",
            Some(id) => {
                let found = state.friend(&id).map(|f| (f.display_name(), f.position()));
                match found {
                    None => "The selected friend is not in the list.",
                    Some((_, None)) => "The selected friend has no valid coordinates for pickup.",
                    Some((label, Some(point))) => {
                        if let Some(friend_state) = state.friend_state_mut(&id) {
                            friend_state.included = true;
                        }
                        return Some(PickupPlan {
                            friend_id: id,
                            label,
                            point,
                        });
                    }
                }
            }
        };
        self.status.push(problem);
        state.clear_pickup();
        None
    }

    async fn run_user_legs(&self, legs: &[PlannedLeg], data: &mut ScheduleData) -> Result<()> {
        for leg in legs {
            let request = match &leg.kind {
                LegKind::Dwell { duration_sec } => {
                    data.push_user(leg.stage, &leg.label, Some(*duration_sec));
                    continue;
                }
                LegKind::Route(request) => request,
            };

            let route = self.fetch_route(request, &leg.label).await?;
            let mut duration = route.duration_sec();
            let mut walk = None;

            if leg.stage == Stage::D {
                let split = split_drive_and_walk(&route);
                if split.parking_point.is_some() {
                    data.parking = Some(split);
                }
                match split.walk() {
                    Some(walk_sec) => {
                        duration = split
                            .drive_duration_sec
                            .or_else(|| duration.map(|d| (d - walk_sec).max(0.0)));
                        walk = Some(walk_sec);
                    }
                    None => duration = split.drive_duration_sec.or(duration),
                }
            }

            data.push_user(leg.stage, &leg.label, duration);
            if let Some(walk_sec) = walk {
                data.push_user(Stage::Walk, WALK_LABEL, Some(walk_sec));
            }
        }
        Ok(())
    }

    async fn run_friend_routes(
        &self,
        state: &mut AppState,
        meetpoint: LatLng,
        pickup_id: Option<&str>,
        data: &mut ScheduleData,
    ) -> Result<()> {
        let friends: Vec<_> = state
            .friends
            .iter()
            .filter_map(|f| f.id().map(|id| (id, f.clone())))
            .filter(|(id, _)| state.is_included(id) && Some(id.as_str()) != pickup_id)
            .collect();

        for (id, friend) in friends {
            let name = friend.display_name();
            let Some(position) = friend.position() else {
                self.status
                    .push(format!("Friend {} has no valid coordinates.", name));
                continue;
            };

            let transport = state.friend_transport(&friend).transport_mode();
            let cache_key = format!("{}|{}", transport, meetpoint.cache_key());
            let cached = state
                .friend_state_mut(&id)
                .and_then(|s| s.routes.get(&cache_key).cloned());

            let route = match cached {
                Some(route) => {
                    self.status
                        .push(format!("Using cached route for friend: {}", name));
                    route
                }
                None => {
                    let request =
                        RouteRequest::new(position, meetpoint, transport, &RouteOptions::for_friend())
                            .with_names(&name, MEETPOINT_NAME);
                    let label = format!("Friend: {} → meetpoint", name);
                    let route = self.fetch_route(&request, &label).await?;
                    if let Some(friend_state) = state.friend_state_mut(&id) {
                        friend_state.routes.put(cache_key, route.clone());
                    }
                    route
                }
            };

            let duration_sec = route.duration_sec().filter(|d| d.is_finite());
            if duration_sec.is_none() {
                data.missing_duration = true;
            }
            data.friend_segments.push(FriendSegment {
                id,
                name,
                duration_sec,
            });
        }
        Ok(())
    }

    async fn fetch_route(&self, request: &RouteRequest, label: &str) -> Result<RouteResponse> {
        match self.routes.route(request).await {
            Ok(route) => {
                self.status.push(describe_route(label, request, &route));
                Ok(route)
            }
            Err(error) => {
                self.status
                    .push(format!("Route request failed ({}): {}", label, error));
                Err(PlannerError::RouteFailed {
                    label: label.to_string(),
                    message: error.to_string(),
                })
            }
        }
    }

    fn fail(&self, data: &mut ScheduleData, error: PlannerError) {
        data.ready = false;
        data.failure = Some(error.to_string());
        self.status.push(format!("Failed to build routes: {}", error));
    }
}
