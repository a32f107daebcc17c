//! High-level facade wiring the resolver, sequencer and synthesizer together.

use std::sync::Arc;

use log::info;

use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::friends::{self, FriendsDirectory};
use crate::meetpoint::{MeetpointResolver, MeetpointService};
use crate::participants::AppState;
use crate::route::RouteService;
use crate::schedule::{ScheduleEntry, ScheduleError, ScheduleMode, ScheduleSynthesizer};
use crate::sequencer::{RouteSegmentSequencer, ScheduleData};
use crate::status_log::StatusLog;
use crate::transport::FriendTransport;

/// Plans a group trip: meetpoint, routes and timeline.
pub struct TripPlanner {
    config: PlannerConfig,
    resolver: MeetpointResolver,
    sequencer: RouteSegmentSequencer,
    synthesizer: ScheduleSynthesizer,
    friends: Arc<dyn FriendsDirectory>,
    status: StatusLog,
    schedule: Option<ScheduleData>,
}

impl TripPlanner {
    pub fn new(
        config: PlannerConfig,
        meetpoints: Arc<dyn MeetpointService>,
        routes: Arc<dyn RouteService>,
        friends: Arc<dyn FriendsDirectory>,
    ) -> Self {
        let status = StatusLog::new();
        Self {
            resolver: MeetpointResolver::new(meetpoints, &config, status.clone()),
            sequencer: RouteSegmentSequencer::new(routes, &config, status.clone()),
            synthesizer: ScheduleSynthesizer::new(&config),
            friends,
            status,
            schedule: None,
            config,
        }
    }

    /// Planner backed by the HTTP services at `config.api_base_url`.
    #[cfg(feature = "http")]
    pub fn with_http(config: PlannerConfig) -> Result<Self> {
        let client = Arc::new(crate::http::ApiClient::new(&config)?);
        Ok(Self::new(config, client.clone(), client.clone(), client))
    }

    /// Fresh state sized by this planner's configuration.
    pub fn new_state(&self) -> AppState {
        AppState::new(&self.config)
    }

    pub async fn load_friends(&self, state: &mut AppState) -> Result<usize> {
        friends::load_friends(state, self.friends.as_ref(), &self.resolver).await
    }

    pub async fn set_friend_transport(
        &self,
        state: &mut AppState,
        friend_id: &str,
        transport: FriendTransport,
    ) -> Result<()> {
        friends::set_friend_transport(state, self.friends.as_ref(), &self.resolver, friend_id, transport)
            .await
    }

    pub async fn cycle_friend_transport(
        &self,
        state: &mut AppState,
        friend_id: &str,
    ) -> Result<FriendTransport> {
        friends::cycle_friend_transport(state, self.friends.as_ref(), &self.resolver, friend_id).await
    }

    pub fn toggle_friend_included(&self, state: &mut AppState, friend_id: &str) -> Option<bool> {
        friends::toggle_friend_included(state, &self.resolver, friend_id)
    }

    /// Call after any participant change; recomputes the meetpoint once the
    /// changes settle, or clears it when nobody is left.
    pub fn state_changed(&self, state: &mut AppState) {
        self.resolver.participants_changed(state);
    }

    /// Refresh the meetpoint, then build every route and store the result.
    ///
    /// A failed route leg is reported through the returned data
    /// (`ready == false`), not as an error.
    pub async fn build_route(&mut self, state: &mut AppState) -> Result<&ScheduleData> {
        if state.valid_destination().is_none() {
            self.status
                .push("Point B is not set: building routes to the meetpoint only");
        }
        if state.valid_start().is_none() {
            self.status
                .push("Set a start point on the map or via geolocation");
            return Err(PlannerError::MissingStart);
        }

        self.resolver.cancel_recalculation();
        if let Err(error) = self.resolver.request_update(state, true).await {
            self.status
                .push(format!("Failed to update meetpoint: {}", error));
        }

        let Some(target) = self.resolver.resolve_target(state) else {
            self.status.push("Meetpoint is not configured.");
            self.schedule = None;
            return Err(PlannerError::NoMeetpoint);
        };
        info!(
            "[TripPlanner] Building routes to {} via {}",
            target.point.cache_key(),
            target.source
        );

        let data = self.sequencer.run(state, &target).await;
        Ok(self.schedule.insert(data))
    }

    /// Render the last built schedule.
    pub fn render(&self, mode: ScheduleMode, now_ms: i64) -> std::result::Result<Vec<ScheduleEntry>, ScheduleError> {
        let data = self.schedule.as_ref().ok_or(ScheduleError::NotComputed)?;
        self.synthesizer.render(data, mode, now_ms)
    }

    /// Render a "depart now" schedule anchored at the current time.
    pub fn render_now(&self) -> std::result::Result<Vec<ScheduleEntry>, ScheduleError> {
        self.render(ScheduleMode::DepartNow, crate::now_millis())
    }

    pub fn schedule(&self) -> Option<&ScheduleData> {
        self.schedule.as_ref()
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn resolver(&self) -> &MeetpointResolver {
        &self.resolver
    }

    pub fn synthesizer(&self) -> &ScheduleSynthesizer {
        &self.synthesizer
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }
}
