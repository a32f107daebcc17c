//! Application state and participant collection.
//!
//! [`AppState`] is the explicit state value every core operation receives:
//! start/destination, the user's transport, the friends list with per-friend
//! inclusion/transport/route caches, and the pickup selection.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;

use log::debug;
use lru::LruCache;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::config::PlannerConfig;
use crate::route::{RouteOptions, RouteResponse};
use crate::transport::{FriendTransport, TransportMode};
use crate::LatLng;

/// Marker colours assigned to friends by list position.
pub const FRIEND_COLOR_PALETTE: [&str; 6] = [
    "#5c6bc0", "#26a69a", "#ffb74d", "#8d6e63", "#7e57c2", "#0097a7",
];

const DEFAULT_ROUTE_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

// ============================================================================
// Participants
// ============================================================================

/// Identity of a participant: the user or `friend:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParticipantId {
    User,
    Friend(String),
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantId::User => f.write_str("user"),
            ParticipantId::Friend(id) => write!(f, "friend:{}", id),
        }
    }
}

impl Serialize for ParticipantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An active participant with a usable position.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub position: LatLng,
    pub transport: TransportMode,
    pub included: bool,
}

/// A point with a human-readable label (start or destination).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPoint {
    pub point: LatLng,
    pub label: String,
}

impl NamedPoint {
    pub fn new(point: LatLng, label: impl Into<String>) -> Self {
        Self {
            point,
            label: label.into(),
        }
    }
}

// ============================================================================
// Friends
// ============================================================================

/// A friend record as served by the friends directory.
///
/// Coordinates and the id arrive loosely typed (numbers or strings);
/// `x_coord` is the latitude and `y_coord` the longitude.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    #[serde(default)]
    pub friend_id: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub x_coord: Value,
    #[serde(default)]
    pub y_coord: Value,
    #[serde(default)]
    pub mode: Option<String>,
}

impl Friend {
    /// Normalised id; `None` when missing or empty.
    pub fn id(&self) -> Option<String> {
        match &self.friend_id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Position, when both coordinates parse to finite numbers.
    pub fn position(&self) -> Option<LatLng> {
        LatLng::from_loose(&self.x_coord, &self.y_coord)
    }

    pub fn display_name(&self) -> String {
        match (&self.name, self.id()) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(id)) => format!("Friend #{}", id),
            _ => "Friend".to_string(),
        }
    }
}

/// Client-side state kept per friend id.
pub struct FriendState {
    pub included: bool,
    pub color: &'static str,
    pub transport: FriendTransport,
    /// Routes to the meetpoint keyed by `transport|lat,lng`
    pub routes: LruCache<String, RouteResponse>,
}

impl FriendState {
    fn new(friend: &Friend, index: usize, capacity: NonZeroUsize) -> Self {
        Self {
            included: true,
            color: FRIEND_COLOR_PALETTE[index % FRIEND_COLOR_PALETTE.len()],
            transport: FriendTransport::from_mode(friend.mode.as_deref()),
            routes: LruCache::new(capacity),
        }
    }
}

impl fmt::Debug for FriendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FriendState")
            .field("included", &self.included)
            .field("color", &self.color)
            .field("transport", &self.transport)
            .field("cached_routes", &self.routes.len())
            .finish()
    }
}

/// Pickup selection: the user detours to collect one friend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PickupSelection {
    pub enabled: bool,
    pub friend_id: Option<String>,
}

// ============================================================================
// App State
// ============================================================================

/// Mutable planner state owned by the caller.
#[derive(Debug)]
pub struct AppState {
    pub start: Option<NamedPoint>,
    pub destination: Option<NamedPoint>,
    pub transport: TransportMode,
    pub route_options: RouteOptions,
    pub friends: Vec<Friend>,
    pub pickup: PickupSelection,
    /// Server-suggested or last routed meetpoint
    pub target_z: Option<LatLng>,
    friend_states: HashMap<String, FriendState>,
    last_target_key: Option<String>,
    route_cache_capacity: NonZeroUsize,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            start: None,
            destination: None,
            transport: TransportMode::Driving,
            route_options: RouteOptions::default(),
            friends: Vec::new(),
            pickup: PickupSelection::default(),
            target_z: None,
            friend_states: HashMap::new(),
            last_target_key: None,
            route_cache_capacity: DEFAULT_ROUTE_CACHE_CAPACITY,
        }
    }
}

impl AppState {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            route_cache_capacity: NonZeroUsize::new(config.friend_route_cache_capacity)
                .unwrap_or(DEFAULT_ROUTE_CACHE_CAPACITY),
            ..Self::default()
        }
    }

    pub fn set_start(&mut self, point: LatLng, label: impl Into<String>) {
        self.start = Some(NamedPoint::new(point, label));
    }

    pub fn set_destination(&mut self, point: LatLng, label: impl Into<String>) {
        self.destination = Some(NamedPoint::new(point, label));
    }

    /// Start point when set with finite coordinates.
    pub fn valid_start(&self) -> Option<&NamedPoint> {
        self.start.as_ref().filter(|s| s.point.is_valid())
    }

    /// Destination when set with finite coordinates.
    pub fn valid_destination(&self) -> Option<&NamedPoint> {
        self.destination.as_ref().filter(|d| d.point.is_valid())
    }

    /// Change the user's transport. Pickup is only offered while driving.
    pub fn set_transport(&mut self, transport: TransportMode) {
        self.transport = transport;
        if transport != TransportMode::Driving {
            self.clear_pickup();
        }
    }

    /// Replace the friends list, keeping state for friends still present.
    pub fn replace_friends(&mut self, friends: Vec<Friend>) {
        self.friends = friends;
        let ids: Vec<String> = self.friends.iter().filter_map(Friend::id).collect();
        self.friend_states.retain(|id, _| ids.contains(id));
        for index in 0..self.friends.len() {
            self.ensure_friend_state(index);
        }
    }

    /// Create default state for the friend at `index` if missing.
    pub fn ensure_friend_state(&mut self, index: usize) -> Option<&mut FriendState> {
        let friend = self.friends.get(index)?;
        let id = friend.id()?;
        let capacity = self.route_cache_capacity;
        Some(
            self.friend_states
                .entry(id)
                .or_insert_with(|| FriendState::new(friend, index, capacity)),
        )
    }

    pub fn friend_state(&self, friend_id: &str) -> Option<&FriendState> {
        self.friend_states.get(friend_id)
    }

    pub fn friend_state_mut(&mut self, friend_id: &str) -> Option<&mut FriendState> {
        if !self.friend_states.contains_key(friend_id) {
            let index = self.friend_index(friend_id)?;
            self.ensure_friend_state(index);
        }
        self.friend_states.get_mut(friend_id)
    }

    pub fn friend_index(&self, friend_id: &str) -> Option<usize> {
        self.friends
            .iter()
            .position(|f| f.id().as_deref() == Some(friend_id))
    }

    pub fn friend(&self, friend_id: &str) -> Option<&Friend> {
        self.friend_index(friend_id).map(|i| &self.friends[i])
    }

    /// Inclusion flag; friends without state count as included.
    pub fn is_included(&self, friend_id: &str) -> bool {
        self.friend_states
            .get(friend_id)
            .map_or(true, |state| state.included)
    }

    /// The friend's current transport choice.
    pub fn friend_transport(&self, friend: &Friend) -> FriendTransport {
        friend
            .id()
            .and_then(|id| self.friend_states.get(&id))
            .map(|state| state.transport)
            .unwrap_or_else(|| FriendTransport::from_mode(friend.mode.as_deref()))
    }

    /// Include or exclude a friend. Excluding the pickup friend clears the pickup.
    pub fn set_friend_included(&mut self, friend_id: &str, included: bool) -> bool {
        let Some(state) = self.friend_state_mut(friend_id) else {
            return false;
        };
        state.included = included;
        if !included && self.pickup.friend_id.as_deref() == Some(friend_id) {
            self.clear_pickup();
        }
        true
    }

    /// Flip inclusion; returns the new value when the friend exists.
    pub fn toggle_friend_included(&mut self, friend_id: &str) -> Option<bool> {
        let included = !self.is_included(friend_id);
        self.set_friend_included(friend_id, included)
            .then_some(included)
    }

    /// Select the pickup friend; selecting forces the friend to be included.
    pub fn select_pickup_friend(&mut self, friend_id: Option<&str>) {
        match friend_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                self.pickup.enabled = true;
                self.pickup.friend_id = Some(id.to_string());
                if let Some(state) = self.friend_state_mut(id) {
                    state.included = true;
                }
            }
            None => self.clear_pickup(),
        }
    }

    pub fn clear_pickup(&mut self) {
        self.pickup = PickupSelection::default();
    }

    /// Friends that can be picked up (have an id and valid coordinates).
    pub fn pickup_candidates(&self) -> Vec<&Friend> {
        self.friends
            .iter()
            .filter(|f| f.id().is_some() && f.position().is_some())
            .collect()
    }

    /// Record the meetpoint about to be routed to.
    ///
    /// Friend routes are cached per meetpoint; whenever the meetpoint key changes
    /// every friend's cache is dropped.
    pub fn observe_target(&mut self, target: Option<LatLng>) {
        let key = target.map(|point| format!("target|{}", point.cache_key()));
        if key.is_some() && key != self.last_target_key {
            debug!("[AppState] Meetpoint changed to {:?}, resetting friend routes", key);
            self.reset_friend_routes();
        }
        self.last_target_key = key;
        self.target_z = target;
    }

    /// Forget the routed meetpoint and its cache key.
    pub fn clear_target(&mut self) {
        self.target_z = None;
        self.last_target_key = None;
    }

    pub fn reset_friend_routes(&mut self) {
        for state in self.friend_states.values_mut() {
            state.routes.clear();
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Active participants: the user first (if the start is valid), then included
/// friends with valid coordinates in list order. Everyone else is skipped.
pub fn collect_participants(state: &AppState) -> Vec<Participant> {
    let mut participants = Vec::with_capacity(state.friends.len() + 1);

    if let Some(start) = state.valid_start() {
        participants.push(Participant {
            id: ParticipantId::User,
            position: start.point,
            transport: state.transport,
            included: true,
        });
    }

    for friend in &state.friends {
        let Some(id) = friend.id() else {
            continue;
        };
        if !state.is_included(&id) {
            continue;
        }
        let Some(position) = friend.position() else {
            continue;
        };
        participants.push(Participant {
            id: ParticipantId::Friend(id),
            position,
            transport: state.friend_transport(friend).transport_mode(),
            included: true,
        });
    }

    participants
}

/// Positions of the active participants.
pub fn collect_points(state: &AppState) -> Vec<LatLng> {
    collect_participants(state)
        .into_iter()
        .map(|p| p.position)
        .collect()
}
