//! # Rendezvous Planner
//!
//! Meetpoint resolution and arrival scheduling for a group trip.
//!
//! This library provides:
//! - A Weiszfeld geometric-median solver used as the local meetpoint fallback
//! - A meetpoint resolver with request fingerprinting, in-flight de-duplication,
//!   stale-response discarding and debounced recomputation
//! - A route-leg sequencer that runs the user's legs and the friends' routes
//!   strictly in order and folds the results into schedule data
//! - A schedule synthesizer for "depart now" and "arrive by" timelines
//!
//! ## Features
//!
//! - **`http`** (default) - reqwest-backed clients for the meetpoint, route and
//!   friends services
//!
//! ## Quick Start
//!
//! ```rust
//! use rendezvous_planner::{median, LatLng};
//!
//! let points = vec![
//!     LatLng::new(55.75, 37.61),
//!     LatLng::new(55.76, 37.64),
//!     LatLng::new(55.73, 37.60),
//! ];
//!
//! if let Some(meetpoint) = median::solve(&points) {
//!     println!("Meet at {:.5}, {:.5}", meetpoint.lat, meetpoint.lng);
//! }
//! ```

use geo::Coord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Unified error handling
pub mod error;
pub use error::{OptionExt, PlannerError, Result};

// Configuration (service endpoint, debounce, dwell time, solver tunables)
pub mod config;
pub use config::{MeetpointType, PlannerConfig};

// Transport-mode vocabulary and per-mode route filters
pub mod transport;
pub use transport::{FriendTransport, TransportMode};

// Weiszfeld geometric median
pub mod median;
pub use median::MedianConfig;

// Timestamped user-facing notices
pub mod status_log;
pub use status_log::{StatusLine, StatusLog};

// Application state and participant collection
pub mod participants;
pub use participants::{
    collect_participants, collect_points, AppState, Friend, FriendState, NamedPoint, Participant,
    ParticipantId,
};

// Meetpoint resolution (service + fallback + debounce)
pub mod meetpoint;
pub use meetpoint::{
    MeetpointMeta, MeetpointRequest, MeetpointResolver, MeetpointService, MeetpointState,
    ResolvedTarget,
};

// Route service contract and route response model
pub mod route;
pub use route::{DriveWalkSplit, RouteOptions, RouteRequest, RouteResponse, RouteService};

// Route leg planning and sequential execution
pub mod sequencer;
pub use sequencer::{
    plan_user_legs, FriendSegment, LegKind, LegPlanInput, PickupInfo, PickupPlan, PlannedLeg,
    RouteSegmentSequencer, ScheduleData, Stage, UserSegment,
};

// Timeline synthesis
pub mod schedule;
pub use schedule::{ScheduleEntry, ScheduleError, ScheduleMode, ScheduleSynthesizer};

// Friends directory contract and friend-state operations
pub mod friends;
pub use friends::{FriendsDirectory, FriendsSnapshot};

// High-level facade wiring everything together
pub mod planner;
pub use planner::TripPlanner;

// HTTP clients for the external services
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::ApiClient;

// ============================================================================
// Core Types
// ============================================================================

/// A WGS84 position in degrees.
///
/// # Example
/// ```
/// use rendezvous_planner::LatLng;
/// let point = LatLng::new(55.7558, 37.6173); // Moscow
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Create a new position.
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both coordinates are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Parse a position from loosely typed JSON values (numbers or numeric strings).
    pub fn from_loose(lat: &Value, lng: &Value) -> Option<Self> {
        let point = Self::new(parse_coordinate(lat)?, parse_coordinate(lng)?);
        point.is_valid().then_some(point)
    }

    /// Parse a `{lat, lng}` JSON object.
    pub fn from_json_object(value: &Value) -> Option<Self> {
        Self::from_loose(value.get("lat")?, value.get("lng")?)
    }

    /// Stable textual key with 6 decimal places, used for cache keys.
    pub fn cache_key(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lng)
    }
}

impl From<LatLng> for Coord<f64> {
    fn from(point: LatLng) -> Self {
        Coord {
            x: point.lng,
            y: point.lat,
        }
    }
}

impl From<Coord<f64>> for LatLng {
    fn from(coord: Coord<f64>) -> Self {
        LatLng::new(coord.y, coord.x)
    }
}

/// Parse a single coordinate from a JSON number or numeric string.
///
/// `null`, booleans, empty strings and non-finite values are rejected.
pub fn parse_coordinate(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_coordinate() {
        assert_eq!(parse_coordinate(&json!(55.5)), Some(55.5));
        assert_eq!(parse_coordinate(&json!("37.25")), Some(37.25));
        assert_eq!(parse_coordinate(&json!(" 12 ")), Some(12.0));
        assert_eq!(parse_coordinate(&json!(null)), None);
        assert_eq!(parse_coordinate(&json!("")), None);
        assert_eq!(parse_coordinate(&json!("abc")), None);
        assert_eq!(parse_coordinate(&json!("NaN")), None);
        assert_eq!(parse_coordinate(&json!(true)), None);
    }

    #[test]
    fn test_from_json_object() {
        let point = LatLng::from_json_object(&json!({"lat": "55.1", "lng": 37.1})).unwrap();
        assert_eq!(point, LatLng::new(55.1, 37.1));
        assert!(LatLng::from_json_object(&json!({"lat": 55.1})).is_none());
    }

    #[test]
    fn test_coord_round_trip_keeps_axes() {
        let point = LatLng::new(55.0, 37.0);
        let coord: Coord<f64> = point.into();
        assert_eq!(coord.x, 37.0);
        assert_eq!(coord.y, 55.0);
        assert_eq!(LatLng::from(coord), point);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(LatLng::new(55.0, 37.1234567).cache_key(), "55.000000,37.123457");
    }
}
