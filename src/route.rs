//! Route service contract and route response model.
//!
//! The routing service answers with a GeoJSON-like feature collection whose
//! `properties.summary` carries the totals. Individual features may carry a
//! transport tag; driving routes that end on foot are split into drive and walk
//! parts from those tags.

use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::transport::{TransportMode, DEFAULT_PUBLIC_TRANSPORT_MODES};
use crate::LatLng;

/// Computes a single route between two points.
pub trait RouteService: Send + Sync {
    fn route<'a>(&'a self, request: &'a RouteRequest) -> BoxFuture<'a, Result<RouteResponse>>;
}

// ============================================================================
// Request
// ============================================================================

/// User-selected routing preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteOptions {
    /// `fastest` or `shortest`
    pub route_mode: String,
    /// `jam`, `statistics`, ...
    pub traffic_mode: String,
    /// `detailed` or `summary`
    pub output: String,
    /// Requested filters; only those allowed for the transport are sent
    pub filters: Vec<String>,
    pub need_altitudes: bool,
    pub allow_locked_roads: bool,
    /// Number of alternatives, 0 for none
    pub alternative: u32,
    /// Vehicle types for public transport; empty means the defaults
    pub public_transport_modes: Vec<String>,
}

impl Default for RouteOptions {
    fn default() -> Self {
        Self {
            route_mode: "fastest".to_string(),
            traffic_mode: "jam".to_string(),
            output: "detailed".to_string(),
            filters: Vec::new(),
            need_altitudes: false,
            allow_locked_roads: false,
            alternative: 0,
            public_transport_modes: Vec::new(),
        }
    }
}

impl RouteOptions {
    /// Options used for friends: fastest, with traffic, detailed, no filters.
    pub fn for_friend() -> Self {
        Self::default()
    }
}

/// Body of a route request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRequest {
    pub start: LatLng,
    pub destination: LatLng,
    pub transport: TransportMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub need_altitudes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_locked_roads: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub public_transport_modes: Vec<String>,
}

impl RouteRequest {
    /// Build a request body. Public transport only carries vehicle types;
    /// every other mode carries the road options.
    pub fn new(
        start: LatLng,
        destination: LatLng,
        transport: TransportMode,
        options: &RouteOptions,
    ) -> Self {
        let mut request = Self {
            start,
            destination,
            transport,
            start_name: None,
            destination_name: None,
            route_mode: None,
            output: None,
            traffic_mode: None,
            filters: Vec::new(),
            need_altitudes: None,
            allow_locked_roads: None,
            alternative: None,
            public_transport_modes: Vec::new(),
        };

        if transport.is_public_transport() {
            request.public_transport_modes = if options.public_transport_modes.is_empty() {
                DEFAULT_PUBLIC_TRANSPORT_MODES
                    .iter()
                    .map(|m| m.to_string())
                    .collect()
            } else {
                options.public_transport_modes.clone()
            };
            return request;
        }

        let allowed = transport.allowed_filters();
        request.filters = options
            .filters
            .iter()
            .filter(|f| allowed.contains(&f.as_str()))
            .cloned()
            .collect();
        request.route_mode = non_empty(&options.route_mode);
        request.output = non_empty(&options.output);
        request.traffic_mode = non_empty(&options.traffic_mode);
        request.need_altitudes = options.need_altitudes.then_some(true);
        request.allow_locked_roads = options.allow_locked_roads.then_some(true);
        request.alternative = (options.alternative > 0).then_some(options.alternative);
        request
    }

    pub fn with_names(mut self, start_name: &str, destination_name: &str) -> Self {
        self.start_name = non_empty(start_name);
        self.destination_name = non_empty(destination_name);
        self
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

// ============================================================================
// Response
// ============================================================================

/// Totals reported by the routing service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    #[serde(default, deserialize_with = "lenient_number")]
    pub distance_m: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration_sec: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transport: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteProperties {
    #[serde(default)]
    pub summary: Option<RouteSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    #[serde(default)]
    pub summary: Option<RouteSummary>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration_sec: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub transport: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub mode: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub segment_type: Option<String>,
}

impl FeatureProperties {
    /// First non-empty of `transport`, `mode`, `segment_type`, lowercased.
    fn transport_tag(&self) -> String {
        [&self.transport, &self.mode, &self.segment_type]
            .into_iter()
            .flatten()
            .find(|tag| !tag.is_empty())
            .map(|tag| tag.to_lowercase())
            .unwrap_or_default()
    }

    fn is_walk(&self) -> bool {
        let tag = self.transport_tag();
        tag.contains("walk") || tag == "pedestrian"
    }

    fn duration(&self) -> f64 {
        self.summary
            .as_ref()
            .and_then(|s| s.duration_sec)
            .or(self.duration_sec)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub coordinates: Value,
}

impl Geometry {
    /// First `[lng, lat]` pair of a line or multi-line geometry.
    fn leading_point(&self) -> Option<LatLng> {
        let mut first = self.coordinates.as_array()?.first()?;
        if first.as_array()?.first()?.is_array() {
            first = first.as_array()?.first()?;
        }
        let pair = first.as_array()?;
        if pair.len() < 2 {
            return None;
        }
        let point = LatLng::new(pair[1].as_f64()?, pair[0].as_f64()?);
        point.is_valid().then_some(point)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteFeature {
    #[serde(default)]
    pub properties: Option<FeatureProperties>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// A route as returned by the routing service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    #[serde(default)]
    pub properties: Option<RouteProperties>,
    #[serde(default, deserialize_with = "lenient_features")]
    pub features: Vec<RouteFeature>,
}

impl RouteResponse {
    /// Top-level summary, if any.
    pub fn summary(&self) -> Option<&RouteSummary> {
        self.properties.as_ref()?.summary.as_ref()
    }

    /// Total duration: the collection summary, else the first feature's summary.
    pub fn duration_sec(&self) -> Option<f64> {
        if let Some(duration) = self.summary().and_then(|s| s.duration_sec) {
            return Some(duration);
        }
        self.features
            .first()?
            .properties
            .as_ref()?
            .summary
            .as_ref()?
            .duration_sec
    }
}

/// Drive and walk portions of a destination leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DriveWalkSplit {
    pub drive_duration_sec: Option<f64>,
    pub walk_duration_sec: Option<f64>,
    /// Where the walk starts: the first walk feature's leading coordinate
    pub parking_point: Option<LatLng>,
}

impl DriveWalkSplit {
    /// Walk part, when strictly positive.
    pub fn walk(&self) -> Option<f64> {
        self.walk_duration_sec.filter(|w| *w > 0.0)
    }
}

/// Split a route into drive and walk durations using per-feature tags.
pub fn split_drive_and_walk(route: &RouteResponse) -> DriveWalkSplit {
    let mut drive = 0.0;
    let mut walk = 0.0;
    let mut parking_point = None;

    for feature in &route.features {
        let Some(props) = &feature.properties else {
            continue;
        };
        let duration = props.duration();
        if props.is_walk() {
            walk += duration;
            if parking_point.is_none() {
                parking_point = feature.geometry.as_ref().and_then(Geometry::leading_point);
            }
        } else {
            drive += duration;
        }
    }

    let total = route.duration_sec();
    let drive_duration_sec = if drive > 0.0 {
        Some(drive)
    } else if walk > 0.0 {
        total.map(|t| (t - walk).max(0.0))
    } else {
        total
    };

    DriveWalkSplit {
        drive_duration_sec,
        walk_duration_sec: (walk > 0.0).then_some(walk),
        parking_point,
    }
}

/// One-line human summary: `label [transport]: 12.30 km, 15 min 20 s`.
pub fn describe_route(label: &str, request: &RouteRequest, route: &RouteResponse) -> String {
    let summary = route.summary().cloned().unwrap_or_default();
    let transport = summary
        .transport
        .clone()
        .unwrap_or_else(|| request.transport.to_string());
    let mut message = format!(
        "{} [{}]: {}",
        label,
        transport,
        format_distance(summary.distance_m)
    );
    if let Some(duration) = summary.duration_sec {
        message.push_str(", ");
        message.push_str(&format_duration(duration));
    }
    if let Some(error) = summary.error {
        message.push_str(". ");
        message.push_str(&error);
    }
    message
}

pub fn format_distance(distance_m: Option<f64>) -> String {
    match distance_m {
        None => "—".to_string(),
        Some(d) if d >= 1000.0 => format!("{:.2} km", d / 1000.0),
        Some(d) => format!("{} m", d.round()),
    }
}

pub fn format_duration(duration_sec: f64) -> String {
    let minutes = (duration_sec / 60.0).floor();
    let seconds = (duration_sec % 60.0).round();
    if minutes > 0.0 {
        if seconds > 0.0 {
            format!("{} min {} s", minutes, seconds)
        } else {
            format!("{} min", minutes)
        }
    } else {
        format!("{} s", seconds)
    }
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()).filter(|n| n.is_finite()))
}

/// Keep the feature entries that parse; `null` or non-array input is empty.
fn lenient_features<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<RouteFeature>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(entries)) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

pub(crate) fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(str::to_string)))
}
