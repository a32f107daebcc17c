//! Planner configuration.
//!
//! Defaults mirror the behaviour of the hosted trip planner; every field can be
//! overridden from a JSON document or from `PLANNER_*` environment variables.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::median::MedianConfig;
use crate::LatLng;

/// Objective the meetpoint service optimises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetpointType {
    /// Minimise the summed travel time of all participants
    #[default]
    Minisum,
    /// Minimise the longest individual travel time
    Minimax,
}

impl MeetpointType {
    /// Parse a configured value; anything unrecognised falls back to `minisum`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "minimax" => MeetpointType::Minimax,
            _ => MeetpointType::Minisum,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeetpointType::Minisum => "minisum",
            MeetpointType::Minimax => "minimax",
        }
    }
}

/// Configuration for the planner and its service clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Base URL of the backend exposing `/api/meetpoint`, `/api/quick_route`
    /// and `/api/friends`.
    /// Default: "http://127.0.0.1:8000"
    pub api_base_url: String,

    /// Per-request timeout for the HTTP clients.
    /// Default: 30 seconds
    pub request_timeout_secs: u64,

    /// Meetpoint objective sent to the service (`minisum` or `minimax`).
    /// Unknown values are treated as `minisum`.
    pub meetpoint_type: String,

    /// Quiet period before a burst of recalculation triggers is resolved.
    /// Default: 250 ms
    pub debounce_ms: u64,

    /// Group gathering/boarding dwell at the meetpoint.
    /// Default: 180 seconds
    pub stop_duration_sec: f64,

    /// Local geometric-median fallback tunables.
    pub median: MedianConfig,

    /// Maximum cached routes per friend (one per distinct meetpoint/transport).
    /// Default: 64
    pub friend_route_cache_capacity: usize,

    /// Meetpoint to use when neither the service nor any participant yields one.
    /// Default: none
    pub fallback_meetpoint: Option<LatLng>,

    /// Offset applied when formatting schedule times.
    /// Default: 0 (UTC)
    pub schedule_utc_offset_minutes: i32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 30,
            meetpoint_type: MeetpointType::Minisum.as_str().to_string(),
            debounce_ms: 250,
            stop_duration_sec: 180.0,
            median: MedianConfig::default(),
            friend_route_cache_capacity: 64,
            fallback_meetpoint: None,
            schedule_utc_offset_minutes: 0,
        }
    }
}

impl PlannerConfig {
    /// Parse a JSON configuration document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PlannerError::config(e.to_string()))
    }

    /// Defaults overlaid with `PLANNER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from a key lookup (environment-style names).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PLANNER_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(value) = lookup("PLANNER_MEETPOINT_TYPE") {
            self.meetpoint_type = value;
        }
        if let Some(value) = lookup("PLANNER_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_var("PLANNER_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("PLANNER_DEBOUNCE_MS") {
            self.debounce_ms = parse_var("PLANNER_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = lookup("PLANNER_STOP_DURATION_SEC") {
            self.stop_duration_sec = parse_var("PLANNER_STOP_DURATION_SEC", &value)?;
        }
        if let Some(value) = lookup("PLANNER_UTC_OFFSET_MINUTES") {
            self.schedule_utc_offset_minutes = parse_var("PLANNER_UTC_OFFSET_MINUTES", &value)?;
        }
        Ok(self)
    }

    pub fn meetpoint_type(&self) -> MeetpointType {
        MeetpointType::parse_lenient(&self.meetpoint_type)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Offset used for schedule labels; out-of-range values fall back to UTC.
    pub fn schedule_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.schedule_utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PlannerError::config(format!("{}={:?}: {}", key, value, e)))
}
