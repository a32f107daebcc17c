//! Timeline synthesis.
//!
//! Walks the user's segments once, advancing a clock by each duration, and
//! derives the gathering, pickup, departure and arrival events from the stage
//! tags. Friends depart so that they reach the meetpoint exactly when the user
//! does.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use thiserror::Error;

use crate::config::PlannerConfig;
use crate::sequencer::{ScheduleData, Stage};

/// How the timeline is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// The user leaves at `now`
    DepartNow,
    /// Everyone reaches point B at this epoch-millisecond timestamp
    ArriveBy(i64),
}

/// Reasons a schedule cannot be rendered. The messages are user-facing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("Route has not been computed yet.")]
    NotComputed,
    #[error("Failed to compute routes: {0}")]
    RunFailed(String),
    #[error("Cannot compute schedule: travel time data is missing.")]
    MissingDuration,
    #[error("Schedule unavailable: no route data.")]
    NoSegments,
    #[error("Cannot compute schedule: no travel time for {0}.")]
    FriendDurationMissing(String),
    #[error("Point B is not set: the schedule only reaches the meetpoint.")]
    NoDestination,
    #[error("Arrival time is earlier than the required departure.")]
    ArrivalBeforeDeparture,
    #[error("Cannot compute schedule: travel times are out of range.")]
    DurationOutOfRange,
}

/// One timeline row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleEntry {
    pub title: String,
    /// Epoch milliseconds
    pub time_ms: i64,
    pub note: Option<String>,
}

impl ScheduleEntry {
    fn new(title: impl Into<String>, time_ms: i64, note: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            time_ms,
            note: Some(note.into()),
        }
    }
}

/// Renders [`ScheduleData`] into a sorted timeline.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSynthesizer {
    offset: FixedOffset,
}

impl Default for ScheduleSynthesizer {
    fn default() -> Self {
        Self::new(&PlannerConfig::default())
    }
}

impl ScheduleSynthesizer {
    pub fn new(config: &PlannerConfig) -> Self {
        Self {
            offset: config.schedule_offset(),
        }
    }

    pub fn render(
        &self,
        data: &ScheduleData,
        mode: ScheduleMode,
        now_ms: i64,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        if !data.ready {
            return Err(match &data.failure {
                Some(failure) => ScheduleError::RunFailed(failure.clone()),
                None => ScheduleError::NotComputed,
            });
        }
        if data.missing_duration {
            return Err(ScheduleError::MissingDuration);
        }
        if matches!(mode, ScheduleMode::ArriveBy(_)) && !data.has_destination {
            return Err(ScheduleError::NoDestination);
        }
        if data.user_segments.is_empty() {
            return Err(ScheduleError::NoSegments);
        }

        let durations_ms = data
            .user_segments
            .iter()
            .map(|s| s.duration_sec.ok_or(ScheduleError::MissingDuration).and_then(seconds_to_ms))
            .collect::<Result<Vec<i64>, ScheduleError>>()?;
        let total_ms = durations_ms
            .iter()
            .try_fold(0i64, |total, ms| total.checked_add(*ms))
            .ok_or(ScheduleError::DurationOutOfRange)?;

        let (start_ms, arrival_ms) = match mode {
            ScheduleMode::DepartNow => (now_ms, None),
            ScheduleMode::ArriveBy(target_ms) => {
                if total_ms > target_ms {
                    return Err(ScheduleError::ArrivalBeforeDeparture);
                }
                let start_ms = target_ms
                    .checked_sub(total_ms)
                    .ok_or(ScheduleError::DurationOutOfRange)?;
                (start_ms, Some(target_ms))
            }
        };

        // Only used when no stop segment was planned
        let stop_ms = seconds_to_ms(data.stop_duration_sec).unwrap_or(0);
        let mut entries = vec![ScheduleEntry::new("You", start_ms, "Start from point A")];
        let mut clock = start_ms;
        let mut pickup_ready = None;
        let mut z_arrival = None;
        let mut z_departure = None;
        let mut walk_start = None;

        for (segment, duration_ms) in data.user_segments.iter().zip(&durations_ms) {
            match segment.stage {
                Stage::Stop => {
                    z_arrival.get_or_insert(clock);
                    entries.push(ScheduleEntry::new(
                        "Gathering and boarding",
                        clock,
                        stop_note(data.stop_duration_sec),
                    ));
                }
                Stage::Walk => walk_start = Some(clock),
                _ => {}
            }
            clock = clock
                .checked_add(*duration_ms)
                .ok_or(ScheduleError::DurationOutOfRange)?;
            match segment.stage {
                Stage::Pickup => pickup_ready = Some(clock),
                Stage::Z => z_arrival = Some(clock),
                Stage::Stop => z_departure = Some(clock),
                _ => {}
            }
        }

        let z_arrival = z_arrival.unwrap_or(clock);
        let z_departure = z_departure.unwrap_or(z_arrival.saturating_add(stop_ms));

        if let (Some(pickup), Some(ready_ms)) = (&data.pickup, pickup_ready) {
            entries.push(ScheduleEntry::new(
                format!("{} (pickup)", pickup.label),
                ready_ms,
                "Be ready for pickup",
            ));
        }

        for friend in &data.friend_segments {
            let name = if friend.name.is_empty() {
                "Friend"
            } else {
                friend.name.as_str()
            };
            let duration_sec = friend
                .duration_sec
                .filter(|d| d.is_finite())
                .ok_or_else(|| ScheduleError::FriendDurationMissing(name.to_string()))?;
            let departure = z_arrival
                .checked_sub(seconds_to_ms(duration_sec)?)
                .ok_or(ScheduleError::DurationOutOfRange)?;
            entries.push(ScheduleEntry::new(
                name,
                departure,
                "Leave now to reach the meetpoint in time",
            ));
        }

        entries.push(ScheduleEntry::new(
            "Gathering at meetpoint",
            z_arrival,
            if data.has_destination {
                "Everyone meets at the meetpoint"
            } else {
                "Arrival along your route"
            },
        ));

        if let Some(walk_ms) = walk_start {
            let mut note = "Leave the car and walk".to_string();
            if let Some(walk_sec) = data.parking.and_then(|p| p.walk_duration_sec) {
                note.push_str(&format!(" (~{} min)", whole_minutes(walk_sec)));
            }
            entries.push(ScheduleEntry::new("Walk from parking", walk_ms, note));
        }

        if data.has_destination {
            entries.push(ScheduleEntry::new(
                "Departure from meetpoint",
                z_departure,
                "After gathering and boarding",
            ));
            entries.push(ScheduleEntry::new(
                "Arrival at point B",
                arrival_ms.unwrap_or(clock),
                "Overall arrival time",
            ));
        }

        entries.sort_by_key(|entry| entry.time_ms);
        Ok(entries)
    }

    /// `dd.mm.yyyy HH:MM` in the configured offset.
    pub fn format_time(&self, time_ms: i64) -> String {
        format_schedule_time(time_ms, self.offset)
    }
}

/// `dd.mm.yyyy HH:MM`; `—` when the timestamp is out of range.
pub fn format_schedule_time(time_ms: i64, offset: FixedOffset) -> String {
    match DateTime::from_timestamp_millis(time_ms) {
        Some(time) => time.with_timezone(&offset).format("%d.%m.%Y %H:%M").to_string(),
        None => "—".to_string(),
    }
}

/// Milliseconds for a finite duration that fits in an `i64`.
fn seconds_to_ms(seconds: f64) -> Result<i64, ScheduleError> {
    let ms = (seconds * 1000.0).round();
    if !ms.is_finite() {
        return Err(ScheduleError::MissingDuration);
    }
    if ms.abs() >= i64::MAX as f64 {
        return Err(ScheduleError::DurationOutOfRange);
    }
    Ok(ms as i64)
}

fn whole_minutes(seconds: f64) -> i64 {
    ((seconds / 60.0).round() as i64).max(1)
}

fn stop_note(stop_duration_sec: f64) -> String {
    format!("{} min", whole_minutes(stop_duration_sec))
}
