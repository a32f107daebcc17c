//! Meetpoint resolution.
//!
//! The resolver asks the meetpoint service for a rendezvous point and falls back
//! to the local geometric median when the service cannot answer. Requests are
//! fingerprinted by their JSON payload:
//! - an identical request that is already in flight is shared, not re-sent
//! - an identical request that already has a result is answered from state
//! - a result whose fingerprint is no longer current is discarded
//!
//! Recalculation triggers are debounced with a cancel-and-restart tokio timer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::{MeetpointType, PlannerConfig};
use crate::error::{PlannerError, Result};
use crate::median::{self, MedianConfig};
use crate::participants::{collect_participants, collect_points, AppState};
use crate::route::lenient_string;
use crate::status_log::StatusLog;
use crate::transport::TransportMode;
use crate::LatLng;

/// Source tag recorded when the local median replaces the service result.
pub const FALLBACK_SOURCE: &str = "geometric_median";

/// Calls the external meetpoint service and returns its raw JSON body.
pub trait MeetpointService: Send + Sync {
    fn find_meetpoint<'a>(&'a self, request: &'a MeetpointRequest) -> BoxFuture<'a, Result<Value>>;
}

// ============================================================================
// Request
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetpointParticipant {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub transport: TransportMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetpointDestination {
    pub lat: f64,
    pub lng: f64,
    pub transport: TransportMode,
}

/// Payload sent to the meetpoint service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetpointRequest {
    pub participants: Vec<MeetpointParticipant>,
    pub type_of_meetpoint: MeetpointType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<MeetpointDestination>,
    pub has_destination: bool,
}

impl MeetpointRequest {
    /// Build the payload for the current state; `None` without participants.
    pub fn from_state(state: &AppState, type_of_meetpoint: MeetpointType) -> Option<Self> {
        let participants: Vec<MeetpointParticipant> = collect_participants(state)
            .into_iter()
            .map(|p| MeetpointParticipant {
                id: p.id.to_string(),
                lat: p.position.lat,
                lng: p.position.lng,
                transport: p.transport,
            })
            .collect();
        if participants.is_empty() {
            return None;
        }

        let destination = state.valid_destination().map(|d| MeetpointDestination {
            lat: d.point.lat,
            lng: d.point.lng,
            transport: state.transport,
        });

        Some(Self {
            participants,
            type_of_meetpoint,
            has_destination: destination.is_some(),
            destination,
        })
    }

    /// Deterministic fingerprint: the serialized payload.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn positions(&self) -> Vec<LatLng> {
        self.participants
            .iter()
            .map(|p| LatLng::new(p.lat, p.lng))
            .collect()
    }
}

// ============================================================================
// Response
// ============================================================================

/// Provenance of a resolved meetpoint.
///
/// Each field is read on its own: a mistyped or `null` field becomes `None`
/// (or `false`) without discarding its siblings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeetpointMeta {
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub method: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub fallback_used: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub fallback_reason: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub type_of_meetpoint: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub participant_count: Option<u64>,
    /// Any additional fields the service reports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MeetpointMeta {
    /// Metadata for a locally computed fallback point.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            source: Some(FALLBACK_SOURCE.to_string()),
            fallback_used: true,
            fallback_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn source_or_unknown(&self) -> &str {
        self.source.as_deref().unwrap_or("unknown")
    }

    /// `method`, else `type_of_meetpoint`, else `source`.
    pub fn method_label(&self) -> Option<&str> {
        self.method
            .as_deref()
            .or(self.type_of_meetpoint.as_deref())
            .or(self.source.as_deref())
    }

    fn signature(&self) -> String {
        format!(
            "{}|{}",
            self.source_or_unknown(),
            if self.fallback_used { '1' } else { '0' }
        )
    }

    fn notice(&self) -> String {
        let mut message = format!("Meetpoint resolved: {}", self.source_or_unknown());
        if self.fallback_used {
            match &self.fallback_reason {
                Some(reason) if !reason.is_empty() => message.push_str(&format!(" ({})", reason)),
                _ => message.push_str(" (fallback)"),
            }
        }
        message
    }
}

/// JSON truthiness: `false`, `null`, `0`, `NaN` and `""` are false.
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    })
}

/// Non-negative whole numbers, including integral floats such as `3.0`.
fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_u64().or_else(|| {
            v.as_f64()
                .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
                .map(|n| n as u64)
        })
    }))
}

/// Parse a service body `{meetpoint: {lat, lng}, meta: {...}}`.
///
/// Missing coordinates and non-numeric coordinates are errors. A `meta` that
/// is not an object is replaced by the default.
pub fn parse_meetpoint_response(body: &Value) -> Result<(LatLng, MeetpointMeta)> {
    let meetpoint = body
        .get("meetpoint")
        .filter(|m| m.is_object())
        .ok_or_else(|| PlannerError::invalid_response("invalid meetpoint response"))?;
    let (Some(lat), Some(lng)) = (meetpoint.get("lat"), meetpoint.get("lng")) else {
        return Err(PlannerError::invalid_response("invalid meetpoint response"));
    };
    let point = LatLng::from_loose(lat, lng).ok_or_else(|| PlannerError::InvalidCoordinates {
        message: format!("lat={}, lng={}", lat, lng),
    })?;

    let meta = body
        .get("meta")
        .cloned()
        .and_then(|m| serde_json::from_value::<MeetpointMeta>(m).ok())
        .unwrap_or_default();
    Ok((point, meta))
}

// ============================================================================
// State
// ============================================================================

/// Snapshot of the resolver's cached outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeetpointState {
    /// Fingerprint of the last submitted request
    pub key: Option<String>,
    pub point: Option<LatLng>,
    pub meta: Option<MeetpointMeta>,
    /// Last service error, kept even when the fallback succeeded
    pub error: Option<String>,
    pub last_logged_signature: Option<String>,
}

impl MeetpointState {
    /// Notice for `meta` unless the same outcome was already announced.
    fn take_notice(&mut self, meta: &MeetpointMeta) -> Option<String> {
        let signature = meta.signature();
        if self.last_logged_signature.as_deref() == Some(signature.as_str()) {
            return None;
        }
        self.last_logged_signature = Some(signature);
        Some(meta.notice())
    }
}

/// The meetpoint chosen for a route run and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub point: LatLng,
    /// `meta.source`, `meetpoint`, `dynamic`, `config` or `cached`
    pub source: String,
    pub method: Option<String>,
    /// Local estimate computed while resolving, when one was needed
    pub dynamic_point: Option<LatLng>,
}

type SharedRequest = Shared<BoxFuture<'static, Result<Option<LatLng>>>>;

struct PendingRequest {
    key: String,
    generation: u64,
    future: SharedRequest,
}

#[derive(Default)]
struct ResolverCore {
    state: MeetpointState,
    pending: Option<PendingRequest>,
    generation: u64,
}

struct Inner {
    service: Arc<dyn MeetpointService>,
    meetpoint_type: MeetpointType,
    median: MedianConfig,
    debounce: Duration,
    fallback_meetpoint: Option<LatLng>,
    status: StatusLog,
    core: Mutex<ResolverCore>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ResolverCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn resolve(
        self: Arc<Self>,
        request: MeetpointRequest,
        key: String,
        generation: u64,
    ) -> Result<Option<LatLng>> {
        debug!(
            "[MeetpointResolver] Requesting meetpoint for {} participants",
            request.participants.len()
        );
        let outcome = self
            .service
            .find_meetpoint(&request)
            .await
            .and_then(|body| parse_meetpoint_response(&body));

        let mut notices = Vec::new();
        let result = {
            let mut core = self.lock();
            if core.pending.as_ref().map_or(false, |p| p.generation == generation) {
                core.pending = None;
            }

            if core.state.key.as_deref() != Some(key.as_str()) {
                debug!("[MeetpointResolver] Discarding stale meetpoint result");
                return Ok(core.state.point);
            }

            match outcome {
                Ok((point, meta)) => {
                    core.state.point = Some(point);
                    core.state.error = None;
                    notices.extend(core.state.take_notice(&meta));
                    core.state.meta = Some(meta);
                    Ok(Some(point))
                }
                Err(error) => {
                    let reason = error.to_string();
                    core.state.error = Some(reason.clone());
                    match median::solve_with(&request.positions(), &self.median) {
                        Some(fallback) => {
                            warn!("[MeetpointResolver] Service failed, using local median: {}", reason);
                            let meta = MeetpointMeta::fallback(reason.clone());
                            core.state.point = Some(fallback);
                            core.state.last_logged_signature = None;
                            notices.push(format!("Failed to fetch meetpoint from server: {}", reason));
                            notices.push("Using local geometric median of participants.".to_string());
                            notices.extend(core.state.take_notice(&meta));
                            core.state.meta = Some(meta);
                            Ok(Some(fallback))
                        }
                        None => {
                            core.state.point = None;
                            core.state.meta = None;
                            Err(error)
                        }
                    }
                }
            }
        };

        for notice in notices {
            self.status.push(notice);
        }
        result
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves the group meetpoint. Clones share state.
#[derive(Clone)]
pub struct MeetpointResolver {
    inner: Arc<Inner>,
}

impl MeetpointResolver {
    pub fn new(service: Arc<dyn MeetpointService>, config: &PlannerConfig, status: StatusLog) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                meetpoint_type: config.meetpoint_type(),
                median: config.median,
                debounce: config.debounce(),
                fallback_meetpoint: config.fallback_meetpoint.filter(LatLng::is_valid),
                status,
                core: Mutex::new(ResolverCore::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn build_request(&self, state: &AppState) -> Option<MeetpointRequest> {
        MeetpointRequest::from_state(state, self.inner.meetpoint_type)
    }

    /// Resolve the meetpoint for the current state.
    ///
    /// Without `force`, an identical request already in flight is shared and an
    /// identical request with a stored result is answered immediately.
    pub fn request_update(
        &self,
        state: &AppState,
        force: bool,
    ) -> BoxFuture<'static, Result<Option<LatLng>>> {
        self.submit(self.build_request(state), force)
    }

    /// Submit a prepared request. `None` clears all meetpoint state.
    pub fn submit(
        &self,
        request: Option<MeetpointRequest>,
        force: bool,
    ) -> BoxFuture<'static, Result<Option<LatLng>>> {
        let Some(request) = request else {
            self.clear_cached();
            return future::ready(Ok(None)).boxed();
        };
        let key = match request.fingerprint() {
            Ok(key) => key,
            Err(error) => return future::ready(Err(error)).boxed(),
        };

        let mut core = self.inner.lock();
        if !force {
            if let Some(pending) = core.pending.as_ref().filter(|p| p.key == key) {
                debug!("[MeetpointResolver] Joining in-flight request");
                return pending.future.clone().boxed();
            }
            if core.state.key.as_deref() == Some(key.as_str()) {
                if let Some(point) = core.state.point {
                    return future::ready(Ok(Some(point))).boxed();
                }
            }
        }

        core.generation += 1;
        let generation = core.generation;
        core.state.key = Some(key.clone());
        core.state.error = None;

        let request_future = Arc::clone(&self.inner)
            .resolve(request, key.clone(), generation)
            .boxed()
            .shared();
        core.pending = Some(PendingRequest {
            key,
            generation,
            future: request_future.clone(),
        });
        request_future.boxed()
    }

    /// Debounced recalculation: every call restarts the quiet period and only
    /// the last payload is submitted.
    pub fn schedule_recalculation(&self, state: &AppState, force: bool) {
        let request = self.build_request(state);
        let Ok(handle) = Handle::try_current() else {
            warn!("[MeetpointResolver] No async runtime, recalculation skipped");
            return;
        };

        let resolver = self.clone();
        let delay = self.inner.debounce;
        let mut timer = self.lock_timer();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let update = resolver.submit(request, force);
            // Detached so a later trigger aborting this timer cannot cancel it
            tokio::spawn(async move {
                if let Err(error) = update.await {
                    warn!("[MeetpointResolver] Recalculation failed: {}", error);
                }
            });
        }));
    }

    /// Drop a pending debounced recalculation.
    pub fn cancel_recalculation(&self) {
        if let Some(previous) = self.lock_timer().take() {
            previous.abort();
        }
    }

    /// Resolved point, else the local median of the current participants.
    pub fn current_dynamic_estimate(&self, state: &AppState) -> Option<LatLng> {
        if let Some(point) = self.inner.lock().state.point.filter(LatLng::is_valid) {
            return Some(point);
        }
        median::solve_with(&collect_points(state), &self.inner.median).filter(LatLng::is_valid)
    }

    /// Pick the meetpoint to route to and record it in `state`.
    ///
    /// Order: resolved meetpoint, dynamic estimate, configured fallback,
    /// previously known target.
    pub fn resolve_target(&self, state: &mut AppState) -> Option<ResolvedTarget> {
        let (resolved, meta) = {
            let core = self.inner.lock();
            (
                core.state.point.filter(LatLng::is_valid),
                core.state.meta.clone(),
            )
        };

        let mut dynamic_point = None;
        let chosen = if let Some(point) = resolved {
            let source = meta
                .as_ref()
                .and_then(|m| m.source.clone())
                .unwrap_or_else(|| "meetpoint".to_string());
            Some((point, source))
        } else {
            dynamic_point = self.current_dynamic_estimate(state);
            dynamic_point
                .map(|p| (p, "dynamic".to_string()))
                .or_else(|| self.inner.fallback_meetpoint.map(|p| (p, "config".to_string())))
                .or_else(|| {
                    state
                        .target_z
                        .filter(LatLng::is_valid)
                        .map(|p| (p, "cached".to_string()))
                })
        };

        let Some((point, source)) = chosen else {
            state.observe_target(None);
            return None;
        };
        state.observe_target(Some(point));

        let method = resolved
            .and(meta.as_ref())
            .and_then(|m| m.method_label().map(str::to_string));
        info!("[MeetpointResolver] Routing to {} ({})", point.cache_key(), source);
        Some(ResolvedTarget {
            point,
            source,
            method,
            dynamic_point,
        })
    }

    pub fn state(&self) -> MeetpointState {
        self.inner.lock().state.clone()
    }

    /// Forget every cached result, the pending request, any queued
    /// recalculation and the target recorded on `state`.
    pub fn clear(&self, state: &mut AppState) {
        self.cancel_recalculation();
        self.clear_cached();
        state.clear_target();
    }

    /// React to a participant change: with nobody left everything is cleared
    /// at once, otherwise a recalculation is queued.
    pub fn participants_changed(&self, state: &mut AppState) {
        if collect_participants(state).is_empty() {
            debug!("[MeetpointResolver] No participants left, clearing meetpoint");
            self.clear(state);
        } else {
            self.schedule_recalculation(state, false);
        }
    }

    fn clear_cached(&self) {
        let mut core = self.inner.lock();
        core.state = MeetpointState::default();
        core.pending = None;
    }

    pub fn status(&self) -> &StatusLog {
        &self.inner.status
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
