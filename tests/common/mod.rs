//! In-memory fakes for the external services.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use serde_json::{json, Value};

use rendezvous_planner::{
    AppState, Friend, FriendTransport, FriendsDirectory, FriendsSnapshot, LatLng,
    MeetpointRequest, MeetpointService, PlannerError, Result, RouteRequest, RouteResponse,
    RouteService,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Meetpoint service
// ============================================================================

struct Scripted {
    gate: Option<oneshot::Receiver<()>>,
    response: Result<Value>,
}

/// Answers from a queue; the last queued answer repeats once the queue drains.
pub struct FakeMeetpoints {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Result<Value>,
    calls: AtomicUsize,
    requests: Mutex<Vec<MeetpointRequest>>,
}

impl FakeMeetpoints {
    pub fn always(response: Result<Value>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: response,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue a response that is held back until the returned sender fires.
    pub fn push_gated(&self, response: Result<Value>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().unwrap().push_back(Scripted {
            gate: Some(rx),
            response,
        });
        tx
    }

    pub fn push(&self, response: Result<Value>) {
        self.queue.lock().unwrap().push_back(Scripted {
            gate: None,
            response,
        });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<MeetpointRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl MeetpointService for FakeMeetpoints {
    fn find_meetpoint<'a>(&'a self, request: &'a MeetpointRequest) -> BoxFuture<'a, Result<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self.queue.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted { gate, response }) => async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                response
            }
            .boxed(),
            None => future::ready(self.fallback.clone()).boxed(),
        }
    }
}

pub fn meetpoint_body(lat: f64, lng: f64) -> Value {
    json!({
        "meetpoint": {"lat": lat, "lng": lng},
        "meta": {"source": "find_meetpoint", "method": "minisum"}
    })
}

// ============================================================================
// Route service
// ============================================================================

type Responder = Box<dyn Fn(&RouteRequest) -> Result<RouteResponse> + Send + Sync>;

pub struct FakeRoutes {
    respond: Responder,
    requests: Mutex<Vec<RouteRequest>>,
}

impl FakeRoutes {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&RouteRequest) -> Result<RouteResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<RouteRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl RouteService for FakeRoutes {
    fn route<'a>(&'a self, request: &'a RouteRequest) -> BoxFuture<'a, Result<RouteResponse>> {
        self.requests.lock().unwrap().push(request.clone());
        future::ready((self.respond)(request)).boxed()
    }
}

pub fn route_with_duration(seconds: f64) -> RouteResponse {
    serde_json::from_value(json!({"properties": {"summary": {"duration_sec": seconds}}})).unwrap()
}

// ============================================================================
// Friends directory
// ============================================================================

pub struct FakeFriends {
    snapshot: FriendsSnapshot,
    fail_updates: bool,
    updates: Mutex<Vec<(String, FriendTransport)>>,
}

impl FakeFriends {
    pub fn new(friends: Vec<Friend>) -> Arc<Self> {
        Self::build(friends, None, false)
    }

    pub fn build(friends: Vec<Friend>, target_z: Option<Value>, fail_updates: bool) -> Arc<Self> {
        Arc::new(Self {
            snapshot: FriendsSnapshot { friends, target_z },
            fail_updates,
            updates: Mutex::new(Vec::new()),
        })
    }

    pub fn updates(&self) -> Vec<(String, FriendTransport)> {
        self.updates.lock().unwrap().clone()
    }
}

impl FriendsDirectory for FakeFriends {
    fn list_friends(&self) -> BoxFuture<'_, Result<FriendsSnapshot>> {
        future::ready(Ok(self.snapshot.clone())).boxed()
    }

    fn update_transport<'a>(
        &'a self,
        friend_id: &'a str,
        transport: FriendTransport,
    ) -> BoxFuture<'a, Result<()>> {
        self.updates
            .lock()
            .unwrap()
            .push((friend_id.to_string(), transport));
        let result = if self.fail_updates {
            Err(PlannerError::http("directory is read-only", Some(503)))
        } else {
            Ok(())
        };
        future::ready(result).boxed()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn friend(id: u64, name: &str, lat: f64, lng: f64, mode: &str) -> Friend {
    Friend {
        friend_id: json!(id),
        name: Some(name.to_string()),
        x_coord: json!(lat),
        y_coord: json!(lng),
        mode: Some(mode.to_string()),
    }
}

pub fn state_with(start: LatLng, friends: Vec<Friend>) -> AppState {
    let mut state = AppState::default();
    state.set_start(start, "Home");
    state.replace_friends(friends);
    state
}
