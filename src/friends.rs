//! Friends directory contract and friend-state operations.

use futures::future::BoxFuture;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OptionExt, Result};
use crate::meetpoint::MeetpointResolver;
use crate::participants::{AppState, Friend};
use crate::transport::FriendTransport;
use crate::LatLng;

/// Body of the friends listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FriendsSnapshot {
    #[serde(default)]
    pub friends: Vec<Friend>,
    /// Server-suggested meetpoint `{lat, lng}`, loosely typed
    #[serde(default)]
    pub target_z: Option<Value>,
}

/// External store of friend records.
pub trait FriendsDirectory: Send + Sync {
    fn list_friends(&self) -> BoxFuture<'_, Result<FriendsSnapshot>>;

    fn update_transport<'a>(
        &'a self,
        friend_id: &'a str,
        transport: FriendTransport,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Reload the friends list and reconcile per-friend state.
///
/// Returns the number of friends loaded and schedules a meetpoint
/// recalculation.
pub async fn load_friends(
    state: &mut AppState,
    directory: &dyn FriendsDirectory,
    resolver: &MeetpointResolver,
) -> Result<usize> {
    let snapshot = match directory.list_friends().await {
        Ok(snapshot) => snapshot,
        Err(error) => {
            resolver
                .status()
                .push(format!("Failed to load friends: {}", error));
            return Err(error);
        }
    };

    state.replace_friends(snapshot.friends);
    if let Some(target) = snapshot.target_z.as_ref().and_then(LatLng::from_json_object) {
        debug!("[Friends] Server suggested meetpoint {}", target.cache_key());
        state.observe_target(Some(target));
    }

    let count = state.friends.len();
    resolver.status().push(format!("Loaded {} friends", count));
    resolver.schedule_recalculation(state, false);
    Ok(count)
}

/// Change a friend's transport and persist it.
///
/// The local change is applied first. If the directory rejects it, the previous
/// mode (or public transport) is restored and the error is returned.
pub async fn set_friend_transport(
    state: &mut AppState,
    directory: &dyn FriendsDirectory,
    resolver: &MeetpointResolver,
    friend_id: &str,
    transport: FriendTransport,
) -> Result<()> {
    let index = state
        .friend_index(friend_id)
        .ok_or_internal(&format!("unknown friend {}", friend_id))?;
    let previous = state.friends[index].mode.clone();
    apply_transport(state, index, friend_id, transport);
    resolver.schedule_recalculation(state, false);

    if let Err(error) = directory.update_transport(friend_id, transport).await {
        let restored = previous
            .filter(|mode| !mode.is_empty())
            .unwrap_or_else(|| FriendTransport::PublicTransport.as_str().to_string());
        apply_transport(state, index, friend_id, FriendTransport::from_mode(Some(restored.as_str())));
        state.friends[index].mode = Some(restored);

        let name = state.friends[index].display_name();
        resolver
            .status()
            .push(format!("Failed to save transport for {}: {}", name, error));
        resolver.schedule_recalculation(state, false);
        return Err(error);
    }

    let name = state.friends[index].display_name();
    resolver
        .status()
        .push(format!("Transport for {}: {}", name, transport.label()));
    Ok(())
}

/// Advance a friend to the next transport option and persist it.
pub async fn cycle_friend_transport(
    state: &mut AppState,
    directory: &dyn FriendsDirectory,
    resolver: &MeetpointResolver,
    friend_id: &str,
) -> Result<FriendTransport> {
    let friend = state
        .friend(friend_id)
        .ok_or_internal(&format!("unknown friend {}", friend_id))?;
    let next = state.friend_transport(friend).next();
    set_friend_transport(state, directory, resolver, friend_id, next).await?;
    Ok(next)
}

/// Flip a friend's inclusion and refresh the meetpoint.
pub fn toggle_friend_included(
    state: &mut AppState,
    resolver: &MeetpointResolver,
    friend_id: &str,
) -> Option<bool> {
    let included = state.toggle_friend_included(friend_id)?;
    resolver.participants_changed(state);
    Some(included)
}

fn apply_transport(state: &mut AppState, index: usize, friend_id: &str, transport: FriendTransport) {
    state.friends[index].mode = Some(transport.as_str().to_string());
    if let Some(friend_state) = state.friend_state_mut(friend_id) {
        friend_state.transport = transport;
    }
}
