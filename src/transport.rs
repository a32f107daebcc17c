//! Transport modes understood by the routing and meetpoint services.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Public transport vehicle types requested when the user selects none.
pub const DEFAULT_PUBLIC_TRANSPORT_MODES: [&str; 5] =
    ["bus", "tram", "trolleybus", "metro", "shuttle_bus"];

/// Transport mode as sent to the route and meetpoint services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    #[default]
    Driving,
    Taxi,
    PublicTransport,
    Walking,
    Bicycle,
    Scooter,
    Motorcycle,
    Truck,
    Emergency,
}

/// Free-form mode names (as stored in friend records) mapped to transport modes.
static TRANSPORT_ALIASES: Lazy<HashMap<&'static str, TransportMode>> = Lazy::new(|| {
    HashMap::from([
        ("car", TransportMode::Driving),
        ("driving", TransportMode::Driving),
        ("taxi", TransportMode::Taxi),
        ("public_transport", TransportMode::PublicTransport),
        ("bus", TransportMode::PublicTransport),
        ("walking", TransportMode::Walking),
        ("pedestrian", TransportMode::Walking),
        ("bike", TransportMode::Bicycle),
        ("bicycle", TransportMode::Bicycle),
        ("scooter", TransportMode::Scooter),
        ("motorcycle", TransportMode::Motorcycle),
        ("truck", TransportMode::Truck),
        ("emergency", TransportMode::Emergency),
    ])
});

impl TransportMode {
    /// Map a free-form mode name; unknown or empty names mean driving.
    pub fn from_alias(mode: &str) -> Self {
        TRANSPORT_ALIASES
            .get(mode.trim().to_lowercase().as_str())
            .copied()
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Driving => "driving",
            TransportMode::Taxi => "taxi",
            TransportMode::PublicTransport => "public_transport",
            TransportMode::Walking => "walking",
            TransportMode::Bicycle => "bicycle",
            TransportMode::Scooter => "scooter",
            TransportMode::Motorcycle => "motorcycle",
            TransportMode::Truck => "truck",
            TransportMode::Emergency => "emergency",
        }
    }

    pub fn is_public_transport(&self) -> bool {
        matches!(self, TransportMode::PublicTransport)
    }

    /// Route filters the routing service accepts for this mode.
    pub fn allowed_filters(&self) -> &'static [&'static str] {
        match self {
            TransportMode::Driving
            | TransportMode::Taxi
            | TransportMode::Motorcycle
            | TransportMode::Truck
            | TransportMode::Emergency => &["dirt_road", "toll_road", "ferry"],
            TransportMode::Bicycle | TransportMode::Scooter => {
                &["dirt_road", "ban_car_road", "ban_stairway", "ferry", "highway"]
            }
            TransportMode::Walking => &["dirt_road", "ban_stairway", "ferry", "highway"],
            TransportMode::PublicTransport => &[],
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The transport choices a friend can cycle through in the friends panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendTransport {
    #[default]
    PublicTransport,
    Car,
    Walking,
    Bicycle,
}

impl FriendTransport {
    pub const ALL: [FriendTransport; 4] = [
        FriendTransport::PublicTransport,
        FriendTransport::Car,
        FriendTransport::Walking,
        FriendTransport::Bicycle,
    ];

    /// Match a stored mode name exactly; anything else is public transport.
    pub fn from_mode(mode: Option<&str>) -> Self {
        let normalized = mode.unwrap_or_default().trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|option| option.as_str() == normalized)
            .unwrap_or_default()
    }

    /// Wire name persisted in the friends directory.
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendTransport::PublicTransport => "public_transport",
            FriendTransport::Car => "car",
            FriendTransport::Walking => "walking",
            FriendTransport::Bicycle => "bicycle",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FriendTransport::PublicTransport => "Public transport",
            FriendTransport::Car => "Car",
            FriendTransport::Walking => "Walking",
            FriendTransport::Bicycle => "Bicycle",
        }
    }

    /// Next option in panel order, wrapping around.
    pub fn next(&self) -> Self {
        let index = Self::ALL
            .iter()
            .position(|option| option == self)
            .unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn transport_mode(&self) -> TransportMode {
        TransportMode::from_alias(self.as_str())
    }
}
