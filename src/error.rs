//! Unified error handling for the planner.
//!
//! Errors are `Clone` so a single meetpoint failure can be handed to every
//! caller awaiting the same shared request.

use thiserror::Error;

/// Unified error type for planner operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlannerError {
    /// Transport failure or non-2xx response from an external service.
    ///
    /// The message is the service's own `error` text when it sent one, so it
    /// can be shown to the user verbatim.
    #[error("{message}")]
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// A service answered 2xx with a body we cannot use
    #[error("{message}")]
    InvalidResponse { message: String },
    /// Coordinates in a trusted response are missing or not numeric
    #[error("invalid meetpoint coordinates: {message}")]
    InvalidCoordinates { message: String },
    /// No participant has usable coordinates
    #[error("no participants with valid coordinates")]
    NoParticipants,
    /// Neither the service, the fallback nor the configuration yielded a meetpoint
    #[error("meetpoint is not configured")]
    NoMeetpoint,
    /// Route building needs a start point
    #[error("start point is not set")]
    MissingStart,
    /// A route leg failed; the run is aborted
    #[error("route request failed ({label}): {message}")]
    RouteFailed { label: String, message: String },
    /// Configuration could not be parsed
    #[error("configuration error: {message}")]
    Config { message: String },
    /// Generic internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl PlannerError {
    pub fn http(message: impl Into<String>, status_code: Option<u16>) -> Self {
        PlannerError::Http {
            message: message.into(),
            status_code,
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        PlannerError::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PlannerError::Config {
            message: message.into(),
        }
    }

    /// HTTP status code, if the error came from a service response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PlannerError::Http { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PlannerError {
    fn from(error: serde_json::Error) -> Self {
        PlannerError::Internal {
            message: format!("serialization failed: {}", error),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for PlannerError {
    fn from(error: reqwest::Error) -> Self {
        PlannerError::Http {
            message: error.to_string(),
            status_code: error.status().map(|status| status.as_u16()),
        }
    }
}

/// Result type alias for planner operations.
pub type Result<T> = std::result::Result<T, PlannerError>;

/// Extension trait for converting Option to PlannerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with the "no meetpoint" error.
    fn ok_or_no_meetpoint(self) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_no_meetpoint(self) -> Result<T> {
        self.ok_or(PlannerError::NoMeetpoint)
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| PlannerError::Internal {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_message_is_verbatim() {
        let err = PlannerError::http("service overloaded", Some(503));
        assert_eq!(err.to_string(), "service overloaded");
        assert_eq!(err.status_code(), Some(503));
    }

    #[test]
    fn test_route_failed_display() {
        let err = PlannerError::RouteFailed {
            label: "User: start → meetpoint".to_string(),
            message: "HTTP 502".to_string(),
        };
        assert!(err.to_string().contains("User: start → meetpoint"));
        assert!(err.to_string().ends_with("HTTP 502"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_no_meetpoint(),
            Err(PlannerError::NoMeetpoint)
        ));
        assert_eq!(Some(3).ok_or_internal("unused"), Ok(3));
    }
}
