//! HTTP clients for the meetpoint, route and friends services.
//!
//! One [`ApiClient`] implements all three service traits against the backend
//! at `api_base_url`:
//! - `POST /api/meetpoint`
//! - `POST /api/quick_route`
//! - `GET /api/friends` and `PATCH /api/friends/{id}`
//!
//! Non-2xx responses become [`PlannerError::Http`] carrying the body's `error`
//! field verbatim when present, `HTTP <status>` otherwise.

use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::PlannerConfig;
use crate::error::{PlannerError, Result};
use crate::friends::{FriendsDirectory, FriendsSnapshot};
use crate::meetpoint::{MeetpointRequest, MeetpointService};
use crate::route::{RouteRequest, RouteResponse, RouteService};
use crate::transport::FriendTransport;

/// Idle connections kept per host.
const MAX_IDLE_PER_HOST: usize = 4;

/// Shared client for the planner backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &PlannerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url).map_err(|e| {
            PlannerError::config(format!("invalid api_base_url {:?}: {}", config.api_base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(PlannerError::config(format!(
                "api_base_url {:?} cannot carry a path",
                config.api_base_url
            )));
        }

        let client = Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PlannerError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL with the given path segments appended (each one escaped).
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PlannerError::config("api_base_url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send and return the body of a 2xx response.
    async fn send(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let error = error_from_body(status.as_u16(), &body);
            warn!("[ApiClient] Request failed with {}: {}", status, error);
            return Err(error);
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send(request).await?;
        if body.trim().is_empty() {
            return Err(PlannerError::invalid_response("empty response body"));
        }
        serde_json::from_str(&body)
            .map_err(|e| PlannerError::invalid_response(format!("malformed response: {}", e)))
    }
}

/// Error for a non-2xx response: the body's `error` field, else `HTTP <status>`.
pub fn error_from_body(status: u16, body: &str) -> PlannerError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| match value.get("error") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| format!("HTTP {}", status));
    PlannerError::http(message, Some(status))
}

impl MeetpointService for ApiClient {
    fn find_meetpoint<'a>(&'a self, request: &'a MeetpointRequest) -> BoxFuture<'a, Result<Value>> {
        async move {
            let url = self.endpoint(&["api", "meetpoint"])?;
            debug!("[ApiClient] POST {}", url);
            self.send_json(self.client.post(url).json(request)).await
        }
        .boxed()
    }
}

impl RouteService for ApiClient {
    fn route<'a>(&'a self, request: &'a RouteRequest) -> BoxFuture<'a, Result<RouteResponse>> {
        async move {
            let url = self.endpoint(&["api", "quick_route"])?;
            debug!("[ApiClient] POST {} ({})", url, request.transport);
            self.send_json(self.client.post(url).json(request)).await
        }
        .boxed()
    }
}

impl FriendsDirectory for ApiClient {
    fn list_friends(&self) -> BoxFuture<'_, Result<FriendsSnapshot>> {
        async move {
            let url = self.endpoint(&["api", "friends"])?;
            debug!("[ApiClient] GET {}", url);
            self.send_json(self.client.get(url)).await
        }
        .boxed()
    }

    fn update_transport<'a>(
        &'a self,
        friend_id: &'a str,
        transport: FriendTransport,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let url = self.endpoint(&["api", "friends", friend_id])?;
            debug!("[ApiClient] PATCH {} mode={}", url, transport.as_str());
            let body = json!({ "mode": transport.as_str() });
            self.send(self.client.patch(url).json(&body)).await?;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        let config = PlannerConfig {
            api_base_url: base.to_string(),
            ..PlannerConfig::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_paths() {
        let api = client("http://127.0.0.1:8000");
        assert_eq!(
            api.endpoint(&["api", "meetpoint"]).unwrap().as_str(),
            "http://127.0.0.1:8000/api/meetpoint"
        );

        let prefixed = client("https://planner.example/v2/");
        assert_eq!(
            prefixed.endpoint(&["api", "quick_route"]).unwrap().as_str(),
            "https://planner.example/v2/api/quick_route"
        );
    }

    #[test]
    fn test_friend_id_is_escaped() {
        let api = client("http://127.0.0.1:8000");
        assert_eq!(
            api.endpoint(&["api", "friends", "a/b"]).unwrap().as_str(),
            "http://127.0.0.1:8000/api/friends/a%2Fb"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = PlannerConfig {
            api_base_url: "not a url".to_string(),
            ..PlannerConfig::default()
        };
        assert!(matches!(ApiClient::new(&config), Err(PlannerError::Config { .. })));
    }

    #[test]
    fn test_error_from_body() {
        let err = error_from_body(422, r#"{"error": "need at least one participant"}"#);
        assert_eq!(err.to_string(), "need at least one participant");
        assert_eq!(err.status_code(), Some(422));

        assert_eq!(error_from_body(502, "<html>bad gateway</html>").to_string(), "HTTP 502");
        assert_eq!(error_from_body(500, "{}").to_string(), "HTTP 500");
        assert_eq!(error_from_body(500, "").to_string(), "HTTP 500");
    }
}
