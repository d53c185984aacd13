//! Thin asynchronous client for the Valhalla-compatible shortest-path
//! engine. Only the two endpoints the gateway drives are exposed: `/route`
//! and `/trace_attributes`.
//!
//! The client applies a per-call timeout and never retries; transport
//! failures and engine 5xx responses surface as [`Error::EngineUnavailable`],
//! malformed bodies as [`Error::EngineProtocol`], and engine-rejected
//! requests (no path between the locations) as [`Error::RouteNotFound`].

pub mod costing;
pub mod route;
pub mod trace;

use async_trait::async_trait;
use log::trace;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::Error;

/// The engine endpoints the orchestrator calls, as a trait so tests can
/// script responses without a network.
#[async_trait]
pub trait EngineApi: Send + Sync {
    async fn route(&self, manifest: route::Manifest) -> Result<route::Response, Error>;

    async fn trace_attributes(&self, manifest: trace::Manifest)
        -> Result<trace::Response, Error>;
}

/// Error body the engine returns alongside 4xx statuses.
#[derive(Debug, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct Valhalla {
    client: reqwest::Client,
    base_url: url::Url,
}

impl Valhalla {
    pub fn new(base_url: url::Url, timeout: std::time::Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        Self::new(settings.engine_base_url.clone(), settings.engine_timeout)
    }

    async fn do_request<Resp: for<'de> serde::Deserialize<'de>>(
        &self,
        manifest: &impl serde::Serialize,
        path: &'static str,
        name: &'static str,
    ) -> Result<Resp, Error> {
        if log::log_enabled!(log::Level::Trace) {
            if let Ok(request) = serde_json::to_string(manifest) {
                trace!("Sending {name} request: {request}");
            }
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Internal("engine base url cannot be a base".to_owned()))?
            .push(path);

        let response = self
            .client
            .post(url)
            .json(manifest)
            .send()
            .await
            .map_err(|e| Error::EngineUnavailable(format!("{name} request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::EngineUnavailable(format!(
                "engine returned {status} for {name}"
            )));
        }
        if status.is_client_error() {
            let remote: RemoteError = response
                .json()
                .await
                .map_err(|e| Error::EngineProtocol(format!("unreadable {name} error body: {e}")))?;
            return Err(Error::RouteNotFound(remote.error));
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::EngineUnavailable(format!("{name} response truncated: {e}")))?;
        trace!("{name} responded: {text}");
        serde_json::from_str(&text)
            .map_err(|e| Error::EngineProtocol(format!("{name} response did not parse: {e}")))
    }
}

#[async_trait]
impl EngineApi for Valhalla {
    async fn route(&self, manifest: route::Manifest) -> Result<route::Response, Error> {
        self.do_request(&manifest, "route", "route").await
    }

    async fn trace_attributes(
        &self,
        manifest: trace::Manifest,
    ) -> Result<trace::Response, Error> {
        self.do_request(&manifest, "trace_attributes", "trace_attributes")
            .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remote_error_parses_engine_rejection() {
        let remote: RemoteError = serde_json::from_value(serde_json::json!({
            "error_code": 442,
            "error": "No path could be found for input",
            "status_code": 400,
            "status": "Bad Request"
        }))
        .unwrap();
        assert_eq!(remote.error_code, 442);
        assert_eq!(remote.error, "No path could be found for input");
    }
}
