use thiserror::Error;

/// Failure taxonomy for the routing gateway.
///
/// Variants are deliberately coarse: each one maps to exactly one upstream
/// HTTP status (422/503/500) and one propagation rule, so callers can match
/// on the kind instead of string-matching messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request input: out-of-range coordinates, a bad bounding box
    /// string, a radius outside its allowed window.
    #[error("validation error: {0}")]
    Validation(String),

    /// The engine accepted the request but could not find a path.
    #[error("no route found: {0}")]
    RouteNotFound(String),

    /// Transport failure, timeout, or 5xx from the shortest-path engine.
    #[error("routing engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine responded with a body this client does not understand.
    #[error("routing engine protocol error: {0}")]
    EngineProtocol(String),

    /// Risk-zone data is gone and there is no cached snapshot.
    ///
    /// Callers must fail the request rather than route without hazard data;
    /// substituting an empty zone list would silently produce an unsafe route.
    #[error("risk zone data unavailable: {0}")]
    RiskZoneUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable error code for the boundary layer's error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::RouteNotFound(_) => "ROUTING_ERROR",
            Error::EngineUnavailable(_)
            | Error::EngineProtocol(_)
            | Error::RiskZoneUnavailable(_) => "SERVICE_UNAVAILABLE",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message.
    ///
    /// Anything that smells like internals (filesystem paths, SQL fragments,
    /// driver names, credentials) is replaced wholesale with a generic phrase;
    /// the detailed message stays available for logs via `Display`.
    pub fn safe_message(&self) -> String {
        let detail = self.to_string();
        if looks_sensitive(&detail) {
            match self {
                Error::Validation(_) => "invalid request".to_owned(),
                Error::RouteNotFound(_) => "no route could be found".to_owned(),
                Error::EngineUnavailable(_) | Error::EngineProtocol(_) => {
                    "routing service temporarily unavailable".to_owned()
                }
                Error::RiskZoneUnavailable(_) => {
                    "safety data temporarily unavailable".to_owned()
                }
                Error::Internal(_) => "internal error".to_owned(),
            }
        } else {
            detail
        }
    }
}

fn looks_sensitive(message: &str) -> bool {
    const MARKERS: &[&str] = &[
        "/src/",
        "/home/",
        "/usr/",
        ".rs:",
        "SELECT ",
        "INSERT ",
        "postgres://",
        "postgresql",
        "sqlx",
        "password",
        "secret",
        "Bearer ",
    ];
    MARKERS.iter().any(|m| message.contains(m))
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::EngineProtocol(e.to_string())
        } else {
            Error::EngineUnavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::RouteNotFound("x".into()).code(), "ROUTING_ERROR");
        assert_eq!(
            Error::EngineUnavailable("x".into()).code(),
            "SERVICE_UNAVAILABLE"
        );
        assert_eq!(
            Error::RiskZoneUnavailable("x".into()).code(),
            "SERVICE_UNAVAILABLE"
        );
        assert_eq!(Error::Internal("x".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn sanitizes_leaky_messages() {
        let e = Error::Internal("connect failed: postgres://user:password@db/safety".into());
        assert_eq!(e.safe_message(), "internal error");

        let e = Error::EngineUnavailable("panicked at /home/app/src/engine.rs:42".into());
        assert_eq!(e.safe_message(), "routing service temporarily unavailable");
    }

    #[test]
    fn keeps_clean_messages() {
        let e = Error::RouteNotFound("no path between the given locations".into());
        assert_eq!(e.safe_message(), "no route found: no path between the given locations");
    }
}
