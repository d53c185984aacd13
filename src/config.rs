use std::env;
use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Default base URL of the shortest-path engine.
pub const DEFAULT_ENGINE_URL: &str = "http://localhost:8002/";
/// SFMTA Bikeway Network feature collection (SF Open Data).
pub const DEFAULT_BIKEWAY_URL: &str =
    "https://data.sfgov.org/resource/ygmz-vaxd.geojson?$limit=10000";

/// Runtime configuration, read once at startup.
///
/// Every knob has a compiled-in default so the gateway comes up with no
/// environment at all; the variables below override individual values.
///
/// | Variable | Field |
/// |---|---|
/// | `VALHALLA_URL` | `engine_base_url` |
/// | `BIKE_LANES_URL` | `bikeway_source_url` |
/// | `ENGINE_TIMEOUT_SECONDS` | `engine_timeout` |
/// | `SNAPSHOT_TTL_SECONDS` | `snapshot_ttl` |
/// | `SNAPSHOT_REFRESH_TIMEOUT_SECONDS` | `refresh_timeout` |
/// | `DEV_MOCK_ROUTES` | `dev_mock_routes` |
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine_base_url: Url,
    pub bikeway_source_url: Url,
    /// Per-call timeout for engine requests. The client does not retry.
    pub engine_timeout: Duration,
    /// How long a risk-zone or bike-lane snapshot stays fresh.
    pub snapshot_ttl: Duration,
    /// Upper bound on a single snapshot refresh; a slower source degrades to
    /// serve-stale rather than holding requests.
    pub refresh_timeout: Duration,
    /// Safety cushion under the engine's 10 000 m exclusion-circumference cap.
    pub exclusion_budget_meters: f64,
    /// When enabled, an unreachable engine yields a synthetic straight-line
    /// route instead of an error. Never enable outside development.
    pub dev_mock_routes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine_base_url: Url::parse(DEFAULT_ENGINE_URL).expect("default engine url is valid"),
            bikeway_source_url: Url::parse(DEFAULT_BIKEWAY_URL)
                .expect("default bikeway url is valid"),
            engine_timeout: Duration::from_secs(30),
            snapshot_ttl: Duration::from_secs(3600),
            refresh_timeout: Duration::from_secs(60),
            exclusion_budget_meters: 9_500.0,
            dev_mock_routes: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, Error> {
        let mut settings = Self::default();
        if let Ok(value) = env::var("VALHALLA_URL") {
            settings.engine_base_url = Url::parse(&value)
                .map_err(|e| Error::Validation(format!("VALHALLA_URL: {e}")))?;
        }
        if let Ok(value) = env::var("BIKE_LANES_URL") {
            settings.bikeway_source_url = Url::parse(&value)
                .map_err(|e| Error::Validation(format!("BIKE_LANES_URL: {e}")))?;
        }
        if let Some(seconds) = parse_seconds("ENGINE_TIMEOUT_SECONDS")? {
            settings.engine_timeout = seconds;
        }
        if let Some(seconds) = parse_seconds("SNAPSHOT_TTL_SECONDS")? {
            settings.snapshot_ttl = seconds;
        }
        if let Some(seconds) = parse_seconds("SNAPSHOT_REFRESH_TIMEOUT_SECONDS")? {
            settings.refresh_timeout = seconds;
        }
        if let Ok(value) = env::var("DEV_MOCK_ROUTES") {
            settings.dev_mock_routes = matches!(value.as_str(), "1" | "true" | "yes");
        }
        Ok(settings)
    }
}

fn parse_seconds(variable: &str) -> Result<Option<Duration>, Error> {
    match env::var(variable) {
        Ok(value) => {
            let seconds: u64 = value
                .parse()
                .map_err(|_| Error::Validation(format!("{variable} must be a whole number of seconds")))?;
            Ok(Some(Duration::from_secs(seconds)))
        }
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.engine_timeout, Duration::from_secs(30));
        assert_eq!(settings.snapshot_ttl, Duration::from_secs(3600));
        assert_eq!(settings.refresh_timeout, Duration::from_secs(60));
        assert_eq!(settings.exclusion_budget_meters, 9_500.0);
        assert!(!settings.dev_mock_routes);
    }
}
