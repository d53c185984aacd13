#![forbid(unsafe_code)]
//! Risk-aware micromobility routing gateway for dense urban riding.
//!
//! Accepts an origin/destination pair plus rider preferences and produces
//! ride-friendly routes annotated with a safety score, an elevation profile,
//! bike-infrastructure coverage, and the hazard zones passed. Shortest paths
//! come from an external Valhalla-compatible engine; the work here is
//! everything above it: biasing the engine toward safer corridors, hard
//! validation against hazard-zone cores, iterative re-routing to escape
//! violations, and measuring the result against ground-truth bike-lane
//! geometry.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), saferoutes::Error> {
//! use std::sync::Arc;
//! use saferoutes::config::Settings;
//! use saferoutes::bike_lanes::{BikeLaneService, SfOpenDataStore};
//! use saferoutes::engine::Valhalla;
//! use saferoutes::models::RouteRequest;
//! use saferoutes::risk_zones::RiskZoneService;
//! use saferoutes::Router;
//! # use saferoutes::risk_zones::ZoneStore;
//! # fn zone_store() -> Arc<dyn ZoneStore> { unimplemented!() }
//!
//! let settings = Settings::from_env()?;
//! let engine = Arc::new(Valhalla::from_settings(&settings)?);
//! let risk_zones = Arc::new(RiskZoneService::new(zone_store(), &settings));
//! let bike_lanes = Arc::new(BikeLaneService::new(
//!     Arc::new(SfOpenDataStore::from_settings(&settings)?),
//!     &settings,
//! ));
//! let router = Router::new(engine, risk_zones, bike_lanes, settings);
//!
//! let request: RouteRequest = serde_json::from_str(
//!     r#"{"origin": {"latitude": 37.795, "longitude": -122.430},
//!         "destination": {"latitude": 37.770, "longitude": -122.400},
//!         "preferences": {"profile": "safest"}}"#,
//! )
//! .expect("valid request");
//! let route = router.calculate(&request).await?;
//! println!("risk score {}", route.summary.risk_score);
//! # Ok(())
//! # }
//! ```

pub mod bike_lanes;
pub mod cache;
pub mod config;
pub mod engine;
mod error;
pub mod geodesy;
pub mod models;
pub mod risk_zones;
mod router;
pub mod shapes;

pub use error::Error;
pub use router::Router;

/// The engine needs `date_time` fields in the `YYYY-MM-DDTHH:MM` format.
pub(crate) fn serialize_naive_date_time_opt<S>(
    value: &Option<chrono::NaiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        None => serializer.serialize_none(),
        Some(value) => serializer.serialize_str(&value.format("%Y-%m-%dT%H:%M").to_string()),
    }
}
