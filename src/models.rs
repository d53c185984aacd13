//! Rider-facing wire types: requests, preferences, and the annotated route
//! response. All coordinates are WGS84; geometries are GeoJSON axis order.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// A WGS84 coordinate as it appears on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::Validation(format!(
                "latitude {} out of range [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::Validation(format!(
                "longitude {} out of range [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }

    /// The `[lon, lat]` array form used by geometry code.
    pub fn lon_lat(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeoJsonLineString {
    #[serde(rename = "type", default = "linestring_tag")]
    kind: String,
    pub coordinates: Vec<[f64; 2]>,
}

fn linestring_tag() -> String {
    "LineString".to_owned()
}

impl GeoJsonLineString {
    pub fn new(coordinates: Vec<[f64; 2]>) -> Self {
        Self {
            kind: linestring_tag(),
            coordinates,
        }
    }
}

/// `"minLon,minLat,maxLon,maxLat"` query-string form; any other arity or a
/// non-numeric field is a validation error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl FromStr for BoundingBox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| Error::Validation(format!("malformed bounding box: {s:?}")))?;
        if parts.len() != 4 {
            return Err(Error::Validation(
                "bounding box needs exactly minLon,minLat,maxLon,maxLat".to_owned(),
            ));
        }
        Ok(Self {
            min_lon: parts[0],
            min_lat: parts[1],
            max_lon: parts[2],
            max_lat: parts[3],
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    /// Stand-up scooters route like bicycles on the engine side.
    #[default]
    Scooter,
    Bike,
    Ebike,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouteProfile {
    Safest,
    Fastest,
    #[default]
    Balanced,
    Scenic,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RoutePreferences {
    pub profile: RouteProfile,
    pub avoid_hills: bool,
    /// Maximum acceptable grade, percent in `[0, 30]`.
    pub max_grade_percent: f64,
    pub prefer_bike_lanes: bool,
    /// Weight for bike-lane preference, `[0, 1]`.
    pub bike_lane_weight: f64,
}

impl Default for RoutePreferences {
    fn default() -> Self {
        Self {
            profile: RouteProfile::default(),
            avoid_hills: false,
            max_grade_percent: 15.0,
            prefer_bike_lanes: true,
            bike_lane_weight: 0.7,
        }
    }
}

impl RoutePreferences {
    pub fn validate(&self) -> Result<(), Error> {
        if !(0.0..=30.0).contains(&self.max_grade_percent) {
            return Err(Error::Validation(
                "max_grade_percent must be within [0, 30]".to_owned(),
            ));
        }
        if !(0.0..=1.0).contains(&self.bike_lane_weight) {
            return Err(Error::Validation(
                "bike_lane_weight must be within [0, 1]".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
    #[serde(default)]
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub preferences: RoutePreferences,
    #[serde(default = "default_true")]
    pub avoid_risk_zones: bool,
    #[serde(
        default,
        serialize_with = "crate::serialize_naive_date_time_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub departure_time: Option<chrono::NaiveDateTime>,
}

fn default_true() -> bool {
    true
}

impl RouteRequest {
    pub fn validate(&self) -> Result<(), Error> {
        self.origin.validate()?;
        self.destination.validate()?;
        self.preferences.validate()
    }
}

/// Rider-facing maneuver vocabulary; the engine's numeric maneuver codes
/// collapse into these.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManeuverKind {
    Depart,
    Arrive,
    TurnLeft,
    TurnRight,
    SlightLeft,
    SlightRight,
    Straight,
    UTurn,
    Merge,
    Fork,
    Roundabout,
}

impl ManeuverKind {
    /// Collapse an engine maneuver-type code. Codes outside the table (newer
    /// engine versions add transit and building maneuvers) read as straight.
    pub fn from_engine_code(code: u8) -> Self {
        match code {
            0 | 1 => Self::Depart,
            2 => Self::Straight,
            3 => Self::SlightRight,
            4 | 5 => Self::TurnRight,
            6 | 7 => Self::UTurn,
            8 => Self::SlightLeft,
            9 | 10 => Self::TurnLeft,
            11 | 12 => Self::UTurn,
            13 => Self::Straight,
            14 => Self::SlightRight,
            15 => Self::SlightLeft,
            16 | 17 => Self::Merge,
            18 => Self::Straight,
            19 => Self::SlightRight,
            20 => Self::SlightLeft,
            21 => Self::Merge,
            22 | 23 => Self::Roundabout,
            24 | 25 => Self::Fork,
            26 | 27 => Self::Arrive,
            _ => Self::Straight,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BikeLaneStatus {
    Entering,
    Leaving,
    Continuing,
    #[default]
    None,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ManeuverAlert {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Maneuver {
    #[serde(rename = "type")]
    pub kind: ManeuverKind,
    pub instruction: String,
    /// TTS-friendly phrasing.
    pub verbal_instruction: String,
    pub location: Coordinate,
    pub distance_meters: u32,
    pub street_name: Option<String>,
    #[serde(default)]
    pub bike_lane_status: BikeLaneStatus,
    #[serde(default)]
    pub alerts: Vec<ManeuverAlert>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub geometry: GeoJsonLineString,
    pub distance_meters: u32,
    pub duration_seconds: u32,
    #[serde(default)]
    pub maneuvers: Vec<Maneuver>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteSummary {
    pub distance_meters: u32,
    pub duration_seconds: u32,
    pub elevation_gain_meters: u32,
    pub elevation_loss_meters: u32,
    /// Steepest grade along the route, reported to one decimal.
    pub max_grade_percent: f64,
    /// Fraction of the route on real bike infrastructure, `[0, 100]`.
    pub bike_lane_percentage: f64,
    /// Overall proximity risk, `[0, 1]`; a clean safest-profile route is 0.
    pub risk_score: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct RouteRiskAnalysis {
    pub total_risk_zones: u32,
    pub high_severity_zones: u32,
    #[serde(default)]
    pub risk_zone_ids: Vec<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub location: Option<Coordinate>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub route_id: Uuid,
    pub geometry: GeoJsonLineString,
    pub summary: RouteSummary,
    #[serde(default)]
    pub legs: Vec<RouteLeg>,
    #[serde(default)]
    pub risk_analysis: RouteRiskAnalysis,
    #[serde(default)]
    pub warnings: Vec<RouteWarning>,
}

/// Slot indices into an alternatives response.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteComparison {
    pub fastest_index: usize,
    pub safest_index: usize,
    pub recommended_index: usize,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coordinate_range_checks() {
        assert!(Coordinate::new(37.77, -122.42).validate().is_ok());
        assert!(Coordinate::new(91.0, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, -180.5).validate().is_err());
    }

    #[test]
    fn bounding_box_parses_and_rejects() {
        let bbox: BoundingBox = "-122.52,37.70,-122.35,37.83".parse().unwrap();
        assert!(bbox.contains(-122.42, 37.77));
        assert!(!bbox.contains(-122.6, 37.77));

        assert!("-122.52,37.70,-122.35".parse::<BoundingBox>().is_err());
        assert!("-122.52,37.70,-122.35,37.83,0".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let request: RouteRequest = serde_json::from_value(serde_json::json!({
            "origin": {"latitude": 37.795, "longitude": -122.430},
            "destination": {"latitude": 37.770, "longitude": -122.400}
        }))
        .unwrap();

        assert_eq!(request.vehicle_type, VehicleType::Scooter);
        assert_eq!(request.preferences.profile, RouteProfile::Balanced);
        assert!(request.avoid_risk_zones);
        assert!(request.preferences.prefer_bike_lanes);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn preferences_bounds_are_enforced() {
        let mut preferences = RoutePreferences::default();
        preferences.max_grade_percent = 31.0;
        assert!(preferences.validate().is_err());

        preferences.max_grade_percent = 12.0;
        preferences.bike_lane_weight = 1.5;
        assert!(preferences.validate().is_err());
    }

    #[test]
    fn maneuver_codes_collapse_to_rider_vocabulary() {
        assert_eq!(ManeuverKind::from_engine_code(0), ManeuverKind::Depart);
        assert_eq!(ManeuverKind::from_engine_code(5), ManeuverKind::TurnRight);
        assert_eq!(ManeuverKind::from_engine_code(10), ManeuverKind::TurnLeft);
        assert_eq!(ManeuverKind::from_engine_code(22), ManeuverKind::Roundabout);
        assert_eq!(ManeuverKind::from_engine_code(26), ManeuverKind::Arrive);
        assert_eq!(ManeuverKind::from_engine_code(41), ManeuverKind::Straight);
    }

    #[test]
    fn linestring_serializes_with_geojson_tag() {
        let geometry = GeoJsonLineString::new(vec![[-122.42, 37.77], [-122.41, 37.78]]);
        assert_eq!(
            serde_json::to_value(&geometry).unwrap(),
            serde_json::json!({
                "type": "LineString",
                "coordinates": [[-122.42, 37.77], [-122.41, 37.78]]
            })
        );
    }
}
