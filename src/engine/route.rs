//! Turn-by-turn request manifest and the typed slice of the engine's
//! response the gateway consumes.

use serde::{Deserialize, Serialize};

use super::costing::Costing;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    /// A stop: u-turns allowed, legs and arrival maneuvers generated.
    #[default]
    Break,
    /// Pass through without stopping; no leg boundary is generated. Used for
    /// avoidance waypoints so the rider never sees them as stops.
    Through,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type")]
    pub location_type: LocationType,
}

impl Location {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lat,
            lon,
            location_type: LocationType::Break,
        }
    }

    pub fn through(lon: f64, lat: f64) -> Self {
        Self {
            lat,
            lon,
            location_type: LocationType::Through,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DirectionsOptions {
    pub units: &'static str,
    pub language: &'static str,
}

impl Default for DirectionsOptions {
    fn default() -> Self {
        Self {
            units: "meters",
            language: "en-US",
        }
    }
}

/// Request manifest for the engine's `/route` endpoint.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    locations: Vec<Location>,
    #[serde(flatten)]
    costing: Costing,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude_polygons: Vec<Vec<[f64; 2]>>,
    alternates: Option<i32>,
    /// Sampling interval for the inline elevation profile, meters.
    elevation_interval: f64,
    directions_options: DirectionsOptions,
    format: &'static str,
    id: Option<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            costing: Costing::default(),
            exclude_polygons: Vec::new(),
            alternates: None,
            elevation_interval: 30.0,
            directions_options: DirectionsOptions::default(),
            format: "json",
            id: None,
        }
    }
}

impl Manifest {
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    /// Ordered list of locations to visit; at least two breaks.
    pub fn locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.locations = locations.into_iter().collect();
        debug_assert!(self.locations.len() >= 2);
        self
    }

    pub fn costing(mut self, costing: impl Into<Costing>) -> Self {
        self.costing = costing.into();
        self
    }

    /// Ask for up to this many alternate routes alongside the main one. The
    /// engine may return fewer.
    pub fn alternates(mut self, alternates: i32) -> Self {
        self.alternates = Some(alternates);
        self
    }

    /// Replace the set of exterior rings the engine must route around.
    ///
    /// The engine caps the total circumference across all rings; callers
    /// budget against that limit before building the manifest.
    pub fn exclude_polygons(
        mut self,
        exclude_polygons: impl IntoIterator<Item = Vec<[f64; 2]>>,
    ) -> Self {
        self.exclude_polygons = exclude_polygons.into_iter().collect();
        self
    }

    pub fn id(mut self, id: impl ToString) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Response {
    pub trip: Trip,
    #[serde(default)]
    pub alternates: Vec<Alternate>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Alternate {
    pub trip: Trip,
}

impl Response {
    /// Main trip followed by every alternate, in the engine's order.
    pub fn into_trips(self) -> Vec<Trip> {
        let mut trips = Vec::with_capacity(1 + self.alternates.len());
        trips.push(self.trip);
        trips.extend(self.alternates.into_iter().map(|a| a.trip));
        trips
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Trip {
    #[serde(default)]
    pub legs: Vec<Leg>,
    #[serde(default)]
    pub summary: Summary,
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct Summary {
    /// Trip length in kilometers.
    #[serde(default)]
    pub length: f64,
    /// Travel time in seconds, from the engine's costing model.
    #[serde(default)]
    pub time: f64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Leg {
    #[serde(default)]
    pub summary: Summary,
    /// Decoded from the polyline-6 wire format into `[lon, lat]` pairs.
    #[serde(default, deserialize_with = "crate::shapes::deserialize_shape")]
    pub shape: Vec<[f64; 2]>,
    #[serde(default)]
    pub maneuvers: Vec<Maneuver>,
    /// Elevation samples in meters, present when the request set an
    /// elevation interval.
    #[serde(default)]
    pub elevation: Vec<f64>,
    pub elevation_interval: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Maneuver {
    /// Raw engine maneuver-type code; collapsed into the rider vocabulary
    /// during response assembly.
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub instruction: String,
    pub verbal_pre_transition_instruction: Option<String>,
    pub street_names: Option<Vec<String>>,
    /// Estimated seconds along the maneuver.
    #[serde(default)]
    pub time: f64,
    /// Maneuver length in kilometers.
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub begin_shape_index: usize,
    #[serde(default)]
    pub end_shape_index: usize,
}
