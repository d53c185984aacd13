//! Map-matching request against the engine's `/trace_attributes` endpoint,
//! used as the coverage fallback when the municipal bikeway source is down.

use serde::{Deserialize, Serialize};

/// Edge attributes the coverage fallback needs.
const ATTRIBUTE_FILTER: [&str; 5] = [
    "edge.cycle_lane",
    "edge.length",
    "edge.use",
    "edge.road_class",
    "edge.surface",
];

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Filters {
    pub attributes: Vec<&'static str>,
    pub action: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    shape: Vec<TracePoint>,
    costing: &'static str,
    shape_match: &'static str,
    filters: Filters,
}

impl Manifest {
    /// Map-snap the given `[lon, lat]` geometry with the bicycle costing and
    /// the cycle-lane attribute filter.
    pub fn map_snap(coords: &[[f64; 2]]) -> Self {
        Self {
            shape: coords
                .iter()
                .map(|c| TracePoint { lat: c[1], lon: c[0] })
                .collect(),
            costing: "bicycle",
            shape_match: "map_snap",
            filters: Filters {
                attributes: ATTRIBUTE_FILTER.to_vec(),
                action: "include",
            },
        }
    }
}

/// Cycle-lane classification on a matched edge.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CycleLane {
    #[default]
    None,
    /// Shared-lane markings. Counts as infrastructure only when the source
    /// bikeway data confirms it, never from the engine alone.
    Shared,
    /// Painted, not physically separated.
    Dedicated,
    /// Physically separated from traffic.
    Separated,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Edge {
    /// Edge length in kilometers.
    #[serde(default)]
    pub length: f64,
    #[serde(default)]
    pub cycle_lane: CycleLane,
    #[serde(rename = "use")]
    pub edge_use: Option<String>,
    pub road_class: Option<String>,
    pub surface: Option<String>,
}

impl Edge {
    /// Whether this edge rides on real bike infrastructure: a separated or
    /// dedicated lane, or an off-street path use.
    pub fn is_bike_infrastructure(&self) -> bool {
        if matches!(self.cycle_lane, CycleLane::Separated | CycleLane::Dedicated) {
            return true;
        }
        matches!(
            self.edge_use.as_deref(),
            Some("cycleway" | "path" | "footway" | "pedestrian")
        )
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Response {
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn manifest_serialization_snapshot() {
        let manifest = Manifest::map_snap(&[[-122.43, 37.795], [-122.40, 37.77]]);
        assert_eq!(
            serde_json::to_value(&manifest).unwrap(),
            serde_json::json!({
                "shape": [
                    {"lat": 37.795, "lon": -122.43},
                    {"lat": 37.77, "lon": -122.40}
                ],
                "costing": "bicycle",
                "shape_match": "map_snap",
                "filters": {
                    "attributes": [
                        "edge.cycle_lane",
                        "edge.length",
                        "edge.use",
                        "edge.road_class",
                        "edge.surface"
                    ],
                    "action": "include"
                }
            })
        );
    }

    #[test]
    fn edge_classification() {
        let separated: Edge =
            serde_json::from_value(serde_json::json!({"length": 0.4, "cycle_lane": "separated"}))
                .unwrap();
        assert!(separated.is_bike_infrastructure());

        let shared: Edge =
            serde_json::from_value(serde_json::json!({"length": 0.4, "cycle_lane": "shared"}))
                .unwrap();
        assert!(!shared.is_bike_infrastructure());

        let path: Edge =
            serde_json::from_value(serde_json::json!({"length": 0.2, "use": "cycleway"})).unwrap();
        assert!(path.is_bike_infrastructure());

        let road: Edge =
            serde_json::from_value(serde_json::json!({"length": 1.0, "use": "road"})).unwrap();
        assert!(!road.is_bike_infrastructure());
    }

    #[test]
    fn unknown_cycle_lane_values_do_not_fail_parsing() {
        let edge: Edge =
            serde_json::from_value(serde_json::json!({"cycle_lane": "buffered"})).unwrap();
        assert_eq!(edge.cycle_lane, CycleLane::Other);
    }
}
