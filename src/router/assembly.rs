//! Turning a selected engine trip into the annotated rider-facing response:
//! geometry, elevation statistics, lane coverage (with the trace fallback),
//! risk analysis, and warnings.

use log::{info, warn};
use uuid::Uuid;

use crate::bike_lanes::CoverageStats;
use crate::engine::route::{Leg as EngineLeg, Trip};
use crate::engine::trace;
use crate::error::Error;
use crate::geodesy;
use crate::models::{
    BikeLaneStatus, Coordinate, GeoJsonLineString, Maneuver, ManeuverKind, RouteLeg,
    RouteRequest, RouteResponse, RouteRiskAnalysis, RouteSummary, RouteWarning,
};
use crate::risk_zones;

use super::{Router, FALLBACK_SPEED_MPS};

/// Only this many intersected zone ids are echoed back to the rider.
const MAX_REPORTED_ZONE_IDS: usize = 10;

/// Trace requests sample the geometry down to roughly this many points.
const MAX_TRACE_POINTS: usize = 100;

impl Router {
    /// Assemble the final response for a chosen trip.
    ///
    /// `remaining_violations` is non-zero only for degraded results (no clean
    /// candidate existed); it turns into a rider-visible warning.
    pub(crate) async fn assemble(
        &self,
        trip: &Trip,
        request: &RouteRequest,
        remaining_violations: usize,
    ) -> Result<RouteResponse, Error> {
        let mut coords: Vec<[f64; 2]> = Vec::new();
        let mut elevations: Vec<f64> = Vec::new();
        let mut elevation_interval = 30.0;
        let mut legs = Vec::new();

        for leg in &trip.legs {
            coords.extend_from_slice(&leg.shape);
            elevations.extend_from_slice(&leg.elevation);
            if let Some(interval) = leg.elevation_interval {
                elevation_interval = interval;
            }
            legs.push(assemble_leg(leg));
        }
        if coords.is_empty() {
            return Err(Error::EngineProtocol(
                "engine trip contained no geometry".to_owned(),
            ));
        }

        let (elevation_gain, elevation_loss, max_grade) =
            elevation_stats(&elevations, elevation_interval);
        let distance_meters = trip.summary.length * 1000.0;

        // The engine's reported time stands as-is; the fixed-speed estimate
        // exists only for a missing or zero value.
        let duration_seconds = if trip.summary.time > 0.0 {
            trip.summary.time
        } else if distance_meters > 0.0 {
            warn!("engine time missing, estimating duration at 15 km/h");
            distance_meters / FALLBACK_SPEED_MPS
        } else {
            0.0
        };

        let (mut bike_lane_percentage, _coverage) = self.bike_lanes.coverage(&coords).await;
        if bike_lane_percentage == 0.0 && distance_meters > 0.0 {
            if let Some((fallback_percentage, _)) = self.coverage_via_trace(&coords).await {
                if fallback_percentage > 0.0 {
                    info!(
                        "using engine trace fallback for lane coverage: {fallback_percentage:.1}%"
                    );
                    bike_lane_percentage = fallback_percentage;
                }
            }
        }

        // Risk analysis runs against every active zone; an unavailable zone
        // snapshot fails the request rather than understating risk.
        let zones = self.risk_zones.snapshot().await?;
        let assessment = risk_zones::risk_score(&coords, &zones, 0.25);
        let high_severity_zones = assessment
            .zone_ids
            .iter()
            .filter(|id| {
                zones
                    .iter()
                    .any(|z| z.id == **id && z.severity.is_high_or_critical())
            })
            .count() as u32;
        let mut risk_zone_ids = assessment.zone_ids;
        risk_zone_ids.truncate(MAX_REPORTED_ZONE_IDS);

        let mut warnings = Vec::new();
        if remaining_violations > 0 {
            warnings.push(RouteWarning {
                kind: "degraded_route".to_owned(),
                message: format!(
                    "no fully clean route exists for this trip; {remaining_violations} hazard-zone violation(s) remain"
                ),
                location: None,
            });
        }

        Ok(RouteResponse {
            route_id: Uuid::new_v4(),
            geometry: GeoJsonLineString::new(coords),
            summary: RouteSummary {
                distance_meters: distance_meters.round() as u32,
                duration_seconds: duration_seconds.round() as u32,
                elevation_gain_meters: elevation_gain.round() as u32,
                elevation_loss_meters: elevation_loss.round() as u32,
                max_grade_percent: round_to(max_grade, 10.0),
                bike_lane_percentage: round_to(bike_lane_percentage, 10.0),
                risk_score: round_to(assessment.score, 100.0),
            },
            legs,
            risk_analysis: RouteRiskAnalysis {
                total_risk_zones: assessment.zone_passes,
                high_severity_zones,
                risk_zone_ids,
            },
            warnings,
        })
    }

    /// Lane coverage from the engine's map-matched edge attributes, used
    /// when the municipal source reports nothing. Separated and dedicated
    /// lanes and off-street path uses count; shared-lane markings do not.
    pub(crate) async fn coverage_via_trace(
        &self,
        coords: &[[f64; 2]],
    ) -> Option<(f64, CoverageStats)> {
        if coords.len() < 2 {
            return None;
        }

        let sampled: Vec<[f64; 2]> = if coords.len() > MAX_TRACE_POINTS {
            let step = coords.len() / MAX_TRACE_POINTS;
            let mut sampled: Vec<[f64; 2]> = coords.iter().step_by(step).copied().collect();
            if sampled.last() != coords.last() {
                sampled.push(*coords.last().expect("coords are non-empty"));
            }
            sampled
        } else {
            coords.to_vec()
        };

        let response = match self
            .engine
            .trace_attributes(trace::Manifest::map_snap(&sampled))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("trace_attributes fallback failed: {e}");
                return None;
            }
        };
        if response.edges.is_empty() {
            return None;
        }

        let mut stats = CoverageStats {
            engine_fallback: true,
            ..CoverageStats::default()
        };
        for edge in &response.edges {
            let length_meters = edge.length * 1000.0;
            stats.total_distance_meters += length_meters;
            if edge.is_bike_infrastructure() {
                stats.bike_lane_distance_meters += length_meters;
            } else {
                stats.road_distance_meters += length_meters;
            }
        }
        if stats.total_distance_meters == 0.0 {
            return None;
        }
        let percentage = (stats.bike_lane_distance_meters / stats.total_distance_meters * 100.0)
            .clamp(0.0, 100.0);
        Some((percentage, stats))
    }

    /// Straight-line interpolated route for development when the engine is
    /// unreachable. Gated behind `Settings::dev_mock_routes`.
    pub(crate) fn mock_route(&self, request: &RouteRequest) -> RouteResponse {
        let origin = request.origin.lon_lat();
        let destination = request.destination.lon_lat();
        let distance = geodesy::haversine_distance(origin, destination);
        let duration = distance / FALLBACK_SPEED_MPS;

        // One point every ~100 m keeps the line renderable on a map.
        let points = ((distance / 100.0) as usize).max(10);
        let coords: Vec<[f64; 2]> = (0..=points)
            .map(|i| {
                let t = i as f64 / points as f64;
                [
                    origin[0] + t * (destination[0] - origin[0]),
                    origin[1] + t * (destination[1] - origin[1]),
                ]
            })
            .collect();

        let maneuvers = vec![
            Maneuver {
                kind: ManeuverKind::Depart,
                instruction: "Start heading toward your destination".to_owned(),
                verbal_instruction: "Start heading toward your destination".to_owned(),
                location: request.origin,
                distance_meters: distance.round() as u32,
                street_name: None,
                bike_lane_status: BikeLaneStatus::None,
                alerts: Vec::new(),
            },
            Maneuver {
                kind: ManeuverKind::Arrive,
                instruction: "You have arrived at your destination".to_owned(),
                verbal_instruction: "You have arrived at your destination".to_owned(),
                location: request.destination,
                distance_meters: 0,
                street_name: None,
                bike_lane_status: BikeLaneStatus::None,
                alerts: Vec::new(),
            },
        ];

        RouteResponse {
            route_id: Uuid::new_v4(),
            geometry: GeoJsonLineString::new(coords.clone()),
            summary: RouteSummary {
                distance_meters: distance.round() as u32,
                duration_seconds: duration.round() as u32,
                elevation_gain_meters: 0,
                elevation_loss_meters: 0,
                max_grade_percent: 0.0,
                bike_lane_percentage: 50.0,
                risk_score: 0.3,
            },
            legs: vec![RouteLeg {
                geometry: GeoJsonLineString::new(coords),
                distance_meters: distance.round() as u32,
                duration_seconds: duration.round() as u32,
                maneuvers,
            }],
            risk_analysis: RouteRiskAnalysis::default(),
            warnings: vec![RouteWarning {
                kind: "mock_route".to_owned(),
                message: "routing engine unavailable; this is a synthetic development route"
                    .to_owned(),
                location: None,
            }],
        }
    }
}

fn assemble_leg(leg: &EngineLeg) -> RouteLeg {
    let maneuvers = leg
        .maneuvers
        .iter()
        .map(|m| {
            let location = leg
                .shape
                .get(m.begin_shape_index)
                .map_or(Coordinate::new(0.0, 0.0), |c| Coordinate::new(c[1], c[0]));
            Maneuver {
                kind: ManeuverKind::from_engine_code(m.kind),
                instruction: m.instruction.clone(),
                verbal_instruction: m
                    .verbal_pre_transition_instruction
                    .clone()
                    .unwrap_or_else(|| m.instruction.clone()),
                location,
                distance_meters: (m.length * 1000.0).round() as u32,
                street_name: m
                    .street_names
                    .as_ref()
                    .and_then(|names| names.first().cloned()),
                bike_lane_status: BikeLaneStatus::None,
                alerts: Vec::new(),
            }
        })
        .collect();

    RouteLeg {
        geometry: GeoJsonLineString::new(leg.shape.clone()),
        distance_meters: (leg.summary.length * 1000.0).round() as u32,
        duration_seconds: leg.summary.time.round() as u32,
        maneuvers,
    }
}

/// Gain and loss accumulate independently; the grade of each sampled step is
/// `abs(delta) / interval * 100`.
fn elevation_stats(elevations: &[f64], interval: f64) -> (f64, f64, f64) {
    if elevations.len() < 2 {
        return (0.0, 0.0, 0.0);
    }
    let mut gain = 0.0;
    let mut loss = 0.0;
    let mut max_grade: f64 = 0.0;
    for pair in elevations.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gain += delta;
        } else {
            loss += -delta;
        }
        if interval > 0.0 {
            max_grade = max_grade.max(delta.abs() / interval * 100.0);
        }
    }
    (gain, loss, max_grade)
}

fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale).round() / scale
}
