//! The multi-stage avoidance pipeline behind the SAFEST, BALANCED, and
//! SCENIC profiles.
//!
//! Stage 1 asks the engine for candidates under batched hard exclusions;
//! stage 2 re-excludes only the zones candidates kept violating, with
//! enlarged radii; stage 3 side-steps individual violations with `through`
//! waypoints; stage 4 routes around the whole cluster between origin and
//! destination; stage 5 degrades to the least-bad candidate, flagged as
//! such, rather than failing the request.

use log::{info, warn};

use crate::engine::costing::BicycleType;
use crate::engine::route::Manifest;
use crate::error::Error;
use crate::geodesy;
use crate::models::{RouteProfile, RouteRequest, RouteResponse};
use crate::risk_zones::{self, RiskZone, Severity, DEFAULT_BUFFER_MULTIPLIER};

use super::{variant, Candidate, CandidateBatch, Router};

/// Danger-core fraction of the alert radius: the SAFEST tier validates at a
/// quarter of the rider-alert perimeter, BALANCED at a fifth. Exclusion
/// building and validation always share this factor.
pub(crate) fn avoidance_radius_factor(min_severity: Severity) -> f64 {
    if min_severity == Severity::Low {
        0.25
    } else {
        0.2
    }
}

/// Focused-exclusion and waypoint offsets enlarge the core by this much.
const FOCUSED_RADIUS_SCALE: f64 = 3.0;

const MAX_SIDESTEP_ITERATIONS: usize = 5;
const MAX_SINGLE_WAYPOINT_TRIES: usize = 16;
const MAX_CHAIN_ATTEMPTS: usize = 4;
/// Chains place one waypoint per in-cluster zone; more than this many zones
/// and a chain request stops resembling the original route.
const MAX_CHAIN_ZONES: usize = 5;

impl Router {
    /// Profile-aware avoidance pipeline. `min_severity` selects which zones
    /// are hard constraints: LOW for SAFEST/SCENIC, HIGH for BALANCED.
    pub(crate) async fn avoidance_route(
        &self,
        request: &RouteRequest,
        min_severity: Severity,
    ) -> Result<RouteResponse, Error> {
        let zones = self.risk_zones.snapshot().await?;
        let qualifying = risk_zones::filter_by_severity(&zones, min_severity);
        info!(
            "avoidance routing at {min_severity:?}: {} of {} zones qualify",
            qualifying.len(),
            zones.len()
        );
        if qualifying.is_empty() {
            return self.basic_route(request).await;
        }

        let radius_factor = avoidance_radius_factor(min_severity);
        let budget = self.settings.exclusion_budget_meters;
        let batches = risk_zones::exclusion_batches(
            &zones,
            DEFAULT_BUFFER_MULTIPLIER,
            min_severity,
            budget,
        );

        // Stage 1: candidates under batched hard exclusions.
        let variants = avoidance_variants(request.preferences.profile);
        let mut manifests: Vec<Manifest> = Vec::new();
        for polygons in &batches {
            for costing in &variants {
                manifests.push(
                    self.route_manifest(request, costing.clone(), &[])
                        .exclude_polygons(polygons.clone()),
                );
            }
            manifests.push(
                self.route_manifest(request, variants[0].clone(), &[])
                    .alternates(2)
                    .exclude_polygons(polygons.clone()),
            );
        }
        if batches.len() == 1 {
            // With every zone covered by one batch, a quasi-shortest variant
            // is worth a try as well.
            let shortest = variant(BicycleType::Road, 0.3, 0.2, 0.5).only_consider_quasi_shortest();
            manifests.push(
                self.route_manifest(request, shortest, &[])
                    .exclude_polygons(batches[0].clone()),
            );
        }

        let outcomes = self.submit(manifests).await;
        let mut batch = CandidateBatch::default();
        batch.absorb(outcomes, &zones, &qualifying, min_severity, radius_factor);

        if batch.responses_ok == 0 {
            if let Some(e) = batch.engine_down.take() {
                return if self.settings.dev_mock_routes {
                    warn!("engine unavailable, serving development mock route: {e}");
                    Ok(self.mock_route(request))
                } else {
                    Err(e)
                };
            }
        }

        if let Some(best) = batch.best_valid() {
            info!(
                "selected clean avoidance route: {:.0}m, 0 zone passes",
                best.distance_meters
            );
            let trip = best.trip.clone();
            return self.assemble(&trip, request, 0).await;
        }

        // Stage 2: focused re-exclusion of the zones candidates actually hit.
        if !batch.fallback.is_empty() {
            let validations: Vec<_> = batch
                .fallback
                .iter()
                .map(|c| c.validation.clone())
                .collect();
            let violated_ids = risk_zones::most_violated_zones(&validations);
            let violated: Vec<&RiskZone> = violated_ids
                .iter()
                .filter_map(|id| qualifying.iter().find(|z| z.id == *id))
                .collect();
            let focused =
                risk_zones::focused_exclusion_polygons(&violated, radius_factor, budget);

            if !focused.is_empty() {
                info!(
                    "focused re-exclusion of {} repeatedly violated zones",
                    focused.len()
                );
                let mut manifests: Vec<Manifest> = variants
                    .iter()
                    .map(|costing| {
                        self.route_manifest(request, costing.clone(), &[])
                            .exclude_polygons(focused.clone())
                    })
                    .collect();
                manifests.push(
                    self.route_manifest(request, variants[0].clone(), &[])
                        .alternates(2)
                        .exclude_polygons(focused.clone()),
                );
                let outcomes = self.submit(manifests).await;
                batch.absorb(outcomes, &zones, &qualifying, min_severity, radius_factor);

                if let Some(best) = batch.best_valid() {
                    info!("focused re-exclusion produced a clean route");
                    let trip = best.trip.clone();
                    return self.assemble(&trip, request, 0).await;
                }
            }
        }

        // Stage 3: iterative waypoint side-stepping from the best fallback.
        batch.sort_fallbacks();
        if let Some(start) = batch.fallback.first().cloned() {
            if let Some(clean) = self
                .iterative_avoidance(request, start, &zones, &qualifying, min_severity, radius_factor)
                .await
            {
                info!("iterative waypoint avoidance produced a clean route");
                return self.assemble(&clean.trip, request, 0).await;
            }
        }

        // Stage 4: broad waypoint avoidance around the cluster on the path.
        if let Some(candidate) = self
            .broad_waypoint_avoidance(request, &zones, &qualifying, min_severity, radius_factor)
            .await
        {
            let remaining = candidate.violations();
            if remaining == 0 {
                info!("broad waypoint avoidance produced a clean route");
            } else {
                warn!("accepting waypoint route with {remaining} tolerated violation(s)");
            }
            return self.assemble(&candidate.trip, request, remaining).await;
        }

        // Stage 5: degrade to the least-bad candidate, flagged as such.
        if let Some(best) = batch.fallback.first() {
            warn!(
                "no clean route exists under current zone constraints; degrading to {} violation(s)",
                best.violations()
            );
            let violations = best.violations();
            let trip = best.trip.clone();
            return self.assemble(&trip, request, violations).await;
        }

        Err(Error::RouteNotFound(
            "no candidate route survived hazard-zone constraints".to_owned(),
        ))
    }

    /// Up to five rounds of side-stepping: find the zones the current best
    /// route violates, place a `through` waypoint perpendicular to the route
    /// beside each, and re-route with focused exclusions. Adopt strict
    /// improvements, stop on regression, return only a clean result.
    async fn iterative_avoidance(
        &self,
        request: &RouteRequest,
        start: Candidate,
        zones: &[RiskZone],
        qualifying: &[RiskZone],
        min_severity: Severity,
        radius_factor: f64,
    ) -> Option<Candidate> {
        let budget = self.settings.exclusion_budget_meters;
        let mut best = start;
        let mut best_violations = best.violations();

        for iteration in 0..MAX_SIDESTEP_ITERATIONS {
            if best.is_clean() {
                return Some(best);
            }

            let violated: Vec<&RiskZone> = qualifying
                .iter()
                .filter(|zone| {
                    best.validation
                        .violations
                        .iter()
                        .any(|v| v.zone_id == zone.id)
                })
                .collect();
            if violated.is_empty() {
                break;
            }

            let focused =
                risk_zones::focused_exclusion_polygons(&violated, radius_factor, budget);
            let waypoints: Vec<[f64; 2]> = violated
                .iter()
                .map(|zone| sidestep_waypoint(&best.coords, zone, qualifying, iteration))
                .collect();

            let manifest = self
                .route_manifest(request, variant(BicycleType::Hybrid, 0.3, 0.3, 0.6), &waypoints)
                .exclude_polygons(focused);
            let Ok(response) = self.engine.route(manifest).await else {
                continue;
            };
            let Some(candidate) = response.into_trips().into_iter().find_map(|trip| {
                Candidate::from_trip(trip, zones, qualifying, min_severity, radius_factor, 0)
            }) else {
                continue;
            };

            if candidate.is_clean() {
                info!("side-step iteration {iteration} cleared all violations");
                return Some(candidate);
            }
            if candidate.violations() < best_violations {
                best_violations = candidate.violations();
                best = candidate;
            } else {
                break;
            }
        }
        None
    }

    /// Route around the zone cluster sitting between origin and destination:
    /// single waypoints at growing perpendicular offsets first, then chains
    /// with one waypoint per in-cluster zone.
    ///
    /// Returns a clean candidate, or for the BALANCED tier the best imperfect
    /// one when at most a single violation remains.
    async fn broad_waypoint_avoidance(
        &self,
        request: &RouteRequest,
        zones: &[RiskZone],
        qualifying: &[RiskZone],
        min_severity: Severity,
        radius_factor: f64,
    ) -> Option<Candidate> {
        let origin = request.origin.lon_lat();
        let destination = request.destination.lon_lat();

        let on_path = zones_on_path(origin, destination, qualifying);
        if on_path.is_empty() {
            return None;
        }
        let cluster = [
            on_path.iter().map(|z| z.center.longitude).sum::<f64>() / on_path.len() as f64,
            on_path.iter().map(|z| z.center.latitude).sum::<f64>() / on_path.len() as f64,
        ];

        let on_path_refs: Vec<&RiskZone> = on_path.iter().collect();
        let path_polygons = risk_zones::focused_exclusion_polygons(
            &on_path_refs,
            radius_factor,
            self.settings.exclusion_budget_meters,
        );

        let max_zone_radius = on_path
            .iter()
            .map(|z| z.alert_radius_meters)
            .max()
            .unwrap_or(150);
        let base_offset = f64::from(max_zone_radius) * 2.0 / geodesy::METERS_PER_DEGREE;
        let perp = geodesy::perpendicular([
            destination[0] - origin[0],
            destination[1] - origin[1],
        ]);

        let mut waypoints = cluster_waypoints(origin, destination, cluster, qualifying);
        for multiplier in [2.0, 3.0, 4.0, 5.0] {
            waypoints.push(better_side(
                cluster,
                perp,
                base_offset * multiplier,
                qualifying,
            ));
        }
        waypoints.truncate(MAX_SINGLE_WAYPOINT_TRIES);

        let manifests: Vec<Manifest> = waypoints
            .iter()
            .map(|waypoint| {
                self.route_manifest(
                    request,
                    variant(BicycleType::Hybrid, 0.2, 0.3, 0.7),
                    std::slice::from_ref(waypoint),
                )
                .exclude_polygons(path_polygons.clone())
            })
            .collect();
        let outcomes = self.submit(manifests).await;

        let mut best: Option<Candidate> = None;
        for outcome in outcomes {
            let Ok(response) = outcome else { continue };
            for trip in response.into_trips() {
                let Some(candidate) =
                    Candidate::from_trip(trip, zones, qualifying, min_severity, radius_factor, 0)
                else {
                    continue;
                };
                if candidate.is_clean() {
                    return Some(candidate);
                }
                if best
                    .as_ref()
                    .map_or(true, |b| candidate.violations() < b.violations())
                {
                    best = Some(candidate);
                }
            }
        }

        // Chains: one waypoint per in-cluster zone, offsets growing per
        // attempt.
        let best_violations = best.as_ref().map_or(usize::MAX, Candidate::violations);
        if best_violations > 0 && on_path.len() <= MAX_CHAIN_ZONES {
            for attempt in 0..MAX_CHAIN_ATTEMPTS {
                let multiplier = 2.0 + attempt as f64 * 1.5;
                let chain: Vec<[f64; 2]> = on_path
                    .iter()
                    .map(|zone| {
                        let offset = f64::from(zone.alert_radius_meters) * multiplier
                            / geodesy::METERS_PER_DEGREE;
                        better_side(zone.center.lon_lat(), perp, offset, qualifying)
                    })
                    .collect();

                let manifest = self
                    .route_manifest(request, variant(BicycleType::Hybrid, 0.3, 0.3, 0.6), &chain)
                    .exclude_polygons(path_polygons.clone());
                let Ok(response) = self.engine.route(manifest).await else {
                    continue;
                };
                for trip in response.into_trips() {
                    let Some(candidate) = Candidate::from_trip(
                        trip,
                        zones,
                        qualifying,
                        min_severity,
                        radius_factor,
                        0,
                    ) else {
                        continue;
                    };
                    if candidate.is_clean() {
                        return Some(candidate);
                    }
                    if best
                        .as_ref()
                        .map_or(true, |b| candidate.violations() < b.violations())
                    {
                        best = Some(candidate);
                    }
                }
            }
        }

        // The BALANCED tier may accept a single leftover violation; SAFEST
        // never does, so its caller degrades explicitly instead.
        if min_severity == Severity::High {
            if let Some(candidate) = best {
                if candidate.violations() <= 1 {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

/// The five stage-1 costing variants. SCENIC leads with its own quieter
/// road mix; the spread of subtypes and knobs pushes the engine into
/// genuinely different corridors.
fn avoidance_variants(
    profile: RouteProfile,
) -> Vec<crate::engine::costing::BicycleCostingOptions> {
    let mut variants = vec![
        variant(BicycleType::Road, 0.5, 0.3, 0.5),
        variant(BicycleType::Hybrid, 0.4, 0.4, 0.6),
        variant(BicycleType::Cross, 0.6, 0.5, 0.4),
        variant(BicycleType::Hybrid, 0.2, 0.3, 0.7),
        variant(BicycleType::Road, 0.3, 0.2, 0.8),
    ];
    if profile == RouteProfile::Scenic {
        variants.insert(0, variant(BicycleType::Hybrid, 0.3, 0.4, 0.6));
    }
    variants
}

/// Zones roughly between origin and destination: inside a buffered bounding
/// box, and with a detour ratio under 1.5 (going origin -> zone ->
/// destination is at most half again the direct line).
fn zones_on_path(origin: [f64; 2], destination: [f64; 2], zones: &[RiskZone]) -> Vec<RiskZone> {
    const BBOX_BUFFER_DEGREES: f64 = 0.01;
    const MAX_DETOUR_RATIO: f64 = 1.5;

    let min_lon = origin[0].min(destination[0]) - BBOX_BUFFER_DEGREES;
    let max_lon = origin[0].max(destination[0]) + BBOX_BUFFER_DEGREES;
    let min_lat = origin[1].min(destination[1]) - BBOX_BUFFER_DEGREES;
    let max_lat = origin[1].max(destination[1]) + BBOX_BUFFER_DEGREES;

    let direct = geodesy::planar_distance(origin, destination);

    zones
        .iter()
        .filter(|zone| {
            let center = zone.center.lon_lat();
            if !(min_lon..=max_lon).contains(&center[0])
                || !(min_lat..=max_lat).contains(&center[1])
            {
                return false;
            }
            if direct <= 0.0 {
                return false;
            }
            let detour = (geodesy::planar_distance(origin, center)
                + geodesy::planar_distance(center, destination))
                / direct;
            detour < MAX_DETOUR_RATIO
        })
        .cloned()
        .collect()
}

/// Minimum planar distance from a waypoint to any zone center; bigger is
/// safer.
fn waypoint_clearance(waypoint: [f64; 2], zones: &[RiskZone]) -> f64 {
    zones
        .iter()
        .map(|zone| geodesy::planar_distance(waypoint, zone.center.lon_lat()))
        .fold(f64::INFINITY, f64::min)
}

/// Of the two candidates perpendicular to the route, the one with more
/// clearance from every zone.
fn better_side(
    center: [f64; 2],
    perp: [f64; 2],
    offset: f64,
    zones: &[RiskZone],
) -> [f64; 2] {
    let a = [center[0] + perp[0] * offset, center[1] + perp[1] * offset];
    let b = [center[0] - perp[0] * offset, center[1] - perp[1] * offset];
    if waypoint_clearance(a, zones) >= waypoint_clearance(b, zones) {
        a
    } else {
        b
    }
}

/// Waypoint beside a violated zone, perpendicular to the route's local
/// direction at its nearest point. The offset grows with each iteration.
fn sidestep_waypoint(
    coords: &[[f64; 2]],
    zone: &RiskZone,
    zones: &[RiskZone],
    iteration: usize,
) -> [f64; 2] {
    let center = zone.center.lon_lat();

    let mut nearest = 0;
    let mut nearest_distance = f64::INFINITY;
    for (i, coord) in coords.iter().enumerate() {
        let d = geodesy::planar_distance(*coord, center);
        if d < nearest_distance {
            nearest_distance = d;
            nearest = i;
        }
    }

    let direction = if nearest > 0 && nearest + 1 < coords.len() {
        [
            coords[nearest + 1][0] - coords[nearest - 1][0],
            coords[nearest + 1][1] - coords[nearest - 1][1],
        ]
    } else if nearest > 0 {
        [
            coords[nearest][0] - coords[nearest - 1][0],
            coords[nearest][1] - coords[nearest - 1][1],
        ]
    } else if coords.len() > 1 {
        [
            coords[1][0] - coords[0][0],
            coords[1][1] - coords[0][1],
        ]
    } else {
        [0.0, 0.0]
    };
    let perp = geodesy::perpendicular(direction);

    let offset = f64::from(zone.alert_radius_meters) * (2.5 + iteration as f64)
        / geodesy::METERS_PER_DEGREE;
    better_side(center, perp, offset, zones)
}

/// Single-waypoint candidates around the cluster, mirroring the widening
/// search the pipeline runs: paired offsets around the cluster center (both
/// sides, better first), midpoint offsets, then extreme offsets for routes
/// buried deep in zones.
fn cluster_waypoints(
    origin: [f64; 2],
    destination: [f64; 2],
    cluster: [f64; 2],
    zones: &[RiskZone],
) -> Vec<[f64; 2]> {
    let perp = geodesy::perpendicular([
        destination[0] - origin[0],
        destination[1] - origin[1],
    ]);

    let mut waypoints = Vec::new();
    for offset in [0.01, 0.02, 0.03, 0.04] {
        let a = [
            cluster[0] + perp[0] * offset,
            cluster[1] + perp[1] * offset,
        ];
        let b = [
            cluster[0] - perp[0] * offset,
            cluster[1] - perp[1] * offset,
        ];
        if waypoint_clearance(a, zones) >= waypoint_clearance(b, zones) {
            waypoints.push(a);
            waypoints.push(b);
        } else {
            waypoints.push(b);
            waypoints.push(a);
        }
    }

    let midpoint = [
        (origin[0] + destination[0]) / 2.0,
        (origin[1] + destination[1]) / 2.0,
    ];
    for offset in [0.015, 0.03] {
        waypoints.push(better_side(midpoint, perp, offset, zones));
    }

    for offset in [0.05, 0.06] {
        waypoints.push(better_side(cluster, perp, offset, zones));
    }

    waypoints.truncate(12);
    waypoints
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::Coordinate;
    use uuid::Uuid;

    fn zone(lon: f64, lat: f64, radius: u32, count: u32) -> RiskZone {
        RiskZone::from_reports(Uuid::new_v4(), Coordinate::new(lat, lon), radius, count)
    }

    #[test]
    fn radius_factor_per_tier() {
        assert_eq!(avoidance_radius_factor(Severity::Low), 0.25);
        assert_eq!(avoidance_radius_factor(Severity::High), 0.2);
        assert_eq!(avoidance_radius_factor(Severity::Critical), 0.2);
    }

    #[test]
    fn zones_on_path_uses_detour_ratio() {
        let origin = [-122.45, 37.79];
        let destination = [-122.40, 37.77];
        let between = zone(-122.425, 37.78, 200, 250);
        let beside = zone(-122.428, 37.788, 200, 250); // in bbox, short detour
        let far_off = zone(-122.4599, 37.7601, 200, 250); // bbox corner, detour > 1.5

        let on_path = zones_on_path(origin, destination, &[between.clone(), beside, far_off]);
        let ids: Vec<Uuid> = on_path.iter().map(|z| z.id).collect();
        assert!(ids.contains(&between.id));
        assert_eq!(on_path.len(), 2);
    }

    #[test]
    fn sidestep_picks_the_clearer_side() {
        // Route runs west-east; the violated zone sits on it, and a second
        // zone crowds the north side, so the waypoint must go south.
        let coords: Vec<[f64; 2]> = (0..=10)
            .map(|i| [-122.45 + 0.005 * f64::from(i), 37.78])
            .collect();
        let violated = zone(-122.425, 37.78, 200, 250);
        let crowding = zone(-122.425, 37.79, 200, 250);
        let zones = vec![violated.clone(), crowding];

        let waypoint = sidestep_waypoint(&coords, &violated, &zones, 0);
        assert!(waypoint[1] < 37.78, "waypoint should be south of the route");

        // Offset grows with the iteration count.
        let farther = sidestep_waypoint(&coords, &violated, &zones, 3);
        assert!((farther[1] - 37.78).abs() > (waypoint[1] - 37.78).abs());
    }

    #[test]
    fn cluster_waypoints_cap_and_order() {
        let origin = [-122.45, 37.79];
        let destination = [-122.40, 37.77];
        let cluster = [-122.425, 37.78];
        let zones = vec![zone(-122.425, 37.78, 200, 250)];

        let waypoints = cluster_waypoints(origin, destination, cluster, &zones);
        assert_eq!(waypoints.len(), 12);
        // Paired offsets: first two are mirror images around the cluster.
        let mid = [
            (waypoints[0][0] + waypoints[1][0]) / 2.0,
            (waypoints[0][1] + waypoints[1][1]) / 2.0,
        ];
        assert!((mid[0] - cluster[0]).abs() < 1e-9);
        assert!((mid[1] - cluster[1]).abs() < 1e-9);
    }

    #[test]
    fn scenic_gets_its_own_leading_variant() {
        assert_eq!(avoidance_variants(RouteProfile::Safest).len(), 5);
        assert_eq!(avoidance_variants(RouteProfile::Scenic).len(), 6);
    }
}
