//! The routing orchestrator: profile dispatch, candidate generation against
//! the engine, hard validation against hazard-zone cores, and the annotated
//! response.
//!
//! The orchestrator is stateless per request. Candidate requests fan out
//! concurrently; selection is deterministic for a fixed zone snapshot and
//! engine responses, tie-broken by fewest violations, lowest risk score,
//! shortest distance, then candidate enumeration order.

mod assembly;
mod avoidance;

use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};

use crate::bike_lanes::BikeLaneService;
use crate::config::Settings;
use crate::engine::costing::{BicycleCostingOptions, BicycleType};
use crate::engine::route::{Location, Manifest, Response, Trip};
use crate::engine::EngineApi;
use crate::error::Error;
use crate::models::{
    RouteComparison, RoutePreferences, RouteProfile, RouteRequest, RouteResponse, VehicleType,
};
use crate::risk_zones::{
    self, RiskZone, RiskZoneService, RouteValidation, Severity, DEFAULT_BUFFER_MULTIPLIER,
};

/// Speed assumed when the engine fails to report a travel time: 4.17 m/s,
/// about 15 km/h of urban riding.
const FALLBACK_SPEED_MPS: f64 = 4.17;

pub struct Router {
    engine: Arc<dyn EngineApi>,
    risk_zones: Arc<RiskZoneService>,
    bike_lanes: Arc<BikeLaneService>,
    settings: Settings,
}

/// One engine trip, decoded and measured against the zone snapshot.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub trip: Trip,
    pub coords: Vec<[f64; 2]>,
    pub distance_meters: f64,
    pub validation: RouteValidation,
    pub risk_score: f64,
    pub order: usize,
    /// Filled only by the bike-lane-preferred strategy.
    pub bike_lane_percentage: Option<f64>,
}

impl Candidate {
    fn from_trip(
        trip: Trip,
        zones: &[RiskZone],
        qualifying: &[RiskZone],
        min_severity: Severity,
        radius_factor: f64,
        order: usize,
    ) -> Option<Self> {
        let coords: Vec<[f64; 2]> = trip
            .legs
            .iter()
            .flat_map(|leg| leg.shape.iter().copied())
            .collect();
        if coords.is_empty() {
            return None;
        }
        let validation = risk_zones::validate_route(&coords, zones, min_severity, radius_factor);
        let assessment = risk_zones::risk_score(&coords, qualifying, radius_factor);
        let distance_meters = trip.summary.length * 1000.0;
        Some(Self {
            trip,
            coords,
            distance_meters,
            validation,
            risk_score: assessment.score,
            order,
            bike_lane_percentage: None,
        })
    }

    pub fn violations(&self) -> usize {
        self.validation.violations.len()
    }

    pub fn is_clean(&self) -> bool {
        self.validation.is_clean()
    }
}

/// The engine's reported time, with the fixed-speed estimate only as a
/// fallback for a missing or zero value. A non-zero engine time is never
/// replaced.
pub(crate) fn effective_duration(trip: &Trip) -> f64 {
    if trip.summary.time > 0.0 {
        trip.summary.time
    } else {
        trip.summary.length * 1000.0 / FALLBACK_SPEED_MPS
    }
}

/// Accumulated candidate state across pipeline stages.
#[derive(Default)]
pub(crate) struct CandidateBatch {
    pub valid: Vec<Candidate>,
    pub fallback: Vec<Candidate>,
    pub responses_ok: usize,
    /// First transport-level engine failure observed, if any.
    pub engine_down: Option<Error>,
    next_order: usize,
}

impl CandidateBatch {
    pub fn absorb(
        &mut self,
        outcomes: Vec<Result<Response, Error>>,
        zones: &[RiskZone],
        qualifying: &[RiskZone],
        min_severity: Severity,
        radius_factor: f64,
    ) {
        for outcome in outcomes {
            match outcome {
                Ok(response) => {
                    self.responses_ok += 1;
                    for trip in response.into_trips() {
                        let order = self.next_order;
                        self.next_order += 1;
                        if let Some(candidate) = Candidate::from_trip(
                            trip,
                            zones,
                            qualifying,
                            min_severity,
                            radius_factor,
                            order,
                        ) {
                            if candidate.is_clean() {
                                self.valid.push(candidate);
                            } else {
                                self.fallback.push(candidate);
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("candidate request failed: {e}");
                    if matches!(e, Error::EngineUnavailable(_)) && self.engine_down.is_none() {
                        self.engine_down = Some(e);
                    }
                }
            }
        }
    }

    /// Best clean candidate: shortest, then earliest enumerated.
    pub fn best_valid(&self) -> Option<&Candidate> {
        self.valid.iter().min_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then(a.order.cmp(&b.order))
        })
    }

    pub fn sort_fallbacks(&mut self) {
        self.fallback.sort_by(|a, b| {
            a.violations()
                .cmp(&b.violations())
                .then(a.risk_score.total_cmp(&b.risk_score))
                .then(a.distance_meters.total_cmp(&b.distance_meters))
                .then(a.order.cmp(&b.order))
        });
    }
}

pub(crate) fn variant(
    bicycle_type: BicycleType,
    use_roads: f32,
    use_hills: f32,
    avoid_bad_surfaces: f32,
) -> BicycleCostingOptions {
    BicycleCostingOptions::builder()
        .bicycle_type(bicycle_type)
        .use_roads(use_roads)
        .use_hills(use_hills)
        .avoid_bad_surfaces(avoid_bad_surfaces)
}

/// Per-profile engine-bias knobs, before the avoid-hills and bike-lane
/// overrides.
pub(crate) fn profile_costing(
    preferences: &RoutePreferences,
    vehicle_type: VehicleType,
) -> BicycleCostingOptions {
    let bicycle_type = if vehicle_type == VehicleType::Bike {
        BicycleType::Road
    } else {
        BicycleType::Hybrid
    };
    // FASTEST deliberately never sets `shortest`: that knob minimizes
    // distance, not time, and the engine optimizes time by default.
    let (mut use_roads, mut use_hills, mut avoid_bad_surfaces) = match preferences.profile {
        RouteProfile::Safest => (0.5, 0.3, 0.6),
        RouteProfile::Balanced => (0.5, 0.5, 0.5),
        RouteProfile::Fastest => (1.0, 1.0, 0.0),
        RouteProfile::Scenic => (0.3, 0.4, 0.6),
    };
    if preferences.prefer_bike_lanes {
        // Cycleway-only routing.
        use_roads = 0.0;
        avoid_bad_surfaces = 0.8;
    }
    if preferences.avoid_hills {
        use_hills = 0.1;
    }
    variant(bicycle_type, use_roads, use_hills, avoid_bad_surfaces)
}

impl Router {
    pub fn new(
        engine: Arc<dyn EngineApi>,
        risk_zones: Arc<RiskZoneService>,
        bike_lanes: Arc<BikeLaneService>,
        settings: Settings,
    ) -> Self {
        Self {
            engine,
            risk_zones,
            bike_lanes,
            settings,
        }
    }

    /// Calculate a single annotated route for the request.
    pub async fn calculate(&self, request: &RouteRequest) -> Result<RouteResponse, Error> {
        request.validate()?;

        if !request.avoid_risk_zones {
            return match request.preferences.profile {
                RouteProfile::Fastest => self.fastest_route(request).await,
                _ => self.basic_route(request).await,
            };
        }

        match request.preferences.profile {
            RouteProfile::Safest if request.preferences.prefer_bike_lanes => {
                self.bike_lane_preferred(request).await
            }
            RouteProfile::Safest => self.avoidance_route(request, Severity::Low).await,
            RouteProfile::Balanced => self.avoidance_route(request, Severity::High).await,
            RouteProfile::Scenic => self.avoidance_route(request, Severity::Low).await,
            RouteProfile::Fastest => self.fastest_route(request).await,
        }
    }

    /// Up to three routes ordered `[BALANCED, SAFEST, FASTEST]`, plus slot
    /// indices. The FASTEST slot always holds the lowest duration among the
    /// returned routes.
    pub async fn alternatives(
        &self,
        request: &RouteRequest,
        count: usize,
    ) -> Result<(Vec<RouteResponse>, RouteComparison), Error> {
        request.validate()?;
        let profiles = [
            RouteProfile::Balanced,
            RouteProfile::Safest,
            RouteProfile::Fastest,
        ];

        let mut routes = Vec::new();
        for profile in profiles.iter().take(count) {
            let mut profiled = request.clone();
            profiled.preferences.profile = *profile;
            match self.calculate(&profiled).await {
                Ok(route) => routes.push(route),
                Err(Error::RouteNotFound(e)) => {
                    debug!("alternative {profile:?} unroutable: {e}");
                }
                Err(e) => return Err(e),
            }
        }
        if routes.is_empty() {
            return Err(Error::RouteNotFound(
                "no alternative route could be calculated".to_owned(),
            ));
        }

        // Keep the FASTEST slot honest: if another profile beat it on time,
        // swap the routes so the slot invariant holds.
        if routes.len() >= 3 {
            let fastest_slot = 2;
            for i in 0..routes.len() {
                if i != fastest_slot
                    && routes[i].summary.duration_seconds
                        < routes[fastest_slot].summary.duration_seconds
                {
                    routes.swap(i, fastest_slot);
                }
            }
        }

        let fastest_index = index_of_min(&routes, |r| f64::from(r.summary.duration_seconds));
        let safest_index = index_of_min(&routes, |r| r.summary.risk_score);
        // Recommend the middle slot of the returned set.
        let recommended_index = routes.len() / 2;

        Ok((
            routes,
            RouteComparison {
                fastest_index,
                safest_index,
                recommended_index,
            },
        ))
    }

    /// FASTEST strategy: several permissive costing variants plus an
    /// alternates request, minimum duration wins. No avoidance logic.
    async fn fastest_route(&self, request: &RouteRequest) -> Result<RouteResponse, Error> {
        info!("calculating FASTEST route");
        let variants = [
            variant(BicycleType::Road, 0.5, 0.3, 0.5),
            variant(BicycleType::Cross, 0.6, 0.5, 0.4),
            variant(BicycleType::Road, 0.8, 0.6, 0.3),
            variant(BicycleType::Hybrid, 0.5, 0.4, 0.5),
        ];
        let mut manifests: Vec<Manifest> = variants
            .iter()
            .map(|v| self.route_manifest(request, v.clone(), &[]))
            .collect();
        manifests.push(
            self.route_manifest(request, variants[0].clone(), &[])
                .alternates(2),
        );

        let outcomes = self.submit(manifests).await;
        let mut engine_down = None;
        let mut best: Option<Trip> = None;
        for outcome in outcomes {
            match outcome {
                Ok(response) => {
                    for trip in response.into_trips() {
                        if trip.legs.iter().all(|l| l.shape.is_empty()) {
                            continue;
                        }
                        let better = best
                            .as_ref()
                            .map_or(true, |b| effective_duration(&trip) < effective_duration(b));
                        if better {
                            best = Some(trip);
                        }
                    }
                }
                Err(e) => {
                    debug!("fastest candidate failed: {e}");
                    if matches!(e, Error::EngineUnavailable(_)) && engine_down.is_none() {
                        engine_down = Some(e);
                    }
                }
            }
        }

        match best {
            Some(trip) => {
                info!(
                    "selected FASTEST route: {:.0}s, {:.0}m",
                    effective_duration(&trip),
                    trip.summary.length * 1000.0
                );
                self.assemble(&trip, request, 0).await
            }
            None => match engine_down {
                Some(e) if self.settings.dev_mock_routes => {
                    warn!("engine unavailable, serving development mock route: {e}");
                    Ok(self.mock_route(request))
                }
                Some(e) => Err(e),
                None => Err(Error::RouteNotFound(
                    "engine produced no usable fastest candidate".to_owned(),
                )),
            },
        }
    }

    /// SAFEST with the bike-lane toggle: costing variants that depress
    /// `use_roads` toward zero, validated against the full LOW-severity zone
    /// set, then scored on measured lane coverage with a detour penalty.
    async fn bike_lane_preferred(&self, request: &RouteRequest) -> Result<RouteResponse, Error> {
        info!("calculating SAFEST route with bike lane preference");
        let zones = self.risk_zones.snapshot().await?;
        let qualifying = risk_zones::filter_by_severity(&zones, Severity::Low);
        let radius_factor = avoidance::avoidance_radius_factor(Severity::Low);

        let batches = risk_zones::exclusion_batches(
            &zones,
            DEFAULT_BUFFER_MULTIPLIER,
            Severity::Low,
            self.settings.exclusion_budget_meters,
        );
        // The first batch carries the highest report counts.
        let exclusions = batches.into_iter().next().unwrap_or_default();

        let variants = [
            variant(BicycleType::Hybrid, 0.0, 0.3, 0.8),
            variant(BicycleType::Road, 0.1, 0.3, 0.7),
            variant(BicycleType::Hybrid, 0.2, 0.4, 0.6),
            variant(BicycleType::Cross, 0.3, 0.4, 0.6),
        ];
        let mut manifests: Vec<Manifest> = variants
            .iter()
            .map(|v| {
                self.route_manifest(request, v.clone(), &[])
                    .exclude_polygons(exclusions.clone())
            })
            .collect();
        manifests.push(
            self.route_manifest(request, variants[0].clone(), &[])
                .alternates(2)
                .exclude_polygons(exclusions.clone()),
        );

        let outcomes = self.submit(manifests).await;
        let mut batch = CandidateBatch::default();
        batch.absorb(outcomes, &zones, &qualifying, Severity::Low, radius_factor);

        if batch.responses_ok == 0 {
            if let Some(e) = batch.engine_down {
                return if self.settings.dev_mock_routes {
                    warn!("engine unavailable, serving development mock route: {e}");
                    Ok(self.mock_route(request))
                } else {
                    Err(e)
                };
            }
        }
        if batch.valid.is_empty() && batch.fallback.is_empty() {
            warn!("no bike lane candidates found, falling back to standard safest");
            return self.avoidance_route(request, Severity::Low).await;
        }

        for candidate in batch.valid.iter_mut().chain(batch.fallback.iter_mut()) {
            let (percentage, _) = self.bike_lanes.coverage(&candidate.coords).await;
            candidate.bike_lane_percentage = Some(percentage);
        }

        if !batch.valid.is_empty() {
            let min_distance = batch
                .valid
                .iter()
                .map(|c| c.distance_meters)
                .fold(f64::INFINITY, f64::min);
            // Highest coverage wins, but a detour costs 50 points per doubled
            // distance so a 2x-long route never wins on a few extra percent.
            let score = |c: &Candidate| {
                let percentage = c.bike_lane_percentage.unwrap_or(0.0);
                let ratio = if min_distance > 0.0 {
                    c.distance_meters / min_distance
                } else {
                    1.0
                };
                percentage - 50.0 * (ratio - 1.0).max(0.0)
            };
            let best = batch
                .valid
                .iter()
                .min_by(|a, b| score(b).total_cmp(&score(a)).then(a.order.cmp(&b.order)))
                .expect("valid candidates are non-empty");
            info!(
                "selected bike lane preferred route: {:.1}% lanes, {:.0}m, clean",
                best.bike_lane_percentage.unwrap_or(0.0),
                best.distance_meters
            );
            return self.assemble(&best.trip, request, 0).await;
        }

        batch.fallback.sort_by(|a, b| {
            a.violations()
                .cmp(&b.violations())
                .then(
                    b.bike_lane_percentage
                        .unwrap_or(0.0)
                        .total_cmp(&a.bike_lane_percentage.unwrap_or(0.0)),
                )
                .then(a.order.cmp(&b.order))
        });
        let best = &batch.fallback[0];
        warn!(
            "no completely clean bike lane route, using least-bad: {:.1}% lanes, {} violations",
            best.bike_lane_percentage.unwrap_or(0.0),
            best.violations()
        );
        self.assemble(&best.trip, request, best.violations()).await
    }

    /// Single profile-costed route with no avoidance machinery; used when
    /// zone avoidance is off or no zone qualifies.
    pub(crate) async fn basic_route(&self, request: &RouteRequest) -> Result<RouteResponse, Error> {
        let costing = profile_costing(&request.preferences, request.vehicle_type);
        let manifest = self.route_manifest(request, costing, &[]);
        match self.engine.route(manifest).await {
            Ok(response) => self.assemble(&response.trip, request, 0).await,
            Err(Error::EngineUnavailable(e)) if self.settings.dev_mock_routes => {
                warn!("engine unavailable, serving development mock route: {e}");
                Ok(self.mock_route(request))
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn route_manifest(
        &self,
        request: &RouteRequest,
        costing: BicycleCostingOptions,
        through_waypoints: &[[f64; 2]],
    ) -> Manifest {
        let mut locations = Vec::with_capacity(through_waypoints.len() + 2);
        locations.push(Location::new(
            request.origin.longitude,
            request.origin.latitude,
        ));
        for waypoint in through_waypoints {
            locations.push(Location::through(waypoint[0], waypoint[1]));
        }
        locations.push(Location::new(
            request.destination.longitude,
            request.destination.latitude,
        ));
        Manifest::builder().locations(locations).costing(costing)
    }

    pub(crate) async fn submit(
        &self,
        manifests: Vec<Manifest>,
    ) -> Vec<Result<Response, Error>> {
        join_all(manifests.into_iter().map(|m| self.engine.route(m))).await
    }
}

fn index_of_min(routes: &[RouteResponse], key: impl Fn(&RouteResponse) -> f64) -> usize {
    let mut index = 0;
    for (i, route) in routes.iter().enumerate() {
        if key(route) < key(&routes[index]) {
            index = i;
        }
    }
    index
}
