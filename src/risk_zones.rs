//! Hazard-zone snapshot, severity policy, exclusion-polygon budgeting, and
//! route validation/scoring.
//!
//! The zone snapshot is safety-critical: a refresh failure serves the stale
//! snapshot with a warning, but a missing snapshot fails the request with
//! [`Error::RiskZoneUnavailable`]. Routing against an empty substitute list
//! would silently produce an unsafe route.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::config::Settings;
use crate::error::Error;
use crate::geodesy;
use crate::models::{BoundingBox, Coordinate};

/// Safety cushion under the engine's 10 000 m total-circumference cap.
pub const EXCLUSION_BUDGET_METERS: f64 = 9_500.0;

/// 8 vertices: enough to close the corner gaps a square leaves, without
/// starving the circumference budget the way 16+ does.
pub const POLYGON_VERTICES: usize = 8;

/// Polygon radii are capped here (then buffered) so more zone centers fit
/// under the engine's exclusion limit; validation later uses each zone's
/// true radius.
const POLYGON_RADIUS_CAP_METERS: f64 = 150.0;

pub const DEFAULT_BUFFER_MULTIPLIER: f64 = 1.5;

/// Zone severity, derived at ingest from the report count.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Severity tier for a zone's report count. These thresholds match the
    /// rider-facing map legend and are part of the contract.
    pub fn from_reported_count(reported_count: u32) -> Self {
        match reported_count {
            0..=159 => Self::Low,
            160..=179 => Self::Medium,
            180..=229 => Self::High,
            _ => Self::Critical,
        }
    }

    /// Minimum report count a zone needs to qualify when filtering at this
    /// severity floor. LOW and MEDIUM share a threshold: both mean "every
    /// zone the rider can see on the map".
    pub fn min_reported_count(self) -> u32 {
        match self {
            Self::Low | Self::Medium => 140,
            Self::High => 180,
            Self::Critical => 230,
        }
    }

    /// Weight applied when accumulating proximity risk.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Medium => 0.5,
            Self::High => 1.0,
            Self::Critical => 1.5,
        }
    }

    pub fn is_high_or_critical(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// Immutable hazard-zone snapshot entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RiskZone {
    pub id: Uuid,
    pub center: Coordinate,
    /// Rider-alert perimeter, meters. The validation core is a fraction of
    /// this.
    pub alert_radius_meters: u32,
    pub severity: Severity,
    pub reported_count: u32,
    pub is_active: bool,
}

impl RiskZone {
    /// Build a zone from ingest data, deriving severity from the count.
    pub fn from_reports(
        id: Uuid,
        center: Coordinate,
        alert_radius_meters: u32,
        reported_count: u32,
    ) -> Self {
        Self {
            id,
            center,
            alert_radius_meters,
            severity: Severity::from_reported_count(reported_count),
            reported_count,
            is_active: true,
        }
    }

    fn qualifies(&self, min_severity: Severity) -> bool {
        self.reported_count >= min_severity.min_reported_count()
    }

    fn lon_lat(&self) -> [f64; 2] {
        self.center.lon_lat()
    }
}

/// Where zone snapshots come from (the spatial store behind the boundary).
#[async_trait]
pub trait ZoneStore: Send + Sync {
    async fn fetch_active_zones(&self) -> Result<Vec<RiskZone>, Error>;
}

/// One violation per zone: the first route point inside the zone's danger
/// core, with the closest-approach distance recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneViolation {
    pub zone_id: Uuid,
    pub reported_count: u32,
    pub distance_meters: f64,
    pub zone_radius_meters: f64,
    pub avoidance_radius_meters: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteValidation {
    pub violations: Vec<ZoneViolation>,
}

impl RouteValidation {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RiskAssessment {
    /// Normalized proximity risk in `[0, 1]`.
    pub score: f64,
    /// Number of zones whose danger core the route enters.
    pub zone_passes: u32,
    pub zone_ids: Vec<Uuid>,
}

/// Retain zones whose report count meets the floor for `min_severity`.
pub fn filter_by_severity(zones: &[RiskZone], min_severity: Severity) -> Vec<RiskZone> {
    let filtered: Vec<RiskZone> = zones
        .iter()
        .filter(|z| z.qualifies(min_severity))
        .cloned()
        .collect();
    debug!(
        "filtered zones: {} of {} at min severity {:?}",
        filtered.len(),
        zones.len(),
        min_severity
    );
    filtered
}

/// Build one batch of exclusion polygons, highest report counts first,
/// stopping before the circumference budget would be exceeded.
pub fn exclusion_polygons(
    zones: &[RiskZone],
    buffer_multiplier: f64,
    min_severity: Severity,
    max_circumference: f64,
) -> Vec<Vec<[f64; 2]>> {
    let mut qualifying = filter_by_severity(zones, min_severity);
    qualifying.sort_by(|a, b| b.reported_count.cmp(&a.reported_count));

    let mut polygons = Vec::new();
    let mut total_circumference = 0.0;
    for zone in &qualifying {
        let radius =
            f64::from(zone.alert_radius_meters).min(POLYGON_RADIUS_CAP_METERS) * buffer_multiplier;
        let circumference = 2.0 * std::f64::consts::PI * radius;
        if total_circumference + circumference > max_circumference {
            info!(
                "stopping at {} exclusion polygons due to circumference limit",
                polygons.len()
            );
            break;
        }
        polygons.push(geodesy::circular_polygon(
            zone.lon_lat(),
            radius,
            POLYGON_VERTICES,
        ));
        total_circumference += circumference;
    }
    polygons
}

/// Same policy as [`exclusion_polygons`], but split into multiple batches so
/// every qualifying zone is covered by some batch.
pub fn exclusion_batches(
    zones: &[RiskZone],
    buffer_multiplier: f64,
    min_severity: Severity,
    max_circumference: f64,
) -> Vec<Vec<Vec<[f64; 2]>>> {
    let mut qualifying = filter_by_severity(zones, min_severity);
    qualifying.sort_by(|a, b| b.reported_count.cmp(&a.reported_count));

    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_circumference = 0.0;

    for zone in &qualifying {
        let radius =
            f64::from(zone.alert_radius_meters).min(POLYGON_RADIUS_CAP_METERS) * buffer_multiplier;
        let circumference = 2.0 * std::f64::consts::PI * radius;

        if current_circumference + circumference > max_circumference {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            current_circumference = 0.0;
        }
        current.push(geodesy::circular_polygon(
            zone.lon_lat(),
            radius,
            POLYGON_VERTICES,
        ));
        current_circumference += circumference;
    }
    if !current.is_empty() {
        batches.push(current);
    }

    info!(
        "built {} exclusion batches covering {} zones",
        batches.len(),
        qualifying.len()
    );
    batches
}

/// Focused exclusion set around specific zones, using the enlarged radius
/// `alert_radius * radius_factor * 3.0`, still under the budget.
pub fn focused_exclusion_polygons(
    zones: &[&RiskZone],
    radius_factor: f64,
    max_circumference: f64,
) -> Vec<Vec<[f64; 2]>> {
    let mut polygons = Vec::new();
    let mut total_circumference = 0.0;
    for zone in zones {
        let radius = f64::from(zone.alert_radius_meters) * radius_factor * 3.0;
        let circumference = 2.0 * std::f64::consts::PI * radius;
        if total_circumference + circumference > max_circumference {
            break;
        }
        polygons.push(geodesy::circular_polygon(
            zone.lon_lat(),
            radius,
            POLYGON_VERTICES,
        ));
        total_circumference += circumference;
    }
    polygons
}

/// Check a route geometry against the danger cores of every qualifying zone.
///
/// A zone is violated when any route point lies within
/// `alert_radius * radius_factor` of its center. The first offending point
/// per zone is recorded; zones whose core the route never enters contribute
/// nothing.
pub fn validate_route(
    coords: &[[f64; 2]],
    zones: &[RiskZone],
    min_severity: Severity,
    radius_factor: f64,
) -> RouteValidation {
    let mut validation = RouteValidation::default();
    let Some(bounds) = route_bounds(coords) else {
        return validation;
    };

    for zone in zones.iter().filter(|z| z.qualifies(min_severity)) {
        let avoidance_radius = f64::from(zone.alert_radius_meters) * radius_factor;
        if !bounds.covers(zone.lon_lat(), avoidance_radius) {
            continue;
        }
        for coord in coords {
            let distance = geodesy::haversine_distance(*coord, zone.lon_lat());
            if distance < avoidance_radius {
                validation.violations.push(ZoneViolation {
                    zone_id: zone.id,
                    reported_count: zone.reported_count,
                    distance_meters: distance,
                    zone_radius_meters: f64::from(zone.alert_radius_meters),
                    avoidance_radius_meters: avoidance_radius,
                });
                break;
            }
        }
    }
    validation
}

/// Score a route by proximity to zone cores.
///
/// Each entered core contributes `closeness * severity_weight` where
/// `closeness = 1 - d / r_core`; the total normalizes against
/// `|zones| * 0.3` and clamps to `[0, 1]`.
pub fn risk_score(coords: &[[f64; 2]], zones: &[RiskZone], radius_factor: f64) -> RiskAssessment {
    let mut assessment = RiskAssessment::default();
    if zones.is_empty() {
        return assessment;
    }
    let Some(bounds) = route_bounds(coords) else {
        return assessment;
    };

    let mut total_risk_points = 0.0;
    for zone in zones {
        let core_radius = f64::from(zone.alert_radius_meters) * radius_factor;
        if !bounds.covers(zone.lon_lat(), core_radius) {
            continue;
        }
        for coord in coords {
            let distance = geodesy::haversine_distance(*coord, zone.lon_lat());
            if distance < core_radius {
                assessment.zone_passes += 1;
                assessment.zone_ids.push(zone.id);
                let closeness = if core_radius > 0.0 {
                    1.0 - distance / core_radius
                } else {
                    1.0
                };
                total_risk_points += closeness * zone.severity.weight();
                break;
            }
        }
    }

    assessment.score = (total_risk_points / (zones.len() as f64 * 0.3)).min(1.0);
    assessment
}

/// Route bounding box used to skip zones that cannot possibly be violated.
struct RouteBounds {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl RouteBounds {
    fn covers(&self, center: [f64; 2], radius_meters: f64) -> bool {
        // Conservative degrees-per-meter: longitude at SF runs ~88 km/degree,
        // so 80 km/degree over-expands slightly and never skips a real hit.
        let margin = radius_meters / 80_000.0;
        center[0] >= self.min_lon - margin
            && center[0] <= self.max_lon + margin
            && center[1] >= self.min_lat - margin
            && center[1] <= self.max_lat + margin
    }
}

fn route_bounds(coords: &[[f64; 2]]) -> Option<RouteBounds> {
    let first = coords.first()?;
    let mut bounds = RouteBounds {
        min_lon: first[0],
        min_lat: first[1],
        max_lon: first[0],
        max_lat: first[1],
    };
    for c in coords {
        bounds.min_lon = bounds.min_lon.min(c[0]);
        bounds.min_lat = bounds.min_lat.min(c[1]);
        bounds.max_lon = bounds.max_lon.max(c[0]);
        bounds.max_lat = bounds.max_lat.max(c[1]);
    }
    Some(bounds)
}

/// TTL-cached snapshot of the active hazard zones, plus the spatial queries
/// the zone endpoints are built on.
pub struct RiskZoneService {
    store: Arc<dyn ZoneStore>,
    cache: SnapshotCache<Vec<RiskZone>>,
}

impl RiskZoneService {
    pub fn new(store: Arc<dyn ZoneStore>, settings: &Settings) -> Self {
        Self {
            store,
            cache: SnapshotCache::new(settings.snapshot_ttl, settings.refresh_timeout),
        }
    }

    /// The active zone snapshot.
    ///
    /// Serves stale data on refresh failure; fails with
    /// [`Error::RiskZoneUnavailable`] only when no snapshot exists at all.
    pub async fn snapshot(&self) -> Result<Arc<Vec<RiskZone>>, Error> {
        let store = self.store.clone();
        self.cache
            .get_with(move || async move {
                let zones = store.fetch_active_zones().await?;
                info!("loaded {} active risk zones", zones.len());
                Ok(zones)
            })
            .await
            .map_err(|e| match e {
                Error::RiskZoneUnavailable(_) => e,
                other => Error::RiskZoneUnavailable(other.to_string()),
            })
    }

    /// Drop snapshot freshness; called when a report is verified so the next
    /// request picks up the new zone set.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub async fn zones_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<RiskZone>, Error> {
        let zones = self.snapshot().await?;
        Ok(zones
            .iter()
            .filter(|z| bbox.contains(z.center.longitude, z.center.latitude))
            .cloned()
            .collect())
    }

    /// Zones within `radius_meters` of a point; the radius must be within
    /// `[10, 1000]` meters.
    pub async fn zones_near(
        &self,
        center: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<RiskZone>, Error> {
        center.validate()?;
        if !(10.0..=1000.0).contains(&radius_meters) {
            return Err(Error::Validation(
                "radius must be within [10, 1000] meters".to_owned(),
            ));
        }
        let zones = self.snapshot().await?;
        Ok(zones
            .iter()
            .filter(|z| {
                geodesy::haversine_distance(center.lon_lat(), z.lon_lat()) <= radius_meters
            })
            .cloned()
            .collect())
    }
}

/// Zone ids violated most often across a set of validations, descending.
pub fn most_violated_zones(validations: &[RouteValidation]) -> Vec<Uuid> {
    let mut counts: HashMap<Uuid, usize> = HashMap::new();
    for validation in validations {
        for violation in &validation.violations {
            *counts.entry(violation.zone_id).or_default() += 1;
        }
    }
    let mut ids: Vec<(Uuid, usize)> = counts.into_iter().collect();
    ids.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ids.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn zone(lon: f64, lat: f64, radius: u32, count: u32) -> RiskZone {
        RiskZone::from_reports(Uuid::new_v4(), Coordinate::new(lat, lon), radius, count)
    }

    #[test]
    fn severity_derivation_matches_legend() {
        assert_eq!(Severity::from_reported_count(0), Severity::Low);
        assert_eq!(Severity::from_reported_count(159), Severity::Low);
        assert_eq!(Severity::from_reported_count(160), Severity::Medium);
        assert_eq!(Severity::from_reported_count(179), Severity::Medium);
        assert_eq!(Severity::from_reported_count(180), Severity::High);
        assert_eq!(Severity::from_reported_count(229), Severity::High);
        assert_eq!(Severity::from_reported_count(230), Severity::Critical);
    }

    #[test]
    fn severity_filter_thresholds() {
        let zones = vec![
            zone(-122.41, 37.78, 150, 139),
            zone(-122.42, 37.78, 150, 150),
            zone(-122.43, 37.78, 150, 185),
            zone(-122.44, 37.78, 150, 240),
        ];
        assert_eq!(filter_by_severity(&zones, Severity::Low).len(), 3);
        assert_eq!(filter_by_severity(&zones, Severity::Medium).len(), 3);
        assert_eq!(filter_by_severity(&zones, Severity::High).len(), 2);
        assert_eq!(filter_by_severity(&zones, Severity::Critical).len(), 1);
    }

    #[test]
    fn exclusion_polygons_respect_budget() {
        let zones: Vec<RiskZone> = (0..40)
            .map(|i| zone(-122.40 - 0.005 * f64::from(i), 37.77, 300, 250))
            .collect();
        let polygons = exclusion_polygons(
            &zones,
            DEFAULT_BUFFER_MULTIPLIER,
            Severity::Low,
            EXCLUSION_BUDGET_METERS,
        );

        // Radius caps at 150, buffers to 225: ~1414 m of circumference each,
        // so six fit under 9 500 m.
        assert_eq!(polygons.len(), 6);
        let total: f64 = polygons.len() as f64 * 2.0 * std::f64::consts::PI * 225.0;
        assert!(total <= EXCLUSION_BUDGET_METERS);
        for polygon in &polygons {
            assert_eq!(polygon.len(), POLYGON_VERTICES + 1);
            assert_eq!(polygon[0], polygon[POLYGON_VERTICES]);
        }
    }

    #[test]
    fn batches_cover_all_qualifying_zones() {
        let zones: Vec<RiskZone> = (0..40)
            .map(|i| zone(-122.40 - 0.005 * f64::from(i), 37.77, 300, 250))
            .collect();
        let batches = exclusion_batches(
            &zones,
            DEFAULT_BUFFER_MULTIPLIER,
            Severity::Low,
            EXCLUSION_BUDGET_METERS,
        );

        let covered: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(covered, 40);
        for batch in &batches {
            let circumference: f64 = batch.len() as f64 * 2.0 * std::f64::consts::PI * 225.0;
            assert!(circumference <= EXCLUSION_BUDGET_METERS);
        }
    }

    #[test]
    fn highest_report_counts_are_excluded_first() {
        let hot = zone(-122.40, 37.77, 100, 260);
        let mild = zone(-122.45, 37.79, 100, 150);
        let polygons = exclusion_polygons(
            &[mild, hot.clone()],
            DEFAULT_BUFFER_MULTIPLIER,
            Severity::Low,
            // Room for exactly one polygon.
            2.0 * std::f64::consts::PI * 150.0 * 1.5 + 1.0,
        );
        assert_eq!(polygons.len(), 1);
        // The hot zone's polygon is centered near its longitude.
        let lon_center: f64 =
            polygons[0][..POLYGON_VERTICES].iter().map(|c| c[0]).sum::<f64>() / 8.0;
        assert!((lon_center - hot.center.longitude).abs() < 0.01);
    }

    #[test]
    fn validation_flags_core_intrusions_only() {
        let z = zone(-122.42, 37.78, 400, 250);
        // 0.25 * 400 = 100 m core. A point ~55 m east of center violates;
        // a point ~555 m east does not.
        let inside = [-122.42 + 0.0005, 37.78];
        let outside = [-122.42 + 0.005, 37.78];

        let validation = validate_route(&[inside], &[z.clone()], Severity::Low, 0.25);
        assert!(!validation.is_clean());
        assert_eq!(validation.violations.len(), 1);
        assert!(validation.violations[0].distance_meters < 100.0);

        let validation = validate_route(&[outside], &[z], Severity::Low, 0.25);
        assert!(validation.is_clean());
    }

    #[test]
    fn balanced_factor_is_looser_than_safest() {
        let z = zone(-122.42, 37.78, 400, 250);
        // ~90 m from center: inside the 100 m SAFEST core, outside the 80 m
        // BALANCED core.
        let point = [-122.42 + 0.00102, 37.78];
        assert!(!validate_route(&[point], &[z.clone()], Severity::Low, 0.25).is_clean());
        assert!(validate_route(&[point], &[z], Severity::Low, 0.2).is_clean());
    }

    #[test]
    fn risk_score_weighting_and_clamp() {
        let critical = zone(-122.42, 37.78, 400, 250);
        let center_point = [-122.42, 37.78];

        // A single zone with the route at its center: closeness 1.0, weight
        // 1.5, normalized by 1 * 0.3 and clamped to 1.
        let assessment = risk_score(&[center_point], &[critical.clone()], 0.25);
        assert_eq!(assessment.score, 1.0);
        assert_eq!(assessment.zone_passes, 1);
        assert_eq!(assessment.zone_ids.len(), 1);

        // Far away: zero contribution.
        let assessment = risk_score(&[[-122.50, 37.70]], &[critical], 0.25);
        assert_eq!(assessment.score, 0.0);
        assert_eq!(assessment.zone_passes, 0);
    }

    #[test]
    fn risk_score_empty_inputs() {
        assert_eq!(risk_score(&[], &[], 0.25), RiskAssessment::default());
        let z = zone(-122.42, 37.78, 200, 200);
        assert_eq!(risk_score(&[], &[z], 0.25), RiskAssessment::default());
    }

    #[test]
    fn most_violated_orders_by_frequency() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let violation = |id| ZoneViolation {
            zone_id: id,
            reported_count: 200,
            distance_meters: 10.0,
            zone_radius_meters: 200.0,
            avoidance_radius_meters: 50.0,
        };
        let validations = vec![
            RouteValidation {
                violations: vec![violation(a), violation(b)],
            },
            RouteValidation {
                violations: vec![violation(b)],
            },
        ];
        assert_eq!(most_violated_zones(&validations), vec![b, a]);
    }

    struct StaticStore(Vec<RiskZone>);

    #[async_trait]
    impl ZoneStore for StaticStore {
        async fn fetch_active_zones(&self) -> Result<Vec<RiskZone>, Error> {
            Ok(self.0.clone())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ZoneStore for FailingStore {
        async fn fetch_active_zones(&self) -> Result<Vec<RiskZone>, Error> {
            Err(Error::Internal("zone store is down".to_owned()))
        }
    }

    fn test_settings() -> Settings {
        Settings {
            snapshot_ttl: Duration::from_secs(3600),
            refresh_timeout: Duration::from_secs(5),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn empty_cache_with_failing_store_is_fatal() {
        let service = RiskZoneService::new(Arc::new(FailingStore), &test_settings());
        let result = service.snapshot().await;
        assert!(matches!(result, Err(Error::RiskZoneUnavailable(_))));
    }

    #[tokio::test]
    async fn bbox_and_near_queries() {
        let inside = zone(-122.42, 37.78, 200, 200);
        let outside = zone(-122.60, 37.60, 200, 200);
        let service = RiskZoneService::new(
            Arc::new(StaticStore(vec![inside.clone(), outside])),
            &test_settings(),
        );

        let bbox: BoundingBox = "-122.52,37.70,-122.35,37.83".parse().unwrap();
        let found = service.zones_in_bbox(&bbox).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, inside.id);

        let near = service
            .zones_near(Coordinate::new(37.78, -122.42), 500.0)
            .await
            .unwrap();
        assert_eq!(near.len(), 1);

        let err = service
            .zones_near(Coordinate::new(37.78, -122.42), 5000.0)
            .await;
        assert!(matches!(err, Err(Error::Validation(_))));
    }
}
