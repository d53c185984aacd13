//! Municipal bikeway snapshot and route-coverage measurement.
//!
//! Only Class I (off-street path), Class II (painted lane), and Class IV
//! (protected lane) count as real infrastructure; Class III shared-lane
//! markings are excluded. Coverage samples four points per route segment
//! against the lane geometry with a 25 m slack that absorbs street width
//! and source coordinate error. The slack and the 90 000 m/degree
//! conversion are tuned together; neither is adjustable on its own.

use std::sync::Arc;

use async_trait::async_trait;
use geo::{EuclideanDistance, LineString, Point};
use log::{info, warn};

use crate::cache::SnapshotCache;
use crate::config::Settings;
use crate::error::Error;
use crate::geodesy;

pub const COVERAGE_SLACK_METERS: f64 = 25.0;

/// Degrees-to-meters conversion at SF latitudes, shared with the coverage
/// slack above.
pub const METERS_PER_DEGREE: f64 = 90_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityClass {
    /// Off-street bike path.
    ClassI,
    /// Painted on-street lane.
    ClassII,
    /// Shared-lane markings (sharrows); not real infrastructure.
    ClassIII,
    /// Physically protected lane.
    ClassIV,
}

impl FacilityClass {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "CLASS I" => Some(Self::ClassI),
            "CLASS II" => Some(Self::ClassII),
            "CLASS III" => Some(Self::ClassIII),
            "CLASS IV" => Some(Self::ClassIV),
            _ => None,
        }
    }

    pub fn is_real_infrastructure(self) -> bool {
        matches!(self, Self::ClassI | Self::ClassII | Self::ClassIV)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BikeLaneSegment {
    pub facility_class: FacilityClass,
    pub geometry: LineString<f64>,
}

/// Where the bikeway feature collection comes from.
#[async_trait]
pub trait BikewayStore: Send + Sync {
    async fn fetch_segments(&self) -> Result<Vec<BikeLaneSegment>, Error>;
}

/// SF Open Data SFMTA Bikeway Network source.
pub struct SfOpenDataStore {
    client: reqwest::Client,
    url: url::Url,
}

impl SfOpenDataStore {
    pub fn from_settings(settings: &Settings) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.engine_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url: settings.bikeway_source_url.clone(),
        })
    }
}

#[async_trait]
impl BikewayStore for SfOpenDataStore {
    async fn fetch_segments(&self) -> Result<Vec<BikeLaneSegment>, Error> {
        let body = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::Internal(format!("bikeway fetch failed: {e}")))?
            .text()
            .await
            .map_err(|e| Error::Internal(format!("bikeway fetch failed: {e}")))?;
        parse_feature_collection(&body)
    }
}

fn parse_feature_collection(body: &str) -> Result<Vec<BikeLaneSegment>, Error> {
    let geojson: geojson::GeoJson = body
        .parse()
        .map_err(|e| Error::Internal(format!("bikeway source returned invalid GeoJSON: {e}")))?;
    let collection = geojson::FeatureCollection::try_from(geojson)
        .map_err(|e| Error::Internal(format!("bikeway source is not a FeatureCollection: {e}")))?;

    let mut segments = Vec::new();
    for feature in collection.features {
        let Some(label) = feature
            .properties
            .as_ref()
            .and_then(|p| p.get("facility_t"))
            .and_then(|v| v.as_str())
        else {
            continue;
        };
        let Some(facility_class) = FacilityClass::from_label(label) else {
            continue;
        };
        let Some(geometry) = feature.geometry else {
            continue;
        };
        match geometry.value {
            geojson::Value::LineString(coords) => {
                if let Some(line) = line_from_positions(&coords) {
                    segments.push(BikeLaneSegment {
                        facility_class,
                        geometry: line,
                    });
                }
            }
            geojson::Value::MultiLineString(lines) => {
                for coords in &lines {
                    if let Some(line) = line_from_positions(coords) {
                        segments.push(BikeLaneSegment {
                            facility_class,
                            geometry: line,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    Ok(segments)
}

fn line_from_positions(positions: &[Vec<f64>]) -> Option<LineString<f64>> {
    if positions.len() < 2 {
        return None;
    }
    let coords: Vec<(f64, f64)> = positions
        .iter()
        .filter(|p| p.len() >= 2)
        .map(|p| (p[0], p[1]))
        .collect();
    (coords.len() >= 2).then(|| LineString::from(coords))
}

/// The lane geometry actually measured against: real-infrastructure classes
/// only.
#[derive(Debug, Clone, Default)]
pub struct BikeLaneNetwork {
    lines: Vec<LineString<f64>>,
}

impl BikeLaneNetwork {
    pub fn from_segments(segments: Vec<BikeLaneSegment>) -> Self {
        let total = segments.len();
        let lines: Vec<LineString<f64>> = segments
            .into_iter()
            .filter(|s| s.facility_class.is_real_infrastructure())
            .map(|s| s.geometry)
            .collect();
        info!(
            "bikeway network: {} real-infrastructure features ({} excluded as sharrows or unknown)",
            lines.len(),
            total - lines.len()
        );
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Distance in raw degrees from a point to the nearest lane; infinite
    /// when the network is empty.
    fn distance_degrees(&self, point: Point<f64>) -> f64 {
        self.lines
            .iter()
            .map(|line| point.euclidean_distance(line))
            .fold(f64::INFINITY, f64::min)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CoverageStats {
    pub total_distance_meters: f64,
    pub bike_lane_distance_meters: f64,
    pub road_distance_meters: f64,
    pub segments_checked: u32,
    pub segments_on_network: u32,
    /// Set when the figure came from the engine's trace fallback instead of
    /// the municipal source.
    pub engine_fallback: bool,
}

pub struct BikeLaneService {
    store: Arc<dyn BikewayStore>,
    cache: SnapshotCache<BikeLaneNetwork>,
}

impl BikeLaneService {
    pub fn new(store: Arc<dyn BikewayStore>, settings: &Settings) -> Self {
        Self {
            store,
            cache: SnapshotCache::new(settings.snapshot_ttl, settings.refresh_timeout),
        }
    }

    /// The lane network snapshot. Unlike zone data this is not
    /// safety-critical, so an unavailable source degrades to an empty
    /// network (coverage then reports 0 and the caller may use the engine
    /// fallback).
    pub async fn network(&self) -> Arc<BikeLaneNetwork> {
        let store = self.store.clone();
        match self
            .cache
            .get_with(move || async move { store.fetch_segments().await.map(BikeLaneNetwork::from_segments) })
            .await
        {
            Ok(network) => network,
            Err(e) => {
                warn!("bikeway source unavailable, coverage will report zero: {e}");
                Arc::new(BikeLaneNetwork::default())
            }
        }
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Fraction of the route's length on real bike infrastructure, in
    /// `[0, 100]`.
    ///
    /// Each consecutive segment is sampled at parametric positions
    /// {0, 1/3, 2/3, 1}; a sample is on-network within the 25 m slack, and a
    /// segment counts when at least two of its four samples are on.
    pub async fn coverage(&self, coords: &[[f64; 2]]) -> (f64, CoverageStats) {
        let mut stats = CoverageStats::default();
        if coords.len() < 2 {
            return (0.0, stats);
        }

        let network = self.network().await;
        if network.is_empty() {
            return (0.0, stats);
        }

        let slack_degrees = COVERAGE_SLACK_METERS / METERS_PER_DEGREE;
        for pair in coords.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let segment_length = geodesy::haversine_distance(a, b);
            stats.total_distance_meters += segment_length;
            stats.segments_checked += 1;

            let mut samples_on = 0;
            for t in [0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0] {
                let sample = Point::new(a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t);
                if network.distance_degrees(sample) <= slack_degrees {
                    samples_on += 1;
                }
            }
            if samples_on >= 2 {
                stats.bike_lane_distance_meters += segment_length;
                stats.segments_on_network += 1;
            }
        }

        if stats.total_distance_meters == 0.0 {
            return (0.0, stats);
        }
        stats.road_distance_meters = stats.total_distance_meters - stats.bike_lane_distance_meters;
        let percentage =
            (stats.bike_lane_distance_meters / stats.total_distance_meters * 100.0).clamp(0.0, 100.0);
        (percentage, stats)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct StaticStore(Vec<BikeLaneSegment>);

    #[async_trait]
    impl BikewayStore for StaticStore {
        async fn fetch_segments(&self) -> Result<Vec<BikeLaneSegment>, Error> {
            Ok(self.0.clone())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl BikewayStore for FailingStore {
        async fn fetch_segments(&self) -> Result<Vec<BikeLaneSegment>, Error> {
            Err(Error::Internal("open data is down".to_owned()))
        }
    }

    fn lane(class: FacilityClass, coords: Vec<(f64, f64)>) -> BikeLaneSegment {
        BikeLaneSegment {
            facility_class: class,
            geometry: LineString::from(coords),
        }
    }

    fn service_with(segments: Vec<BikeLaneSegment>) -> BikeLaneService {
        BikeLaneService::new(Arc::new(StaticStore(segments)), &Settings::default())
    }

    #[test]
    fn facility_labels() {
        assert_eq!(FacilityClass::from_label("CLASS I"), Some(FacilityClass::ClassI));
        assert_eq!(FacilityClass::from_label("class iv"), Some(FacilityClass::ClassIV));
        assert_eq!(FacilityClass::from_label("SHARED ROADWAY"), None);
        assert!(FacilityClass::ClassII.is_real_infrastructure());
        assert!(!FacilityClass::ClassIII.is_real_infrastructure());
    }

    #[test]
    fn network_excludes_sharrows() {
        let network = BikeLaneNetwork::from_segments(vec![
            lane(FacilityClass::ClassII, vec![(-122.45, 37.77), (-122.40, 37.77)]),
            lane(FacilityClass::ClassIII, vec![(-122.45, 37.78), (-122.40, 37.78)]),
        ]);
        // The Class III feature is gone: a point on it is far from the
        // remaining network.
        let d = network.distance_degrees(Point::new(-122.42, 37.78));
        assert!(d > 0.009);
    }

    #[tokio::test]
    async fn route_along_a_lane_scores_full_coverage() {
        let service = service_with(vec![lane(
            FacilityClass::ClassII,
            vec![(-122.450, 37.770), (-122.400, 37.770)],
        )]);
        // ~11 m north of the lane, well inside the 25 m slack.
        let route = [
            [-122.440, 37.7701],
            [-122.430, 37.7701],
            [-122.420, 37.7701],
        ];
        let (percentage, stats) = service.coverage(&route).await;
        assert_eq!(percentage, 100.0);
        assert_eq!(stats.segments_on_network, 2);
        assert!(stats.road_distance_meters < 1e-9);
        assert!(!stats.engine_fallback);
    }

    #[tokio::test]
    async fn route_off_network_scores_zero() {
        let service = service_with(vec![lane(
            FacilityClass::ClassII,
            vec![(-122.450, 37.770), (-122.400, 37.770)],
        )]);
        let route = [[-122.440, 37.70], [-122.420, 37.70]];
        let (percentage, stats) = service.coverage(&route).await;
        assert_eq!(percentage, 0.0);
        assert_eq!(stats.segments_on_network, 0);
    }

    #[tokio::test]
    async fn zero_length_route_is_zero_coverage() {
        let service = service_with(vec![lane(
            FacilityClass::ClassII,
            vec![(-122.450, 37.770), (-122.400, 37.770)],
        )]);
        let p = [-122.430, 37.770];
        let (percentage, _) = service.coverage(&[p, p]).await;
        assert_eq!(percentage, 0.0);
        let (percentage, _) = service.coverage(&[p]).await;
        assert_eq!(percentage, 0.0);
    }

    #[tokio::test]
    async fn partial_coverage_is_proportional() {
        // Lane only under the western half of the route.
        let service = service_with(vec![lane(
            FacilityClass::ClassIV,
            vec![(-122.450, 37.770), (-122.430, 37.770)],
        )]);
        let route = [
            [-122.450, 37.7701],
            [-122.430, 37.7701],
            [-122.410, 37.7701],
        ];
        let (percentage, stats) = service.coverage(&route).await;
        assert!(percentage > 40.0 && percentage < 60.0, "got {percentage}");
        assert_eq!(stats.segments_checked, 2);
        assert_eq!(stats.segments_on_network, 1);
    }

    #[tokio::test]
    async fn unavailable_source_degrades_to_empty_network() {
        let service = BikeLaneService::new(Arc::new(FailingStore), &Settings::default());
        let route = [[-122.440, 37.77], [-122.420, 37.77]];
        let (percentage, stats) = service.coverage(&route).await;
        assert_eq!(percentage, 0.0);
        assert_eq!(stats.segments_checked, 0);
    }

    #[test]
    fn parses_feature_collection_and_drops_unknown_classes() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"facility_t": "CLASS II"},
                    "geometry": {
                        "type": "LineString",
                        "coordinates": [[-122.45, 37.77], [-122.40, 37.77]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": {"facility_t": "CLASS IV"},
                    "geometry": {
                        "type": "MultiLineString",
                        "coordinates": [
                            [[-122.45, 37.78], [-122.44, 37.78]],
                            [[-122.43, 37.78], [-122.42, 37.78]]
                        ]
                    }
                },
                {
                    "type": "Feature",
                    "properties": {"facility_t": "SHARED ROADWAY"},
                    "geometry": {
                        "type": "LineString",
                        "coordinates": [[-122.45, 37.79], [-122.40, 37.79]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": {},
                    "geometry": {
                        "type": "LineString",
                        "coordinates": [[-122.45, 37.80], [-122.40, 37.80]]
                    }
                }
            ]
        })
        .to_string();

        let segments = parse_feature_collection(&body).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].facility_class, FacilityClass::ClassII);
        assert_eq!(segments[1].facility_class, FacilityClass::ClassIV);
    }
}
