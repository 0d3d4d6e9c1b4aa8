//! Distance-matrix service
//!
//! Resolves pairwise driving distance and duration for a set of locations.
//! Three tiers per request: a local OSRM server, the public OSRM server, and
//! a great-circle estimate as the last resort. Demotion happens per
//! sub-matrix, so partial OSRM coverage is kept.

mod cache;
mod osrm;

pub use cache::{fingerprint, fingerprint_asymmetric, MatrixCache, MATRIX_SERVICE_VERSION};
pub use osrm::{OsrmClient, OsrmConfig, TableResult};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CacheSettings, MatrixSettings};
use crate::error::PlanError;
use crate::services::geo;
use crate::types::Coordinates;

/// Single full-table request covers this many locations at most.
const SINGLE_TABLE_MAX: usize = 30;

/// Above this, the table service is abandoned for pairwise route queries.
const TILED_MAX: usize = 500;

/// In-flight tile requests.
const TILE_CONCURRENCY: usize = 4;

/// In-flight pairwise route requests.
const PAIR_CONCURRENCY: usize = 8;

/// Distance and duration matrices between locations.
///
/// Locations keep the order they were requested in: depots first, customers
/// after. Immutable once built; the solver shares it across workers behind an
/// `Arc`.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    pub locations: Vec<Coordinates>,
    /// Meters, `[from][to]`
    pub distances: Vec<Vec<u64>>,
    /// Seconds, `[from][to]`
    pub durations: Vec<Vec<u64>>,
}

impl DistanceMatrix {
    pub fn empty() -> Self {
        Self {
            locations: vec![],
            distances: vec![],
            durations: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Distance from location i to location j in meters
    pub fn distance(&self, from: usize, to: usize) -> u64 {
        self.distances[from][to]
    }

    /// Duration from location i to location j in seconds
    pub fn duration(&self, from: usize, to: usize) -> u64 {
        self.durations[from][to]
    }
}

/// A network tier that can resolve sub-matrices and single pairs.
#[async_trait]
pub trait MatrixSource: Send + Sync {
    /// Rectangular sub-table; `full` marks the symmetric whole-list case.
    async fn table(
        &self,
        sources: &[Coordinates],
        destinations: &[Coordinates],
        full: bool,
    ) -> anyhow::Result<TableResult>;

    /// One pair through the route service.
    async fn pair(&self, from: &Coordinates, to: &Coordinates) -> anyhow::Result<(u64, u64)>;

    /// Tier name for logging
    fn name(&self) -> &str;
}

#[async_trait]
impl MatrixSource for OsrmClient {
    async fn table(
        &self,
        sources: &[Coordinates],
        destinations: &[Coordinates],
        full: bool,
    ) -> anyhow::Result<TableResult> {
        if full {
            self.full_table(sources).await
        } else {
            self.sub_table(sources, destinations).await
        }
    }

    async fn pair(&self, from: &Coordinates, to: &Coordinates) -> anyhow::Result<(u64, u64)> {
        self.route_pair(from, to).await
    }

    fn name(&self) -> &str {
        "osrm"
    }
}

/// Wrapper that lets one request through at a time; the public OSRM server
/// gets this treatment.
struct ThrottledSource {
    inner: OsrmClient,
    gate: tokio::sync::Semaphore,
}

impl ThrottledSource {
    fn new(inner: OsrmClient) -> Self {
        Self {
            inner,
            gate: tokio::sync::Semaphore::new(1),
        }
    }
}

#[async_trait]
impl MatrixSource for ThrottledSource {
    async fn table(
        &self,
        sources: &[Coordinates],
        destinations: &[Coordinates],
        full: bool,
    ) -> anyhow::Result<TableResult> {
        let _permit = self.gate.acquire().await?;
        self.inner.table(sources, destinations, full).await
    }

    async fn pair(&self, from: &Coordinates, to: &Coordinates) -> anyhow::Result<(u64, u64)> {
        let _permit = self.gate.acquire().await?;
        self.inner.pair(from, to).await
    }

    fn name(&self) -> &str {
        "osrm-public"
    }
}

/// Last-resort tier: great-circle distance with a road-inflation factor and a
/// flat assumed speed. Cannot fail, so it sits below the `MatrixSource` chain.
#[derive(Debug, Clone)]
pub struct HaversineEstimator {
    inflation: f64,
    speed_kmh: f64,
}

impl HaversineEstimator {
    pub fn new(inflation: f64, speed_kmh: f64) -> Self {
        Self { inflation, speed_kmh }
    }

    /// Estimated (meters, seconds) for one pair.
    pub fn pair(&self, from: &Coordinates, to: &Coordinates) -> (u64, u64) {
        let road_km = geo::haversine_km(from, to) * self.inflation;
        let meters = (road_km * 1000.0).round() as u64;
        let seconds = (road_km / self.speed_kmh * 3600.0).round() as u64;
        (meters, seconds)
    }

    fn table(&self, sources: &[Coordinates], destinations: &[Coordinates]) -> TableResult {
        let mut distances = Vec::with_capacity(sources.len());
        let mut durations = Vec::with_capacity(sources.len());
        for from in sources {
            let mut distance_row = Vec::with_capacity(destinations.len());
            let mut duration_row = Vec::with_capacity(destinations.len());
            for to in destinations {
                let (meters, seconds) = self.pair(from, to);
                distance_row.push(Some(meters));
                duration_row.push(Some(seconds));
            }
            distances.push(distance_row);
            durations.push(duration_row);
        }
        TableResult { distances, durations }
    }
}

/// Tiered distance-matrix service with persistent caching.
pub struct MatrixService {
    /// Network tiers in demotion order: primary first, throttled public after
    tiers: Vec<Box<dyn MatrixSource>>,
    estimator: HaversineEstimator,
    cache: Option<MatrixCache>,
    settings: MatrixSettings,
    cancel: CancellationToken,
}

impl MatrixService {
    pub fn from_config(matrix: &MatrixSettings, cache: &CacheSettings) -> Self {
        let make_client = |endpoint: &Option<String>| {
            endpoint.as_ref().and_then(|url| {
                let config = OsrmConfig {
                    base_url: url.clone(),
                    profile: matrix.profile.clone(),
                    timeout_seconds: matrix.timeout_seconds,
                };
                match OsrmClient::new(config) {
                    Ok(client) => Some(client),
                    Err(err) => {
                        warn!("Cannot build OSRM client for {}: {}", url, err);
                        None
                    }
                }
            })
        };

        let mut tiers: Vec<Box<dyn MatrixSource>> = Vec::new();
        if let Some(client) = make_client(&matrix.primary_endpoint) {
            tiers.push(Box::new(client));
        }
        if let Some(client) = make_client(&matrix.fallback_endpoint) {
            tiers.push(Box::new(ThrottledSource::new(client)));
        }

        Self {
            tiers,
            estimator: HaversineEstimator::new(matrix.haversine_inflation, matrix.haversine_speed_kmh),
            cache: MatrixCache::from_settings(cache),
            settings: matrix.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Estimator-only service; used by tests and offline runs.
    pub fn offline(matrix: &MatrixSettings) -> Self {
        Self {
            tiers: Vec::new(),
            estimator: HaversineEstimator::new(matrix.haversine_inflation, matrix.haversine_speed_kmh),
            cache: None,
            settings: matrix.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts pending network retries when cancelled; remaining
    /// cells fall through to the estimator.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Full pairwise matrix for the given locations.
    pub async fn matrix(&self, locations: &[Coordinates]) -> Result<DistanceMatrix, PlanError> {
        let n = locations.len();
        if n == 0 {
            return Ok(DistanceMatrix::empty());
        }

        let key = fingerprint(locations, &self.settings.profile);
        if let Some(cache) = &self.cache {
            if let Some(matrix) = cache.load(&key, locations) {
                debug!("Matrix cache hit for {} locations", n);
                return Ok(matrix);
            }
        }

        let matrix = if n <= SINGLE_TABLE_MAX {
            self.single_table(locations).await
        } else if n <= TILED_MAX {
            self.tiled_table(locations).await
        } else {
            self.pairwise(locations).await
        }?;

        if matrix.distances.len() != n || matrix.distances.iter().any(|row| row.len() != n) {
            return Err(PlanError::MatrixUnavailable(format!(
                "assembled matrix is not {}x{}",
                n, n
            )));
        }

        if let Some(cache) = &self.cache {
            cache.store(&key, &matrix, &self.settings.profile);
        }

        info!("Distance matrix ready for {} locations", n);
        Ok(matrix)
    }

    async fn single_table(&self, locations: &[Coordinates]) -> Result<DistanceMatrix, PlanError> {
        let table = self.fetch_tile(locations, locations, true).await;
        Ok(assemble(locations, vec![(0, 0, table)], locations.len()))
    }

    async fn tiled_table(&self, locations: &[Coordinates]) -> Result<DistanceMatrix, PlanError> {
        let chunk_size = self.settings.chunk_size.max(1);
        let chunks = chunk_ranges(locations.len(), chunk_size);

        let mut requests = Vec::new();
        for &(row_start, row_len) in &chunks {
            for &(col_start, col_len) in &chunks {
                requests.push((row_start, row_len, col_start, col_len));
            }
        }
        debug!(
            "Tiling {} locations into {} sub-requests",
            locations.len(),
            requests.len()
        );

        let tiles: Vec<(usize, usize, TableResult)> = stream::iter(requests)
            .map(|(row_start, row_len, col_start, col_len)| async move {
                let sources = &locations[row_start..row_start + row_len];
                let destinations = &locations[col_start..col_start + col_len];
                let table = self.fetch_tile(sources, destinations, false).await;
                (row_start, col_start, table)
            })
            .buffer_unordered(TILE_CONCURRENCY)
            .collect()
            .await;

        Ok(assemble(locations, tiles, locations.len()))
    }

    async fn pairwise(&self, locations: &[Coordinates]) -> Result<DistanceMatrix, PlanError> {
        let n = locations.len();
        debug!("Resolving {} locations via pairwise route queries", n);

        // Each unordered pair is fetched once and mirrored.
        let mut pairs = Vec::with_capacity(n * (n - 1) / 2);
        for i in 0..n {
            for j in i + 1..n {
                pairs.push((i, j));
            }
        }

        let resolved: Vec<(usize, usize, (u64, u64))> = stream::iter(pairs)
            .map(|(i, j)| async move {
                let leg = self.fetch_pair(&locations[i], &locations[j]).await;
                (i, j, leg)
            })
            .buffer_unordered(PAIR_CONCURRENCY)
            .collect()
            .await;

        let mut distances = vec![vec![0u64; n]; n];
        let mut durations = vec![vec![0u64; n]; n];
        for (i, j, (meters, seconds)) in resolved {
            distances[i][j] = meters;
            distances[j][i] = meters;
            durations[i][j] = seconds;
            durations[j][i] = seconds;
        }

        Ok(DistanceMatrix {
            locations: locations.to_vec(),
            distances,
            durations,
        })
    }

    /// One sub-matrix through the tier chain. Never fails: the estimator is
    /// the floor, and it also fills unroutable cells in OSRM output.
    async fn fetch_tile(
        &self,
        sources: &[Coordinates],
        destinations: &[Coordinates],
        full: bool,
    ) -> TableResult {
        for tier in &self.tiers {
            if self.cancel.is_cancelled() {
                break;
            }
            match tier.table(sources, destinations, full).await {
                Ok(table) => return self.fill_gaps(table, sources, destinations),
                Err(err) => warn!("Matrix tier {} failed ({}), demoting", tier.name(), err),
            }
        }

        self.estimator.table(sources, destinations)
    }

    async fn fetch_pair(&self, from: &Coordinates, to: &Coordinates) -> (u64, u64) {
        for tier in &self.tiers {
            if self.cancel.is_cancelled() {
                break;
            }
            match tier.pair(from, to).await {
                Ok(leg) => return leg,
                Err(err) => warn!("Route tier {} failed ({}), demoting", tier.name(), err),
            }
        }

        self.estimator.pair(from, to)
    }

    fn fill_gaps(
        &self,
        mut table: TableResult,
        sources: &[Coordinates],
        destinations: &[Coordinates],
    ) -> TableResult {
        for (i, from) in sources.iter().enumerate() {
            for (j, to) in destinations.iter().enumerate() {
                if table.distances[i][j].is_none() || table.durations[i][j].is_none() {
                    let (meters, seconds) = self.estimator.pair(from, to);
                    table.distances[i][j] = Some(meters);
                    table.durations[i][j] = Some(seconds);
                }
            }
        }
        table
    }
}

/// Split `0..n` into consecutive `(start, len)` ranges of at most `size`.
fn chunk_ranges(n: usize, size: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < n {
        let len = size.min(n - start);
        ranges.push((start, len));
        start += len;
    }
    ranges
}

/// Stitch fetched tiles into the final square matrix.
fn assemble(
    locations: &[Coordinates],
    tiles: Vec<(usize, usize, TableResult)>,
    n: usize,
) -> DistanceMatrix {
    let mut distances = vec![vec![0u64; n]; n];
    let mut durations = vec![vec![0u64; n]; n];

    for (row_start, col_start, table) in tiles {
        for (di, row) in table.distances.iter().enumerate() {
            for (dj, cell) in row.iter().enumerate() {
                distances[row_start + di][col_start + dj] = cell.unwrap_or(0);
            }
        }
        for (di, row) in table.durations.iter().enumerate() {
            for (dj, cell) in row.iter().enumerate() {
                durations[row_start + di][col_start + dj] = cell.unwrap_or(0);
            }
        }
    }

    for i in 0..n {
        distances[i][i] = 0;
        durations[i][i] = 0;
    }

    DistanceMatrix {
        locations: locations.to_vec(),
        distances,
        durations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sofia_area(n: usize) -> Vec<Coordinates> {
        (0..n)
            .map(|i| Coordinates::new(42.65 + 0.003 * i as f64, 23.30 + 0.002 * i as f64))
            .collect()
    }

    fn offline_service() -> MatrixService {
        MatrixService::offline(&MatrixSettings::default())
    }

    #[test]
    fn test_estimator_pair_math() {
        let estimator = HaversineEstimator::new(1.3, 40.0);
        let from = Coordinates::new(42.70, 23.32);
        let to = Coordinates::new(42.79, 23.32); // ~10 km north

        let (meters, seconds) = estimator.pair(&from, &to);

        // ~10 km straight line becomes ~13 km of road
        assert!(meters > 12_000 && meters < 14_000, "got {} m", meters);
        // 13 km at 40 km/h is ~1170 s
        assert!(seconds > 1_000 && seconds < 1_300, "got {} s", seconds);
    }

    #[test]
    fn test_chunk_ranges() {
        assert_eq!(chunk_ranges(5, 2), vec![(0, 2), (2, 2), (4, 1)]);
        assert_eq!(chunk_ranges(80, 80), vec![(0, 80)]);
        assert_eq!(chunk_ranges(0, 80), Vec::<(usize, usize)>::new());
    }

    #[tokio::test]
    async fn test_empty_locations() {
        let service = offline_service();
        let matrix = service.matrix(&[]).await.unwrap();
        assert!(matrix.is_empty());
    }

    #[tokio::test]
    async fn test_offline_small_matrix() {
        let service = offline_service();
        let locations = sofia_area(4);
        let matrix = service.matrix(&locations).await.unwrap();

        assert_eq!(matrix.len(), 4);
        for i in 0..4 {
            assert_eq!(matrix.distance(i, i), 0);
            assert_eq!(matrix.duration(i, i), 0);
            for j in 0..4 {
                if i != j {
                    assert!(matrix.distance(i, j) > 0);
                    assert!(matrix.duration(i, j) > 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_offline_tiled_matrix() {
        let mut settings = MatrixSettings::default();
        settings.chunk_size = 10;
        let service = MatrixService::offline(&settings);

        // 35 locations forces the tiled path
        let locations = sofia_area(35);
        let matrix = service.matrix(&locations).await.unwrap();

        assert_eq!(matrix.len(), 35);
        assert_eq!(matrix.distance(0, 0), 0);
        assert!(matrix.distance(0, 34) > 0);
        // The estimator is symmetric, so stitched tiles must agree
        assert_eq!(matrix.distance(3, 22), matrix.distance(22, 3));
    }

    #[tokio::test]
    async fn test_offline_pairwise_matrix() {
        let service = offline_service();

        // 501 locations cross the pairwise threshold
        let locations = sofia_area(501);
        let matrix = service.matrix(&locations).await.unwrap();

        assert_eq!(matrix.len(), 501);
        for i in [0usize, 250, 500] {
            assert_eq!(matrix.distance(i, i), 0);
        }
        // Pairs are fetched once and mirrored
        assert_eq!(matrix.distance(17, 401), matrix.distance(401, 17));
        assert!(matrix.distance(0, 500) > 0);
    }

    #[tokio::test]
    async fn test_tiers_fall_back_to_estimator() {
        // Both endpoints point at an unreachable port; every tile demotes
        let mut settings = MatrixSettings::default();
        settings.primary_endpoint = Some("http://127.0.0.1:1".to_string());
        settings.fallback_endpoint = Some("http://127.0.0.1:1".to_string());
        settings.timeout_seconds = 1;
        let cache = CacheSettings {
            enabled: false,
            ..Default::default()
        };
        let service = MatrixService::from_config(&settings, &cache);
        assert_eq!(service.tiers.len(), 2);

        let locations = sofia_area(3);
        let matrix = service.matrix(&locations).await.unwrap();

        assert_eq!(matrix.len(), 3);
        assert!(matrix.distance(0, 2) > 0);
    }

    #[tokio::test]
    async fn test_cache_round_trip_through_service() {
        let dir = tempfile::tempdir().unwrap();
        let matrix_settings = MatrixSettings {
            fallback_endpoint: None,
            ..Default::default()
        };
        let cache_settings = CacheSettings {
            directory: dir.path().to_string_lossy().to_string(),
            ttl_seconds: 3600,
            enabled: true,
        };
        let service = MatrixService::from_config(&matrix_settings, &cache_settings);

        let locations = sofia_area(3);
        let first = service.matrix(&locations).await.unwrap();
        let second = service.matrix(&locations).await.unwrap();

        assert_eq!(first.distances, second.distances);
        assert_eq!(first.durations, second.durations);
    }

    #[tokio::test]
    async fn test_cancelled_service_still_answers() {
        let service = offline_service();
        service.cancellation_token().cancel();

        let locations = sofia_area(3);
        let matrix = service.matrix(&locations).await.unwrap();
        assert_eq!(matrix.len(), 3);
    }
}
