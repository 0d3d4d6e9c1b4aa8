//! OSRM routing engine client
//!
//! Speaks the table and route services of the OSRM HTTP API:
//! https://project-osrm.org/docs/v5.24.0/api/

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::Coordinates;

/// OSRM client configuration
#[derive(Debug, Clone)]
pub struct OsrmConfig {
    /// Base URL of the OSRM server (e.g., "http://localhost:5000")
    pub base_url: String,
    /// Routing profile name, part of every request path
    pub profile: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "driving".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl OsrmConfig {
    pub fn new(base_url: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            profile: profile.into(),
            ..Default::default()
        }
    }
}

/// A fetched sub-matrix; `None` cells are pairs OSRM could not route.
#[derive(Debug, Clone)]
pub struct TableResult {
    pub distances: Vec<Vec<Option<u64>>>,
    pub durations: Vec<Vec<Option<u64>>>,
}

/// OSRM routing client
pub struct OsrmClient {
    client: Client,
    config: OsrmConfig,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Full N×N table for one coordinate list.
    pub async fn full_table(&self, locations: &[Coordinates]) -> Result<TableResult> {
        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration,distance",
            self.config.base_url,
            self.config.profile,
            coordinate_path(locations),
        );

        debug!("Requesting {}x{} table from OSRM", locations.len(), locations.len());
        self.fetch_table(&url, locations.len(), locations.len()).await
    }

    /// Rectangular sub-table with explicit sources and destinations.
    pub async fn sub_table(
        &self,
        sources: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<TableResult> {
        let mut all: Vec<Coordinates> = Vec::with_capacity(sources.len() + destinations.len());
        all.extend_from_slice(sources);
        all.extend_from_slice(destinations);

        let source_indices = index_list(0, sources.len());
        let destination_indices = index_list(sources.len(), destinations.len());

        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration,distance&sources={}&destinations={}",
            self.config.base_url,
            self.config.profile,
            coordinate_path(&all),
            source_indices,
            destination_indices,
        );

        debug!(
            "Requesting {}x{} sub-table from OSRM",
            sources.len(),
            destinations.len()
        );
        self.fetch_table(&url, sources.len(), destinations.len()).await
    }

    /// Driving distance and duration for a single pair, via the route service.
    pub async fn route_pair(&self, from: &Coordinates, to: &Coordinates) -> Result<(u64, u64)> {
        let url = format!(
            "{}/route/v1/{}/{}?overview=false",
            self.config.base_url,
            self.config.profile,
            coordinate_path(&[*from, *to]),
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send route request to OSRM")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("OSRM route returned HTTP {}", status);
        }

        let route_response: RouteResponse = response
            .json()
            .await
            .context("Failed to parse OSRM route response")?;

        if route_response.code != "Ok" {
            anyhow::bail!("OSRM route returned code {}", route_response.code);
        }

        let route = route_response
            .routes
            .first()
            .context("OSRM route response has no routes")?;

        Ok((route.distance.round() as u64, route.duration.round() as u64))
    }

    async fn fetch_table(&self, url: &str, rows: usize, cols: usize) -> Result<TableResult> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send table request to OSRM")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("OSRM table returned HTTP {}", status);
        }

        let table: TableResponse = response
            .json()
            .await
            .context("Failed to parse OSRM table response")?;

        if table.code != "Ok" {
            anyhow::bail!("OSRM table returned code {}", table.code);
        }

        let distances = table
            .distances
            .context("OSRM table response is missing distances")?;
        let durations = table
            .durations
            .context("OSRM table response is missing durations")?;

        if distances.len() != rows || durations.len() != rows {
            anyhow::bail!(
                "OSRM table has {} rows, expected {}",
                distances.len(),
                rows
            );
        }
        if distances.iter().any(|row| row.len() != cols)
            || durations.iter().any(|row| row.len() != cols)
        {
            anyhow::bail!("OSRM table has a row of unexpected width");
        }

        Ok(TableResult {
            distances: quantize(distances),
            durations: quantize(durations),
        })
    }
}

/// Coordinates as OSRM wants them: `lon,lat` pairs joined by semicolons.
fn coordinate_path(locations: &[Coordinates]) -> String {
    locations
        .iter()
        .map(|c| format!("{:.6},{:.6}", c.lng, c.lat))
        .collect::<Vec<_>>()
        .join(";")
}

fn index_list(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn quantize(cells: Vec<Vec<Option<f64>>>) -> Vec<Vec<Option<u64>>> {
    cells
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|cell| cell.map(|v| v.round() as u64))
                .collect()
        })
        .collect()
}

// OSRM API types

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: String,
    distances: Option<Vec<Vec<Option<f64>>>>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
}
