//! Customer ingestion
//!
//! Thin CSV adapter over the planner's input: one row per customer with
//! `id,name,coordinates,volume` columns. Coordinates stay raw; unparseable
//! ones travel through and end up in overflow with a reason.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::error::PlanError;
use crate::types::Customer;

#[derive(Debug, Deserialize)]
struct CustomerRow {
    id: String,
    name: String,
    coordinates: String,
    volume: String,
}

/// Read customers from a CSV file.
///
/// Non-numeric or negative volumes and duplicate IDs abort the run; those are
/// data errors, not routing outcomes.
pub fn read_customers(path: impl AsRef<Path>) -> Result<Vec<Customer>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open customer file {}", path.display()))?;

    let mut customers = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (line, record) in reader.deserialize::<CustomerRow>().enumerate() {
        let row = record.with_context(|| format!("Malformed customer row {}", line + 2))?;

        let volume: f64 = row.volume.trim().parse().map_err(|_| {
            PlanError::InvalidInput(format!(
                "customer '{}' has non-numeric volume '{}'",
                row.id, row.volume
            ))
        })?;
        if volume < 0.0 {
            return Err(PlanError::InvalidInput(format!(
                "customer '{}' has negative volume {}",
                row.id, volume
            ))
            .into());
        }
        if !seen_ids.insert(row.id.clone()) {
            return Err(
                PlanError::InvalidInput(format!("duplicate customer id '{}'", row.id)).into(),
            );
        }

        customers.push(Customer::new(row.id, row.name, row.coordinates, volume));
    }

    info!("Read {} customers from {}", customers.len(), path.display());
    Ok(customers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_valid_rows() {
        let file = write_csv(
            "id,name,coordinates,volume\n\
             c1,Store One,\"42.70, 23.32\",12.5\n\
             c2,Store Two,bad address,3\n",
        );

        let customers = read_customers(file.path()).unwrap();
        assert_eq!(customers.len(), 2);
        assert!(customers[0].coordinates.is_some());
        assert!((customers[0].volume - 12.5).abs() < 1e-9);
        // Unparseable coordinates survive as raw diagnostics
        assert!(customers[1].coordinates.is_none());
        assert_eq!(customers[1].raw_coordinates, "bad address");
    }

    #[test]
    fn test_non_numeric_volume_rejected() {
        let file = write_csv("id,name,coordinates,volume\nc1,Store,\"42.7, 23.3\",lots\n");

        let err = read_customers(file.path()).unwrap_err();
        assert!(err.to_string().contains("non-numeric volume"));
    }

    #[test]
    fn test_negative_volume_rejected() {
        let file = write_csv("id,name,coordinates,volume\nc1,Store,\"42.7, 23.3\",-4\n");

        let err = read_customers(file.path()).unwrap_err();
        assert!(err.to_string().contains("negative volume"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let file = write_csv(
            "id,name,coordinates,volume\n\
             c1,Store,\"42.7, 23.3\",4\n\
             c1,Other,\"42.8, 23.4\",5\n",
        );

        let err = read_customers(file.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate customer id"));
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(read_customers("definitely/not/here.csv").is_err());
    }
}
