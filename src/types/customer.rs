//! Customer types

use serde::{Deserialize, Serialize};

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A delivery customer for one planning run.
///
/// Constructed by the ingestion adapter and immutable afterwards. Coordinates
/// stay `None` when the raw value could not be parsed; such customers are
/// diverted to overflow before the solver ever sees them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    /// Unique identifier within a run
    pub id: String,
    /// Display name
    pub name: String,
    /// Geocoded position, if the raw value parsed
    pub coordinates: Option<Coordinates>,
    /// Demand volume in stack units (non-negative)
    pub volume: f64,
    /// Raw coordinate string as received, kept for diagnostics
    pub raw_coordinates: String,
}

impl Customer {
    /// Build a customer from raw fields, parsing the coordinate string.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_coordinates: impl Into<String>,
        volume: f64,
    ) -> Self {
        let raw = raw_coordinates.into();
        Self {
            id: id.into(),
            name: name.into(),
            coordinates: parse_coordinates(&raw),
            volume,
            raw_coordinates: raw,
        }
    }

    /// Build a customer with already-known coordinates.
    pub fn with_coordinates(
        id: impl Into<String>,
        name: impl Into<String>,
        coordinates: Coordinates,
        volume: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            coordinates: Some(coordinates),
            volume,
            raw_coordinates: format!("{}, {}", coordinates.lat, coordinates.lng),
        }
    }
}

/// Parse a "lat, lng" string into coordinates.
///
/// Accepts comma or semicolon separators and surrounding whitespace. Returns
/// `None` for anything else; the raw string is kept on the customer either way.
pub fn parse_coordinates(raw: &str) -> Option<Coordinates> {
    let mut parts = raw.split(|c| c == ',' || c == ';');
    let lat = parts.next()?.trim().parse::<f64>().ok()?;
    let lng = parts.next()?.trim().parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Coordinates { lat, lng })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_coordinates_valid() {
        let coords = parse_coordinates("42.6977, 23.3219").unwrap();
        assert!((coords.lat - 42.6977).abs() < 1e-9);
        assert!((coords.lng - 23.3219).abs() < 1e-9);
    }

    #[test]
    fn test_parse_coordinates_semicolon() {
        let coords = parse_coordinates("42.70;23.32").unwrap();
        assert!((coords.lat - 42.70).abs() < 1e-9);
    }

    #[test]
    fn test_parse_coordinates_garbage() {
        assert!(parse_coordinates("n/a").is_none());
        assert!(parse_coordinates("").is_none());
        assert!(parse_coordinates("42.7").is_none());
        assert!(parse_coordinates("42.7, 23.3, 5.0").is_none());
    }

    #[test]
    fn test_customer_keeps_raw_string() {
        let customer = Customer::new("c1", "Store One", "bad coords", 12.0);
        assert!(customer.coordinates.is_none());
        assert_eq!(customer.raw_coordinates, "bad coords");
    }

    #[test]
    fn test_customer_parses_coordinates() {
        let customer = Customer::new("c2", "Store Two", "42.70, 23.32", 4.5);
        let coords = customer.coordinates.unwrap();
        assert!((coords.lat - 42.70).abs() < 1e-9);
        assert!((coords.lng - 23.32).abs() < 1e-9);
    }
}
