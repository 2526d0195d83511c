use serde::{Deserialize, Serialize};

/// Builds the composite `"{city}::{county}"` key identifying a location.
///
/// The key is case-sensitive and never normalized; two locations are the
/// same only if both parts match byte for byte.
pub fn location_key(city: &str, county: &str) -> String {
    format!("{}::{}", city, county)
}

/// An entry of the coordinator's location catalog (a possible call target).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    /// City name.
    pub name: String,
    /// County the city belongs to.
    pub county: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    #[serde(rename = "long")]
    pub long: f64,
}

impl City {
    /// Returns this city's composite location key.
    pub fn key(&self) -> String {
        location_key(&self.name, &self.county)
    }
}

/// One source location with its currently available quantity of a service kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    /// County of the source.
    pub county: String,
    /// City of the source.
    pub city: String,
    /// Latitude in degrees, expected within `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, expected within `[-180, 180]`.
    pub longitude: f64,
    /// Units available at the source. Upstream must never report a negative value.
    pub quantity: i64,
}

impl Availability {
    /// Returns this source's composite location key.
    pub fn key(&self) -> String {
        location_key(&self.city, &self.county)
    }

    /// Checks the entry against the coordinator's data contract.
    ///
    /// Returns a description of the first violation found. Violations are
    /// treated as upstream corruption and are never coerced.
    pub fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!(
                "invalid coordinates ({}, {}) for {}, {}",
                self.latitude, self.longitude, self.city, self.county
            ));
        }
        if self.city.trim().is_empty() || self.county.trim().is_empty() {
            return Err(format!(
                "incomplete location data: city '{}', county '{}'",
                self.city, self.county
            ));
        }
        if self.quantity < 0 {
            return Err(format!(
                "negative quantity {} for {}, {}",
                self.quantity, self.city, self.county
            ));
        }
        Ok(())
    }
}
