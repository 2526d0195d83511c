use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::location::location_key;

/// The fixed set of resource kinds the coordinator knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    /// Ambulances.
    Medical,
    /// Fire engines.
    Fire,
    /// Police units.
    Police,
    /// Rescue teams.
    Rescue,
    /// Utility crews.
    Utility,
}

impl ServiceKind {
    /// Every kind, in the coordinator's declaration order.
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::Medical,
        ServiceKind::Fire,
        ServiceKind::Police,
        ServiceKind::Rescue,
        ServiceKind::Utility,
    ];

    /// The path segment / wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Medical => "Medical",
            ServiceKind::Fire => "Fire",
            ServiceKind::Police => "Police",
            ServiceKind::Rescue => "Rescue",
            ServiceKind::Utility => "Utility",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    // Case-insensitive so config files and CLI flags can say "medical".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown service kind '{}'", s))
    }
}

/// A quantity of one service kind requested by a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Requested kind.
    #[serde(rename = "Type", alias = "type")]
    pub kind: ServiceKind,
    /// Requested units. Only strictly positive values are processed.
    #[serde(rename = "Quantity", alias = "quantity")]
    pub quantity: i64,
}

impl ServiceRequest {
    /// Convenience constructor, mostly for tests and tooling.
    pub fn new(kind: ServiceKind, quantity: i64) -> Self {
        Self { kind, quantity }
    }
}

/// An incoming call: one target location and the resources it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// County of the target.
    pub county: String,
    /// City of the target.
    pub city: String,
    /// Target latitude in degrees.
    #[serde(default)]
    pub latitude: f64,
    /// Target longitude in degrees.
    #[serde(default)]
    pub longitude: f64,
    /// Requested resources. `None` and an empty list both make the call a no-op.
    #[serde(default)]
    pub requests: Option<Vec<ServiceRequest>>,
}

impl Call {
    /// Composite key of the call's target, used for distance index lookups.
    pub fn target_key(&self) -> String {
        location_key(&self.city, &self.county)
    }

    /// The requests to process, empty when the field was absent or null.
    pub fn requests(&self) -> &[ServiceRequest] {
        self.requests.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_kind_parses_case_insensitively() {
        assert_eq!("medical".parse::<ServiceKind>(), Ok(ServiceKind::Medical));
        assert_eq!(" Utility ".parse::<ServiceKind>(), Ok(ServiceKind::Utility));
        assert!("Plumbing".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn call_accepts_both_request_casings() {
        let call: Call = serde_json::from_str(
            r#"{"county":"Lincoln","city":"Springfield","latitude":1.0,"longitude":2.0,
                "requests":[{"Type":"Fire","Quantity":2},{"type":"Police","quantity":1}]}"#,
        )
        .unwrap();

        assert_eq!(call.target_key(), "Springfield::Lincoln");
        assert_eq!(
            call.requests(),
            &[
                ServiceRequest::new(ServiceKind::Fire, 2),
                ServiceRequest::new(ServiceKind::Police, 1)
            ]
        );
    }

    #[test]
    fn null_requests_read_as_empty() {
        let call: Call =
            serde_json::from_str(r#"{"county":"Lincoln","city":"Springfield","requests":null}"#).unwrap();
        assert!(call.requests().is_empty());
    }
}
