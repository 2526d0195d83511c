use std::fmt;

use serde::{Deserialize, Serialize};

use super::call::ServiceKind;

/// A committed (or about to be committed) movement of units from a source to a target.
///
/// The kind travels in the request path, so it is skipped on the wire body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchCommand {
    /// County of the source location.
    pub source_county: String,
    /// City of the source location.
    pub source_city: String,
    /// County of the target location.
    pub target_county: String,
    /// City of the target location.
    pub target_city: String,
    /// Units to move. Always positive.
    pub quantity: i64,
    /// Kind of the units.
    #[serde(skip, default = "default_kind")]
    pub kind: ServiceKind,
}

fn default_kind() -> ServiceKind {
    ServiceKind::Medical
}

impl DispatchCommand {
    /// Checks the command before it is sent.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("sourceCounty", &self.source_county),
            ("sourceCity", &self.source_city),
            ("targetCounty", &self.target_county),
            ("targetCity", &self.target_city),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(format!("{} must not be empty", name));
        }
        if self.quantity <= 0 {
            return Err(format!("quantity must be greater than zero, got {}", self.quantity));
        }
        Ok(())
    }
}

impl fmt::Display for DispatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {}, {} to {}, {}",
            self.quantity, self.kind, self.source_city, self.source_county, self.target_city, self.target_county
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(quantity: i64) -> DispatchCommand {
        DispatchCommand {
            source_county: "Lincoln".into(),
            source_city: "Shelbyville".into(),
            target_county: "Lincoln".into(),
            target_city: "Springfield".into(),
            quantity,
            kind: ServiceKind::Rescue,
        }
    }

    #[test]
    fn body_omits_kind() {
        let body = serde_json::to_value(command(2)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "sourceCounty": "Lincoln",
                "sourceCity": "Shelbyville",
                "targetCounty": "Lincoln",
                "targetCity": "Springfield",
                "quantity": 2
            })
        );
    }

    #[test]
    fn validate_rejects_empty_fields_and_quantities() {
        assert!(command(1).validate().is_ok());
        assert!(command(0).validate().is_err());

        let mut blank = command(1);
        blank.target_city = String::new();
        assert_eq!(blank.validate(), Err("targetCity must not be empty".to_string()));
    }
}
