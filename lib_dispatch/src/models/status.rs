use serde::{Deserialize, Serialize};

/// Penalty counters reported by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunErrors {
    /// Requested units that were never dispatched.
    pub missed: i64,
    /// Units dispatched beyond what a call needed.
    pub over_dispatched: i64,
}

/// Run status as returned by the reset, stop and status control endpoints.
///
/// Every field defaults, since the coordinator omits some of them
/// depending on the run phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunStatus {
    /// Coordinator-side run state, e.g. `"Running"` or `"Stopped"`.
    pub status: String,
    /// Elapsed time as formatted by the coordinator (`hh:mm:ss.fff`).
    pub running_time: String,
    /// Seed the run was reset with.
    pub seed: String,
    /// Calls generated so far.
    pub request_count: f64,
    /// Concurrent call limit the run was reset with.
    pub max_active_calls: i64,
    /// Dispatches accepted so far.
    pub total_dispatches: i64,
    /// Dispatch count that ends the run.
    pub target_dispatches: i64,
    /// Accumulated travel distance.
    pub distance: f64,
    /// Accumulated penalty score.
    pub penalty: f64,
    /// HTTP requests the coordinator has counted against this client.
    pub http_requests: i64,
    /// Coordinator build identifier.
    pub emulator_version: i64,
    /// Result signature, present once stopped.
    pub signature: String,
    /// Result checksum, present once stopped.
    pub checksum: String,
    /// Missed and over-dispatched counters.
    #[serde(rename = "errors")]
    pub errors: RunErrors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_status_fills_defaults() {
        let status: RunStatus = serde_json::from_str(
            r#"{"status":"Stopped","totalDispatches":48,"targetDispatches":50,
                "errors":{"missed":3,"overDispatched":1}}"#,
        )
        .unwrap();

        assert_eq!(status.status, "Stopped");
        assert_eq!(status.total_dispatches, 48);
        assert_eq!(status.errors.over_dispatched, 1);
        assert_eq!(status.penalty, 0.0);
        assert!(status.running_time.is_empty());
    }
}
