//! # Remote Resource Gateway
//!
//! The boundary between the allocation engine and the remote coordinator.
//! The engine only ever talks to a `dyn ResourceGateway`; transport, retry
//! and credential concerns live behind the trait in the implementation
//! (see `retrieve::gateway::HttpGateway`).
//!
//! Implementations must be `Send + Sync`: the allocator issues overlapping
//! availability checks and commits from many tasks at once.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Error taxonomy for gateway operations.
pub mod error;

pub use error::GatewayError;

use async_trait::async_trait;

use crate::models::{Availability, Call, City, DispatchCommand, RunStatus, ServiceKind};

/// Outcome of asking the coordinator for the next call.
///
/// An empty queue is a normal terminal signal, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum NextCall {
    /// A pending call to process.
    Call(Call),
    /// Nothing is queued.
    Empty,
}

/// Operations the allocation engine consumes from the remote coordinator.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// Obtains credentials for subsequent calls.
    ///
    /// Gateways that need no authentication keep the default no-op.
    async fn authenticate(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Drops any credentials held. Called once when a run ends.
    async fn clear_credentials(&self) {}

    /// Fetches the next pending call, or [`NextCall::Empty`] when nothing is queued.
    async fn next_call(&self) -> Result<NextCall, GatewayError>;

    /// Returns every call still queued.
    async fn call_queue(&self) -> Result<Vec<Call>, GatewayError>;

    /// Returns the current non-negative count of `kind` available at one location.
    async fn check_availability(&self, kind: ServiceKind, county: &str, city: &str) -> Result<i64, GatewayError>;

    /// Commits a dispatch. The command must carry a positive quantity and
    /// four non-empty location strings.
    async fn commit_dispatch(&self, command: &DispatchCommand) -> Result<(), GatewayError>;

    /// Returns the catalog of known target locations.
    async fn locations(&self) -> Result<Vec<City>, GatewayError>;

    /// Returns every known source of `kind` with its quantity, validated.
    async fn service_availability(&self, kind: ServiceKind) -> Result<Vec<Availability>, GatewayError>;

    /// Resets the remote run.
    async fn reset_run(&self, seed: &str, target_dispatches: u32, max_active_calls: u32) -> Result<RunStatus, GatewayError>;

    /// Stops the remote run and returns its final status.
    async fn stop_run(&self) -> Result<RunStatus, GatewayError>;

    /// Returns the current run status.
    async fn run_status(&self) -> Result<RunStatus, GatewayError>;
}
