// Declare the modules to re-export
pub mod core;
pub mod gateway;
pub mod models;
#[cfg(feature = "retrieve")]
pub mod retrieve; // HTTP gateway to the remote coordinator

// Re-export the engine surface
pub use crate::core::{execute_run, Allocator, DistanceIndex, ExhaustionTracker, RunOptions, RunSummary};
pub use gateway::{GatewayError, NextCall, ResourceGateway};
#[cfg(feature = "retrieve")]
pub use retrieve::{HttpGateway, HttpGatewayConfig};
