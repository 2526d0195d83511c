//! # Dispatch Data Models
//!
//! Wire and domain types shared by the gateway and the allocation engine.
//! Every type here mirrors a JSON shape exchanged with the remote
//! coordinator, so field names follow the coordinator's casing through
//! `serde` attributes rather than Rust naming.
//!
//! ## Contained Modules:
//!
//! - **`location`**: catalog entries, availability snapshots and the
//!   `"{city}::{county}"` composite key used throughout the engine.
//! - **`call`**: incoming calls, their resource requests and the fixed set
//!   of service kinds.
//! - **`dispatch`**: the outbound fulfillment command.
//! - **`status`**: run lifecycle status reported by the coordinator.
//! - **`auth`**: login and token-refresh payloads.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Login request and token pair payloads.
pub mod auth;
/// Calls, resource requests and service kinds.
pub mod call;
/// The dispatch command sent to commit a fulfillment.
pub mod dispatch;
/// Location catalog entries, availability snapshots and location keys.
pub mod location;
/// Remote run status and scoring counters.
pub mod status;

pub use auth::{LoginRequest, TokenPair};
pub use call::{Call, ServiceKind, ServiceRequest};
pub use dispatch::DispatchCommand;
pub use location::{location_key, Availability, City};
pub use status::{RunErrors, RunStatus};
