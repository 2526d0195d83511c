//! # Core Allocation Engine
//!
//! This module forms the heart of the dispatcher. It aggregates the
//! components that decide which source fulfills which request, and in
//! what order.
//!
//! ## Core Components:
//!
//! - **`distance_index`**: the immutable, nearest-first candidate lists
//!   for every known target, built once per run.
//!
//! - **`exhaustion`**: a concurrent, grow-only record of sources known to be
//!   depleted per service kind. Once a source lands here it is never checked
//!   again for that kind during the run.
//!
//! - **`limiter`**: the shared permit pool bounding concurrent outbound
//!   coordinator operations.
//!
//! - **`allocator`**: the dispatch loop and the per-request fulfillment
//!   scan with its double-check-before-commit protocol.
//!
//! - **`lifecycle`**: reset, index build, allocation, drain and the
//!   exactly-once stop, ending in the final run summary.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The dispatch loop and fulfillment scan.
pub mod allocator;
/// Nearest-first candidate lists per target.
pub mod distance_index;
/// Per-kind record of depleted sources.
pub mod exhaustion;
/// End-to-end run orchestration.
pub mod lifecycle;
/// Bounded permit pool for outbound operations.
pub mod limiter;

// --- Public API Re-exports ---
pub use allocator::{Allocator, AllocatorOptions, EndReason, FulfillmentOutcome, LoopExit, RunState, StatsSnapshot};
pub use distance_index::{CandidateSource, DistanceIndex, IndexError};
pub use exhaustion::ExhaustionTracker;
pub use lifecycle::{execute_run, RunError, RunExit, RunOptions, RunSummary, StopGuard};
pub use limiter::{RequestLimiter, RequestPermit};
