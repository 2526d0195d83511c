//! # Allocator
//!
//! The dispatch loop. It pulls calls from the coordinator one at a time,
//! fans each call's resource requests out into concurrent fulfillment
//! scans, and walks every request's candidate sources nearest-first.
//!
//! ## Fulfillment scan
//!
//! For each candidate, in distance order and strictly sequentially:
//!
//! 1. Skip it if it is already known to be exhausted for the kind.
//! 2. Check live availability. A failed check skips the candidate.
//! 3. A reading of zero marks the source exhausted.
//! 4. Check again right before committing. The second reading narrows the
//!    window in which another consumer of the same pool can drain the
//!    source between check and commit. Zero marks it exhausted.
//! 5. Commit `min(remaining, second reading)`. A commit that takes the
//!    whole reading marks the source exhausted. The scan then moves on to
//!    the next candidate either way.
//! 6. A failed commit ends the scan for that request (fail-fast); other
//!    requests are unaffected.
//!
//! Every outbound call holds a permit from the shared [`RequestLimiter`].
//! Cancellation is checked before each step; a cancelled scan stops where
//! it is and never issues a final commit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::distance_index::{CandidateSource, DistanceIndex, IndexError};
use crate::core::exhaustion::ExhaustionTracker;
use crate::core::limiter::RequestLimiter;
use crate::gateway::{GatewayError, NextCall, ResourceGateway};
use crate::models::{Call, DispatchCommand, ServiceKind, ServiceRequest};

/// Lifecycle of one run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    /// Fetching and dispatching calls.
    Running,
    /// The fetch loop has ended; the run is being stopped.
    Draining,
    /// The coordinator run has been stopped. Terminal.
    Stopped,
}

/// Why a fulfillment scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The full quantity was committed.
    Satisfied,
    /// Every candidate was visited and some quantity is still missing.
    CandidatesExhausted,
    /// A commit failed and the rest of the request was abandoned.
    CommitFailed,
    /// The run was cancelled mid-scan.
    Cancelled,
    /// The request asked for a zero or negative quantity and was rejected.
    InvalidQuantity,
}

/// Result of one request's fulfillment scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentOutcome {
    /// Requested kind.
    pub kind: ServiceKind,
    /// Quantity originally requested.
    pub requested: i64,
    /// Quantity left unfulfilled.
    pub remaining: i64,
    /// Commits that succeeded, in the order they were issued.
    pub commands: Vec<DispatchCommand>,
    /// Why the scan stopped.
    pub end: EndReason,
}

impl FulfillmentOutcome {
    /// Total quantity committed for the request.
    pub fn dispatched(&self) -> i64 {
        self.commands.iter().map(|c| c.quantity).sum()
    }
}

/// Why the fetch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The coordinator reported an empty queue.
    QueueEmpty,
    /// The cancellation token fired.
    Cancelled,
    /// Fetching the next call failed too many times in a row, or failed in
    /// a way that fetching again cannot fix.
    FetchFailures {
        /// Consecutive failures observed.
        consecutive: u32,
    },
}

/// Tuning knobs for the allocator.
#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// Permit count shared by all outbound availability checks and commits.
    pub max_concurrent_requests: usize,
    /// Consecutive `next_call` failures tolerated before the loop gives up.
    pub max_fetch_failures: u32,
    /// Pause after a failed `next_call` before fetching again.
    pub fetch_retry_delay: Duration,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            max_fetch_failures: 5,
            fetch_retry_delay: Duration::from_millis(100),
        }
    }
}

/// Lock-free run counters.
#[derive(Debug, Default)]
pub struct AllocatorStats {
    calls_fetched: AtomicU64,
    calls_skipped: AtomicU64,
    requests_satisfied: AtomicU64,
    requests_unfulfilled: AtomicU64,
    requests_invalid: AtomicU64,
    units_requested: AtomicU64,
    units_dispatched: AtomicU64,
    units_missed: AtomicU64,
    availability_checks: AtomicU64,
    check_failures: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    fetch_failures: AtomicU64,
}

/// Point-in-time copy of [`AllocatorStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls returned by the coordinator.
    pub calls_fetched: u64,
    /// Calls skipped as no-ops or unknown targets.
    pub calls_skipped: u64,
    /// Requests fully satisfied.
    pub requests_satisfied: u64,
    /// Requests that ended with quantity missing.
    pub requests_unfulfilled: u64,
    /// Requests rejected for a non-positive quantity.
    pub requests_invalid: u64,
    /// Units asked for by valid requests.
    pub units_requested: u64,
    /// Units committed.
    pub units_dispatched: u64,
    /// Units left unfulfilled.
    pub units_missed: u64,
    /// Availability checks issued.
    pub availability_checks: u64,
    /// Availability checks that failed.
    pub check_failures: u64,
    /// Commits that succeeded.
    pub commits: u64,
    /// Commits that failed.
    pub commit_failures: u64,
    /// `next_call` failures.
    pub fetch_failures: u64,
}

impl AllocatorStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            calls_fetched: load(&self.calls_fetched),
            calls_skipped: load(&self.calls_skipped),
            requests_satisfied: load(&self.requests_satisfied),
            requests_unfulfilled: load(&self.requests_unfulfilled),
            requests_invalid: load(&self.requests_invalid),
            units_requested: load(&self.units_requested),
            units_dispatched: load(&self.units_dispatched),
            units_missed: load(&self.units_missed),
            availability_checks: load(&self.availability_checks),
            check_failures: load(&self.check_failures),
            commits: load(&self.commits),
            commit_failures: load(&self.commit_failures),
            fetch_failures: load(&self.fetch_failures),
        }
    }
}

/// The dispatch engine for one run.
pub struct Allocator {
    gateway: Arc<dyn ResourceGateway>,
    index: Arc<DistanceIndex>,
    exhaustion: ExhaustionTracker,
    limiter: RequestLimiter,
    cancel: CancellationToken,
    options: AllocatorOptions,
    stats: AllocatorStats,
    state: RwLock<RunState>,
}

impl Allocator {
    /// Creates an allocator with an empty exhaustion tracker.
    pub fn new(
        gateway: Arc<dyn ResourceGateway>,
        index: Arc<DistanceIndex>,
        options: AllocatorOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            index,
            exhaustion: ExhaustionTracker::new(),
            limiter: RequestLimiter::new(options.max_concurrent_requests),
            cancel,
            options,
            stats: AllocatorStats::default(),
            state: RwLock::new(RunState::Running),
        }
    }

    /// Runs the fetch loop until the queue is empty, the run is cancelled,
    /// or fetching keeps failing. A non-retryable fetch error ends the loop
    /// at once. Leaves the allocator in [`RunState::Draining`].
    pub async fn run(&self) -> LoopExit {
        log::info!("Starting dispatch loop with {} outbound permits", self.limiter.max_permits());

        let mut consecutive_failures = 0u32;
        let exit = loop {
            if self.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break LoopExit::Cancelled,
                fetched = self.gateway.next_call() => fetched,
            };

            match fetched {
                Ok(NextCall::Call(call)) => {
                    consecutive_failures = 0;
                    AllocatorStats::bump(&self.stats.calls_fetched, 1);
                    self.process_call(&call).await;
                }
                Ok(NextCall::Empty) => {
                    log::info!("No more calls in queue");
                    break LoopExit::QueueEmpty;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    AllocatorStats::bump(&self.stats.fetch_failures, 1);
                    log::error!(
                        "Error getting next call ({}/{}): {}",
                        consecutive_failures,
                        self.options.max_fetch_failures,
                        e
                    );
                    if !e.is_retryable() || consecutive_failures >= self.options.max_fetch_failures {
                        break LoopExit::FetchFailures { consecutive: consecutive_failures };
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => break LoopExit::Cancelled,
                        _ = tokio::time::sleep(self.options.fetch_retry_delay) => {}
                    }
                }
            }
        };

        self.advance(RunState::Draining).await;
        log::info!("Dispatch loop ended: {:?}", exit);
        exit
    }

    /// Processes every request of one call concurrently.
    ///
    /// Returns one outcome per request, in request order. Calls without
    /// requests and calls whose target is unknown to the index yield no
    /// outcomes.
    pub async fn process_call(&self, call: &Call) -> Vec<FulfillmentOutcome> {
        let requests = call.requests();
        if requests.is_empty() {
            AllocatorStats::bump(&self.stats.calls_skipped, 1);
            return Vec::new();
        }

        log::info!("Processing call for {}, {} with {} requests", call.city, call.county, requests.len());

        let candidates = match self.index.lookup(&call.target_key()) {
            Ok(candidates) => candidates,
            Err(IndexError::NotFound { key }) => {
                log::warn!("No locations found for {}; skipping call", key);
                AllocatorStats::bump(&self.stats.calls_skipped, 1);
                return Vec::new();
            }
            Err(e) => {
                log::error!("Distance index lookup failed for {}, {}: {}", call.city, call.county, e);
                AllocatorStats::bump(&self.stats.calls_skipped, 1);
                return Vec::new();
            }
        };

        join_all(requests.iter().map(|request| self.fulfill(request, call, &candidates))).await
    }

    /// Runs the nearest-first fulfillment scan for one request.
    pub async fn fulfill(
        &self,
        request: &ServiceRequest,
        call: &Call,
        candidates: &[CandidateSource],
    ) -> FulfillmentOutcome {
        let kind = request.kind;
        if request.quantity <= 0 {
            log::warn!(
                "Rejecting {} request for {}, {} with quantity {}",
                kind,
                call.city,
                call.county,
                request.quantity
            );
            AllocatorStats::bump(&self.stats.requests_invalid, 1);
            return FulfillmentOutcome {
                kind,
                requested: request.quantity,
                remaining: request.quantity,
                commands: Vec::new(),
                end: EndReason::InvalidQuantity,
            };
        }

        log::info!(
            "Processing {} request for {}, {} - Quantity: {}",
            kind,
            call.city,
            call.county,
            request.quantity
        );
        AllocatorStats::bump(&self.stats.units_requested, request.quantity as u64);

        let mut remaining = request.quantity;
        let mut commands = Vec::new();
        let mut stopped_by = None;

        for candidate in candidates {
            if remaining <= 0 {
                break;
            }
            if self.cancel.is_cancelled() {
                stopped_by = Some(EndReason::Cancelled);
                break;
            }

            let key = candidate.key();
            if self.exhaustion.is_exhausted(kind, &key) {
                continue;
            }

            let first = match self.check(kind, candidate).await {
                Some(Ok(count)) => count,
                Some(Err(e)) => {
                    log::warn!("Availability check failed at {}, {}: {}", candidate.city, candidate.county, e);
                    continue;
                }
                None => {
                    stopped_by = Some(EndReason::Cancelled);
                    break;
                }
            };
            if first <= 0 {
                self.exhaustion.mark_exhausted(kind, &key);
                continue;
            }

            let confirmed = match self.check(kind, candidate).await {
                Some(Ok(count)) => count,
                Some(Err(e)) => {
                    log::warn!("Confirmation check failed at {}, {}: {}", candidate.city, candidate.county, e);
                    continue;
                }
                None => {
                    stopped_by = Some(EndReason::Cancelled);
                    break;
                }
            };
            if confirmed <= 0 {
                self.exhaustion.mark_exhausted(kind, &key);
                continue;
            }

            let command = DispatchCommand {
                source_county: candidate.county.clone(),
                source_city: candidate.city.clone(),
                target_county: call.county.clone(),
                target_city: call.city.clone(),
                quantity: remaining.min(confirmed),
                kind,
            };

            match self.commit(&command).await {
                Some(Ok(())) => {
                    log::info!("Dispatched {}", command);
                    remaining -= command.quantity;
                    if confirmed <= command.quantity {
                        self.exhaustion.mark_exhausted(kind, &key);
                    }
                    commands.push(command);
                }
                Some(Err(e)) => {
                    log::error!("Dispatch of {} failed, abandoning request: {}", command, e);
                    stopped_by = Some(EndReason::CommitFailed);
                    break;
                }
                None => {
                    stopped_by = Some(EndReason::Cancelled);
                    break;
                }
            }
        }

        let end = match stopped_by {
            _ if remaining <= 0 => EndReason::Satisfied,
            Some(reason) => reason,
            None => EndReason::CandidatesExhausted,
        };

        if remaining > 0 {
            log::warn!(
                "Could not fulfill entire {} request for {}, {}. Remaining: {} ({:?})",
                kind,
                call.city,
                call.county,
                remaining,
                end
            );
            AllocatorStats::bump(&self.stats.requests_unfulfilled, 1);
            AllocatorStats::bump(&self.stats.units_missed, remaining as u64);
        } else {
            AllocatorStats::bump(&self.stats.requests_satisfied, 1);
        }

        FulfillmentOutcome { kind, requested: request.quantity, remaining, commands, end }
    }

    /// One permit-guarded availability check. `None` means cancelled while waiting.
    async fn check(&self, kind: ServiceKind, candidate: &CandidateSource) -> Option<Result<i64, GatewayError>> {
        let _permit = self.limiter.acquire(&self.cancel).await?;
        AllocatorStats::bump(&self.stats.availability_checks, 1);

        let result = self.gateway.check_availability(kind, &candidate.county, &candidate.city).await;
        if result.is_err() {
            AllocatorStats::bump(&self.stats.check_failures, 1);
        }
        Some(result)
    }

    /// One permit-guarded commit. `None` means cancelled while waiting.
    async fn commit(&self, command: &DispatchCommand) -> Option<Result<(), GatewayError>> {
        let _permit = self.limiter.acquire(&self.cancel).await?;

        let result = self.gateway.commit_dispatch(command).await;
        match &result {
            Ok(()) => {
                AllocatorStats::bump(&self.stats.commits, 1);
                AllocatorStats::bump(&self.stats.units_dispatched, command.quantity as u64);
            }
            Err(_) => AllocatorStats::bump(&self.stats.commit_failures, 1),
        }
        Some(result)
    }

    async fn advance(&self, next: RunState) {
        let mut state = self.state.write().await;
        if next > *state {
            log::debug!("Run state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Marks the run as stopped once the coordinator has been told.
    pub async fn finish(&self) {
        self.advance(RunState::Stopped).await;
    }

    /// Current run state.
    pub async fn state(&self) -> RunState {
        *self.state.read().await
    }

    /// The run's exhaustion tracker.
    pub fn exhaustion(&self) -> &ExhaustionTracker {
        &self.exhaustion
    }

    /// The shared outbound permit pool.
    pub fn limiter(&self) -> &RequestLimiter {
        &self.limiter
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
