//! # Run Lifecycle
//!
//! Drives one run end to end: reset, authenticate, build the distance
//! index, run the allocator, then drain and stop. The coordinator's stop
//! endpoint is invoked exactly once no matter how the run ends (empty
//! queue, cancellation, fetch failures, or a failed setup step), and the
//! final summary is logged exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::allocator::{Allocator, AllocatorOptions, LoopExit, StatsSnapshot};
use crate::core::distance_index::{DistanceIndex, IndexError};
use crate::gateway::{GatewayError, ResourceGateway};
use crate::models::{RunStatus, ServiceKind};

/// Unrecoverable causes that end a run early.
#[derive(Debug, Error)]
pub enum RunError {
    /// Resetting the remote run failed.
    #[error("failed to reset run: {0}")]
    Reset(#[source] GatewayError),

    /// Obtaining credentials failed.
    #[error("failed to authenticate: {0}")]
    Login(#[source] GatewayError),

    /// The distance index could not be built.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Fetching calls kept failing.
    #[error("giving up after {consecutive} consecutive failures to fetch the next call")]
    FetchFailures {
        /// Consecutive failures observed.
        consecutive: u32,
    },
}

/// How a run ended.
#[derive(Debug)]
pub enum RunExit {
    /// The queue drained normally.
    QueueEmpty,
    /// The run was cancelled.
    Cancelled,
    /// The run ended on an unrecoverable error.
    Failed(RunError),
}

impl RunExit {
    /// Whether the run ended on an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunExit::Failed(_))
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Seed passed to the coordinator's reset.
    pub seed: String,
    /// Dispatch count that ends the remote run.
    pub target_dispatches: u32,
    /// Concurrent call limit on the coordinator side.
    pub max_active_calls: u32,
    /// Kind whose availability snapshot seeds the distance index.
    pub proxy_service: ServiceKind,
    /// Count the calls still queued when the run stops.
    pub report_queue_on_stop: bool,
    /// Allocator tuning.
    pub allocator: AllocatorOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            seed: "default".to_string(),
            target_dispatches: 50,
            max_active_calls: 10,
            proxy_service: ServiceKind::Medical,
            report_queue_on_stop: true,
            allocator: AllocatorOptions::default(),
        }
    }
}

/// Issues the remote stop at most once.
#[derive(Debug, Default)]
pub struct StopGuard {
    stopped: AtomicBool,
}

impl StopGuard {
    /// Creates a guard that has not stopped anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls `stop_run` on the first invocation. Later invocations return `None`
    /// without touching the gateway.
    pub async fn stop(&self, gateway: &dyn ResourceGateway) -> Option<Result<RunStatus, GatewayError>> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(gateway.stop_run().await)
    }
}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct RunSummary {
    /// How the run ended.
    pub exit: RunExit,
    /// Final coordinator status, if the stop call succeeded.
    pub remote: Option<RunStatus>,
    /// Local allocator counters.
    pub stats: StatsSnapshot,
    /// Source/kind pairs marked exhausted.
    pub exhausted_sources: usize,
    /// Peak number of concurrent outbound operations.
    pub peak_in_flight: usize,
    /// Calls still queued at stop, when that was checked.
    pub queued_at_stop: Option<usize>,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Logs the final results block.
    pub fn log(&self) {
        log::info!("======== FINAL RESULTS ========");
        log::info!("Exit: {}", self.describe_exit());
        match &self.remote {
            Some(status) => {
                log::info!("Status: {}", status.status);
                log::info!("Total dispatches: {}/{}", status.total_dispatches, status.target_dispatches);
                log::info!("Running time: {}", status.running_time);
                log::info!("Distance: {}", status.distance);
                log::info!("Penalty: {}", status.penalty);
                log::info!("HTTP Requests: {}", status.http_requests);
                log::info!("Errors - Missed: {}", status.errors.missed);
                log::info!("Errors - Over-dispatched: {}", status.errors.over_dispatched);
            }
            None => log::warn!("Remote status unavailable"),
        }
        let s = &self.stats;
        log::info!(
            "Calls: {} fetched, {} skipped | Requests: {} satisfied, {} unfulfilled, {} invalid",
            s.calls_fetched,
            s.calls_skipped,
            s.requests_satisfied,
            s.requests_unfulfilled,
            s.requests_invalid
        );
        log::info!(
            "Units: {} requested, {} dispatched, {} missed | Commits: {} ok, {} failed",
            s.units_requested,
            s.units_dispatched,
            s.units_missed,
            s.commits,
            s.commit_failures
        );
        log::info!(
            "Availability checks: {} ({} failed) | Exhausted sources: {} | Peak in-flight: {}",
            s.availability_checks,
            s.check_failures,
            self.exhausted_sources,
            self.peak_in_flight
        );
        if let Some(queued) = self.queued_at_stop {
            log::info!("Calls still queued at stop: {}", queued);
        }
        log::info!("Elapsed: {:.2?}", self.elapsed);
        log::info!("==============================");
    }

    fn describe_exit(&self) -> String {
        match &self.exit {
            RunExit::QueueEmpty => "queue drained".to_string(),
            RunExit::Cancelled => "cancelled".to_string(),
            RunExit::Failed(e) => format!("failed: {}", e),
        }
    }
}

async fn prepare(
    gateway: &dyn ResourceGateway,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<Option<DistanceIndex>, RunError> {
    let status = gateway
        .reset_run(&options.seed, options.target_dispatches, options.max_active_calls)
        .await
        .map_err(RunError::Reset)?;
    log::info!(
        "Run reset with seed '{}' (target {} dispatches, {} active calls): {}",
        options.seed,
        options.target_dispatches,
        options.max_active_calls,
        status.status
    );

    gateway.authenticate().await.map_err(RunError::Login)?;

    if cancel.is_cancelled() {
        return Ok(None);
    }
    let index = DistanceIndex::from_gateway(gateway, options.proxy_service).await?;
    log::info!("Distance index ready for {} targets", index.len());
    Ok(Some(index))
}

/// Executes one complete run and returns its summary.
///
/// The summary has already been logged when this returns.
pub async fn execute_run(
    gateway: Arc<dyn ResourceGateway>,
    options: &RunOptions,
    cancel: CancellationToken,
) -> RunSummary {
    let started = Instant::now();
    let stop_guard = StopGuard::new();

    let mut allocator = None;
    let exit = match prepare(gateway.as_ref(), options, &cancel).await {
        Ok(Some(index)) => {
            let engine = Allocator::new(
                Arc::clone(&gateway),
                Arc::new(index),
                options.allocator.clone(),
                cancel.clone(),
            );
            let exit = match engine.run().await {
                LoopExit::QueueEmpty => RunExit::QueueEmpty,
                LoopExit::Cancelled => RunExit::Cancelled,
                LoopExit::FetchFailures { consecutive } => RunExit::Failed(RunError::FetchFailures { consecutive }),
            };
            allocator = Some(engine);
            exit
        }
        Ok(None) => RunExit::Cancelled,
        Err(e) => {
            log::error!("Run setup failed: {}", e);
            RunExit::Failed(e)
        }
    };

    let queued_at_stop = if options.report_queue_on_stop && !cancel.is_cancelled() {
        match gateway.call_queue().await {
            Ok(queue) => Some(queue.len()),
            Err(e) => {
                log::warn!("Could not read the call queue before stopping: {}", e);
                None
            }
        }
    } else {
        None
    };

    let remote = match stop_guard.stop(gateway.as_ref()).await {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            log::error!("Failed to stop run: {}", e);
            None
        }
        None => None,
    };
    gateway.clear_credentials().await;

    let (stats, exhausted_sources, peak_in_flight) = match &allocator {
        Some(engine) => {
            engine.finish().await;
            for kind in ServiceKind::ALL {
                let keys = engine.exhaustion().exhausted_for(kind);
                if !keys.is_empty() {
                    log::debug!("Exhausted {} sources: {}", kind, keys.join(", "));
                }
            }
            (engine.stats(), engine.exhaustion().len(), engine.limiter().peak_in_flight())
        }
        None => (StatsSnapshot::default(), 0, 0),
    };

    let summary = RunSummary {
        exit,
        remote,
        stats,
        exhausted_sources,
        peak_in_flight,
        queued_at_stop,
        elapsed: started.elapsed(),
    };
    summary.log();
    summary
}
