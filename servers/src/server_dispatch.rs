use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_dispatch::core::{execute_run, RunExit};
use lib_dispatch::retrieve::HttpGateway;

mod dispatch_logic;
use dispatch_logic::{config, logger};

/// Cancels `cancel` on the first Ctrl-C or SIGTERM. A second Ctrl-C exits
/// immediately without waiting for the stop call.
async fn watch_shutdown(cancel: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, stopping the run.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, stopping the run.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
    cancel.cancel();

    if signal::ctrl_c().await.is_ok() {
        log::warn!("Second Ctrl-C received, exiting without a clean stop.");
        std::process::exit(130);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    config.validate()?;
    let run_options = config.run_options()?;

    let run_log = logger::RunLog {
        dir: config.log_dir(),
        prefix: "server_dispatch".to_string(),
        seed: run_options.seed.clone(),
        keep_runs: config.log_keep_runs(),
    };
    let log_path = logger::setup_logging(&run_log, &config.log_level())?;
    log::debug!("Writing run log to {}", log_path.display());

    let gateway_config = config.gateway_config();
    log::info!(
        "Dispatcher starting against {} as '{}' ({} outbound permits)",
        gateway_config.base_url,
        gateway_config.username,
        run_options.allocator.max_concurrent_requests
    );
    let gateway = Arc::new(HttpGateway::new(gateway_config)?);

    let cancel = CancellationToken::new();
    tokio::spawn(watch_shutdown(cancel.clone()));

    let summary = execute_run(gateway, &run_options, cancel).await;

    match summary.exit {
        RunExit::Failed(e) => {
            log::error!("Run failed: {}", e);
            Err(e.into())
        }
        RunExit::QueueEmpty | RunExit::Cancelled => {
            log::info!("Shutdown complete.");
            Ok(())
        }
    }
}
