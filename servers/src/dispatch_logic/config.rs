use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_dispatch::core::{AllocatorOptions, RunOptions};
use lib_dispatch::models::ServiceKind;
use lib_dispatch::retrieve::{ClientSettings, HttpGatewayConfig};

const DEFAULT_CONFIG_FILE: &str = "server_dispatch.conf";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Emergency dispatcher for the remote dispatch coordinator", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "DISPATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DISPATCH_BASE_URL", help = "Root URL of the dispatch coordinator.")]
    pub base_url: Option<String>,

    #[clap(long, env = "DISPATCH_USER_AGENT", help = "User-Agent sent with every request.")]
    pub user_agent: Option<String>,

    #[clap(long, env = "DISPATCH_USERNAME", help = "Login user name.")]
    pub username: Option<String>,

    #[clap(long, env = "DISPATCH_PASSWORD", help = "Login password.")]
    #[serde(skip_serializing)]
    pub password: Option<String>,

    #[clap(long, env = "DISPATCH_SEED", help = "Seed for the coordinator's run reset.")]
    pub seed: Option<String>,

    #[clap(long, env = "DISPATCH_TARGET_DISPATCHES", help = "Dispatch count that ends the run.")]
    pub target_dispatches: Option<u32>,

    #[clap(long, env = "DISPATCH_MAX_ACTIVE_CALLS", help = "Concurrent call limit on the coordinator side.")]
    pub max_active_calls: Option<u32>,

    #[clap(long, env = "DISPATCH_MAX_CONCURRENT_REQUESTS", help = "Outbound availability checks and commits in flight at once.")]
    pub max_concurrent_requests: Option<usize>,

    #[clap(long, env = "DISPATCH_PROXY_SERVICE", help = "Service kind whose availability seeds the distance index.")]
    pub proxy_service: Option<String>,

    #[clap(long, env = "DISPATCH_REQUEST_TIMEOUT_SECS", help = "Per-attempt HTTP timeout in seconds.")]
    pub request_timeout_secs: Option<u64>,

    #[clap(long, env = "DISPATCH_MAX_RETRIES", help = "Retries for transient HTTP failures.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "DISPATCH_RETRY_MIN_DELAY_MS", help = "Shortest backoff between transient retries.")]
    pub retry_min_delay_ms: Option<u64>,

    #[clap(long, env = "DISPATCH_RETRY_MAX_DELAY_MS", help = "Longest backoff between transient retries.")]
    pub retry_max_delay_ms: Option<u64>,

    #[clap(long, env = "DISPATCH_AUTH_REFRESH_ATTEMPTS", help = "Token refreshes per operation after a 401.")]
    pub auth_refresh_attempts: Option<u32>,

    #[clap(long, env = "DISPATCH_DECODE_ATTEMPTS", help = "Fetches of an operation whose payload does not parse.")]
    pub decode_attempts: Option<u32>,

    #[clap(long, env = "DISPATCH_MAX_FETCH_FAILURES", help = "Consecutive next-call failures before the run is abandoned.")]
    pub max_fetch_failures: Option<u32>,

    #[clap(long, env = "DISPATCH_REPORT_QUEUE_ON_STOP", help = "Count the calls still queued when the run stops.")]
    pub report_queue_on_stop: Option<bool>,

    #[clap(long, env = "DISPATCH_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "DISPATCH_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DISPATCH_LOG_KEEP_RUNS", help = "Run logs kept in the log directory, including the current one.")]
    pub log_keep_runs: Option<usize>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            base_url: other.base_url.or(self.base_url),
            user_agent: other.user_agent.or(self.user_agent),
            username: other.username.or(self.username),
            password: other.password.or(self.password),
            seed: other.seed.or(self.seed),
            target_dispatches: other.target_dispatches.or(self.target_dispatches),
            max_active_calls: other.max_active_calls.or(self.max_active_calls),
            max_concurrent_requests: other.max_concurrent_requests.or(self.max_concurrent_requests),
            proxy_service: other.proxy_service.or(self.proxy_service),
            request_timeout_secs: other.request_timeout_secs.or(self.request_timeout_secs),
            max_retries: other.max_retries.or(self.max_retries),
            retry_min_delay_ms: other.retry_min_delay_ms.or(self.retry_min_delay_ms),
            retry_max_delay_ms: other.retry_max_delay_ms.or(self.retry_max_delay_ms),
            auth_refresh_attempts: other.auth_refresh_attempts.or(self.auth_refresh_attempts),
            decode_attempts: other.decode_attempts.or(self.decode_attempts),
            max_fetch_failures: other.max_fetch_failures.or(self.max_fetch_failures),
            report_queue_on_stop: other.report_queue_on_stop.or(self.report_queue_on_stop),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_keep_runs: other.log_keep_runs.or(self.log_keep_runs),
        }
    }

    fn defaults() -> Config {
        Config {
            base_url: Some("http://localhost:5000/".to_string()),
            user_agent: Some("Emergency Dispatcher".to_string()),
            username: Some("distancify".to_string()),
            password: Some("hackathon".to_string()),
            seed: Some("default".to_string()),
            target_dispatches: Some(50),
            max_active_calls: Some(10),
            max_concurrent_requests: Some(10),
            proxy_service: Some(ServiceKind::Medical.to_string()),
            request_timeout_secs: Some(30),
            max_retries: Some(7),
            retry_min_delay_ms: Some(2),
            retry_max_delay_ms: Some(1000),
            auth_refresh_attempts: Some(1),
            decode_attempts: Some(3),
            max_fetch_failures: Some(5),
            report_queue_on_stop: Some(true),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_keep_runs: Some(5),
            ..Default::default()
        }
    }

    /// Rejects combinations the run cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.as_deref().map_or(true, |url| url.trim().is_empty()) {
            bail!("baseUrl must not be empty");
        }
        if self.username.as_deref().map_or(true, str::is_empty) {
            bail!("username must not be empty");
        }
        if self.max_concurrent_requests == Some(0) {
            bail!("maxConcurrentRequests must be at least 1");
        }
        if self.target_dispatches == Some(0) || self.max_active_calls == Some(0) {
            bail!("targetDispatches and maxActiveCalls must be positive");
        }
        if self.decode_attempts == Some(0) || self.max_fetch_failures == Some(0) {
            bail!("decodeAttempts and maxFetchFailures must be at least 1");
        }
        if let (Some(min), Some(max)) = (self.retry_min_delay_ms, self.retry_max_delay_ms) {
            if min > max {
                bail!("retryMinDelayMs ({}) exceeds retryMaxDelayMs ({})", min, max);
            }
        }
        self.proxy_service()?;
        let level = self.log_level();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!("unknown log level '{}'", level);
        }
        Ok(())
    }

    /// The configured proxy kind.
    pub fn proxy_service(&self) -> Result<ServiceKind> {
        self.proxy_service
            .as_deref()
            .unwrap_or("Medical")
            .parse::<ServiceKind>()
            .map_err(|e| anyhow!(e))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.as_deref().unwrap_or("info").to_lowercase()
    }

    pub fn log_keep_runs(&self) -> usize {
        self.log_keep_runs.unwrap_or(5).max(1)
    }

    /// Connection settings for the HTTP gateway.
    pub fn gateway_config(&self) -> HttpGatewayConfig {
        let base = HttpGatewayConfig::default();
        let client = ClientSettings::default();
        HttpGatewayConfig {
            base_url: self.base_url.clone().unwrap_or(base.base_url),
            username: self.username.clone().unwrap_or(base.username),
            password: self.password.clone().unwrap_or(base.password),
            client: ClientSettings {
                user_agent: self.user_agent.clone().unwrap_or(client.user_agent),
                timeout: self.request_timeout_secs.map(Duration::from_secs).unwrap_or(client.timeout),
                max_retries: self.max_retries.unwrap_or(client.max_retries),
                retry_min_delay: self.retry_min_delay_ms.map(Duration::from_millis).unwrap_or(client.retry_min_delay),
                retry_max_delay: self.retry_max_delay_ms.map(Duration::from_millis).unwrap_or(client.retry_max_delay),
            },
            auth_refresh_attempts: self.auth_refresh_attempts.unwrap_or(base.auth_refresh_attempts),
            decode_attempts: self.decode_attempts.unwrap_or(base.decode_attempts),
            decode_backoff: base.decode_backoff,
        }
    }

    /// Parameters of the run.
    pub fn run_options(&self) -> Result<RunOptions> {
        let base = RunOptions::default();
        let allocator = AllocatorOptions::default();
        Ok(RunOptions {
            seed: self.seed.clone().unwrap_or(base.seed),
            target_dispatches: self.target_dispatches.unwrap_or(base.target_dispatches),
            max_active_calls: self.max_active_calls.unwrap_or(base.max_active_calls),
            proxy_service: self.proxy_service()?,
            report_queue_on_stop: self.report_queue_on_stop.unwrap_or(base.report_queue_on_stop),
            allocator: AllocatorOptions {
                max_concurrent_requests: self.max_concurrent_requests.unwrap_or(allocator.max_concurrent_requests),
                max_fetch_failures: self.max_fetch_failures.unwrap_or(allocator.max_fetch_failures),
                fetch_retry_delay: allocator.fetch_retry_delay,
            },
        })
    }
}

fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let config_str =
        fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let file_config = serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(Some(file_config))
}

pub fn load_config() -> Result<Config> {
    load_config_from(std::env::args_os())
}

/// Layers defaults, the JSON config file and CLI/env values, in that order.
pub fn load_config_from<I, T>(args: I) -> Result<Config>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // clap::Parser handles env vars and CLI args together.
    let cli_args = Config::parse_from(args);

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli_args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_coordinator_setup() {
        // Built without clap so exported DISPATCH_* variables cannot leak in.
        let config = Config::defaults();

        assert!(config.validate().is_ok());
        let options = config.run_options().unwrap();
        assert_eq!(options.seed, "default");
        assert_eq!(options.target_dispatches, 50);
        assert_eq!(options.max_active_calls, 10);
        assert_eq!(options.proxy_service, ServiceKind::Medical);
        assert_eq!(options.allocator.max_concurrent_requests, 10);

        let gateway = config.gateway_config();
        assert_eq!(gateway.base_url, "http://localhost:5000/");
        assert_eq!(gateway.client.max_retries, 7);
        assert_eq!(gateway.auth_refresh_attempts, 1);
        assert_eq!(config.log_keep_runs(), 5);
    }

    #[test]
    fn cli_overrides_file_which_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"seed":"from-file","targetDispatches":20,"proxyService":"fire"}}"#).unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config =
            load_config_from(["server_dispatch", "--config-path", path.as_str(), "--target-dispatches", "30"]).unwrap();

        let options = config.run_options().unwrap();
        assert_eq!(options.seed, "from-file");
        assert_eq!(options.target_dispatches, 30);
        assert_eq!(options.proxy_service, ServiceKind::Fire);
    }

    #[test]
    fn unparseable_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let path = file.path().to_string_lossy().to_string();

        assert!(load_config_from(["server_dispatch", "--config-path", path.as_str()]).is_err());
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        let base = Config::defaults();

        let zero_permits = Config { max_concurrent_requests: Some(0), ..base.clone() };
        assert!(zero_permits.validate().is_err());

        let inverted = Config { retry_min_delay_ms: Some(500), retry_max_delay_ms: Some(10), ..base.clone() };
        assert!(inverted.validate().is_err());

        let empty_url = Config { base_url: Some("  ".into()), ..base.clone() };
        assert!(empty_url.validate().is_err());

        let bad_kind = Config { proxy_service: Some("Ambulance".into()), ..base.clone() };
        assert!(bad_kind.validate().is_err());

        let bad_level = Config { log_level: Some("verbose".into()), ..base };
        assert!(bad_level.validate().is_err());
    }
}
