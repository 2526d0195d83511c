use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Where and how one dispatcher run writes its log.
#[derive(Debug, Clone)]
pub struct RunLog {
    /// Directory shared by every run of every binary.
    pub dir: PathBuf,
    /// Binary name, the first part of the file name.
    pub prefix: String,
    /// Reset seed of the run, so logs of the same scenario sort together.
    pub seed: String,
    /// Run logs of this binary kept after cleanup, counting the new one.
    pub keep_runs: usize,
}

impl RunLog {
    /// `<prefix>_<seed>_<timestamp>.log`, with the seed reduced to file-safe characters.
    fn file_name(&self, stamp: &str) -> String {
        let seed: String = self
            .seed
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!("{}_{}_{}.log", self.prefix, seed, stamp)
    }

    fn owns(&self, path: &Path) -> bool {
        let owned_prefix = format!("{}_", self.prefix);
        path.extension().is_some_and(|ext| ext == "log")
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&owned_prefix))
    }
}

/// Installs the global `fern` logger for one run: stdout plus a fresh run log
/// file. Returns the path of that file.
pub fn setup_logging(run_log: &RunLog, log_level: &str) -> Result<PathBuf> {
    if !run_log.dir.exists() {
        fs::create_dir_all(&run_log.dir)?;
    }

    // Make room for the new file.
    cleanup_old_logs(run_log, run_log.keep_runs.saturating_sub(1))?;

    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = run_log.dir.join(run_log.file_name(&stamp));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("hyper_util", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    Ok(log_path)
}

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Deletes this binary's run logs beyond the newest `keep`. Files written by
/// other binaries sharing the directory are left alone.
fn cleanup_old_logs(run_log: &RunLog, keep: usize) -> Result<usize> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(&run_log.dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|path| run_log.owns(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in entries.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old run log {:?}: {}", path, e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_log(dir: &Path, keep_runs: usize) -> RunLog {
        RunLog {
            dir: dir.to_path_buf(),
            prefix: "server_dispatch".to_string(),
            seed: "default".to_string(),
            keep_runs,
        }
    }

    #[test]
    fn levels_fall_back_to_info() {
        assert_eq!(parse_level("TRACE"), log::LevelFilter::Trace);
        assert_eq!(parse_level("warn"), log::LevelFilter::Warn);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
    }

    #[test]
    fn file_name_carries_a_file_safe_seed() {
        let log = RunLog { seed: "storm 7/north".to_string(), ..run_log(Path::new("logs"), 5) };

        assert_eq!(
            log.file_name("2026-10-18_09-00-00"),
            "server_dispatch_storm_7_north_2026-10-18_09-00-00.log"
        );
    }

    #[test]
    fn cleanup_keeps_the_newest_runs_of_this_binary_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["server_dispatch_a_1.log", "server_dispatch_a_2.log", "server_dispatch_b_3.log"] {
            fs::write(dir.path().join(name), name).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        fs::write(dir.path().join("test_gateway_1.log"), "other binary").unwrap();
        fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        let removed = cleanup_old_logs(&run_log(dir.path(), 3), 2).unwrap();

        assert_eq!(removed, 1);
        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "notes.txt".to_string(),
                "server_dispatch_a_2.log".to_string(),
                "server_dispatch_b_3.log".to_string(),
                "test_gateway_1.log".to_string(),
            ]
        );
    }
}
