use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Name of the per-project state directory.
pub const PROJECT_DIR: &str = ".deeppentest";

/// Resolve the state directory for a project rooted at `base`.
pub fn project_dir(base: &Path) -> PathBuf {
    base.join(PROJECT_DIR)
}

/// Project root implied by a discovered config file
/// (`<root>/.deeppentest/config.toml`), or `fallback` when none was found.
pub fn project_root(config_path: Option<&Path>, fallback: &Path) -> PathBuf {
    config_path
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map_or_else(|| fallback.to_path_buf(), Path::to_path_buf)
}

pub fn logs_dir(base: &Path) -> PathBuf {
    project_dir(base).join("logs")
}

/// Fresh execution-log path for a run started at `started`.
///
/// Two runs in the same second get distinct names.
pub fn run_log_path(base: &Path, started: DateTime<Local>) -> PathBuf {
    let dir = logs_dir(base);
    let stem = started.format("run-%Y%m%d-%H%M%S").to_string();
    let mut candidate = dir.join(format!("{stem}.jsonl"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{n}.jsonl"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn root_comes_from_config_location() {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join(".deeppentest").join("config.toml");
        assert_eq!(project_root(Some(config.as_path()), Path::new("/elsewhere")), tmp.path());
        assert_eq!(project_root(None, tmp.path()), tmp.path());
    }

    #[test]
    fn run_log_lives_under_logs_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = run_log_path(tmp.path(), started());
        assert_eq!(
            path,
            tmp.path()
                .join(".deeppentest")
                .join("logs")
                .join("run-20240309-140507.jsonl")
        );
    }

    #[test]
    fn run_log_avoids_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(logs_dir(tmp.path())).unwrap();
        std::fs::write(run_log_path(tmp.path(), started()), "").unwrap();

        let next = run_log_path(tmp.path(), started());
        assert_eq!(
            next.file_name().unwrap().to_str().unwrap(),
            "run-20240309-140507-1.jsonl"
        );
    }
}
