//! StorageCleanerService - NAS recording retention
//!
//! ## Responsibilities
//!
//! - Daily sweep of the recording tree
//!   `{root}/{gatewayId}/{cameraId}/{YYYY-MM-DD}/`
//! - Delete day-directories older than the retention window
//!
//! ディレクトリ名が日付形式でないものは対象外。削除失敗は記録して
//! 続行し、翌日の周期で再試行される。

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;

const DATE_DIR_FORMAT: &str = "%Y-%m-%d";

/// Outcome of one sweep pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub removed_dirs: u64,
    pub freed_bytes: u64,
}

/// Retention sweeper over the recording tree
pub struct StorageCleanerService {
    storage_root: PathBuf,
    retention_days: i64,
    /// Delay before the first sweep after startup
    initial_delay: Duration,
    sweep_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl StorageCleanerService {
    pub fn new(storage_root: PathBuf, retention_days: i64) -> Self {
        Self {
            storage_root,
            retention_days,
            initial_delay: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(24 * 60 * 60),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the daily sweep loop
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Storage cleaner already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            root = %self.storage_root.display(),
            retention_days = self.retention_days,
            "Starting storage cleaner"
        );

        let service = self.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            tokio::time::sleep(service.initial_delay).await;
            let mut ticker = interval(service.sweep_interval);

            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }

                let cutoff = Utc::now().date_naive() - ChronoDuration::days(service.retention_days);
                let stats = service.sweep_at(cutoff);
                tracing::info!(
                    cutoff = %cutoff,
                    removed_dirs = stats.removed_dirs,
                    freed_mb = stats.freed_bytes / (1024 * 1024),
                    "Retention sweep complete"
                );
            }

            tracing::info!("Storage cleaner stopped");
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// One sweep pass: remove day-directories strictly older than `cutoff`
    ///
    /// 同期fsウォーク。木は gateway/camera/date の3階層固定で浅い。
    pub fn sweep_at(&self, cutoff: NaiveDate) -> SweepStats {
        let mut stats = SweepStats::default();

        for gateway_dir in subdirs(&self.storage_root) {
            for camera_dir in subdirs(&gateway_dir) {
                for day_dir in subdirs(&camera_dir) {
                    let Some(name) = day_dir.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    let Ok(date) = NaiveDate::parse_from_str(name, DATE_DIR_FORMAT) else {
                        // 日付形式以外のディレクトリは触らない
                        continue;
                    };
                    if date >= cutoff {
                        continue;
                    }

                    let size = dir_size(&day_dir);
                    match std::fs::remove_dir_all(&day_dir) {
                        Ok(()) => {
                            stats.removed_dirs += 1;
                            stats.freed_bytes += size;
                            tracing::debug!(dir = %day_dir.display(), "Removed expired recordings");
                        }
                        Err(e) => {
                            tracing::warn!(
                                dir = %day_dir.display(),
                                error = %e,
                                "Failed to remove expired recordings"
                            );
                        }
                    }
                }
            }
        }

        stats
    }
}

/// Immediate subdirectories, silently empty on read errors
fn subdirs(path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}

/// Total size of all files under a day-directory, recursively
fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| match e.metadata() {
            Ok(m) if m.is_file() => m.len(),
            Ok(m) if m.is_dir() => dir_size(&e.path()),
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_day(root: &Path, gateway: &str, camera: &str, day: &str, bytes: usize) {
        let dir = root.join(gateway).join(camera).join(day);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("00-00-00.mp4"), vec![0u8; bytes]).unwrap();
    }

    fn cleaner(root: &Path) -> StorageCleanerService {
        StorageCleanerService::new(root.to_path_buf(), 30)
    }

    #[test]
    fn test_expired_day_dirs_are_removed() {
        let tmp = TempDir::new().unwrap();
        seed_day(tmp.path(), "gw1", "cam1", "2026-01-01", 10);
        seed_day(tmp.path(), "gw1", "cam1", "2026-03-01", 10);
        seed_day(tmp.path(), "gw1", "cam2", "2026-01-15", 10);

        let stats = cleaner(tmp.path()).sweep_at(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        assert_eq!(stats.removed_dirs, 2);
        assert!(!tmp.path().join("gw1/cam1/2026-01-01").exists());
        assert!(tmp.path().join("gw1/cam1/2026-03-01").exists());
        assert!(!tmp.path().join("gw1/cam2/2026-01-15").exists());
    }

    #[test]
    fn test_cutoff_day_itself_is_kept() {
        let tmp = TempDir::new().unwrap();
        seed_day(tmp.path(), "gw1", "cam1", "2026-02-01", 10);

        let stats = cleaner(tmp.path()).sweep_at(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        assert_eq!(stats.removed_dirs, 0);
        assert!(tmp.path().join("gw1/cam1/2026-02-01").exists());
    }

    #[test]
    fn test_non_date_dirs_are_untouched() {
        let tmp = TempDir::new().unwrap();
        let odd = tmp.path().join("gw1").join("cam1").join("exports");
        std::fs::create_dir_all(&odd).unwrap();
        std::fs::write(odd.join("keep.bin"), b"x").unwrap();
        seed_day(tmp.path(), "gw1", "cam1", "not-a-date", 10);

        let stats = cleaner(tmp.path()).sweep_at(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        assert_eq!(stats.removed_dirs, 0);
        assert!(odd.join("keep.bin").exists());
        assert!(tmp.path().join("gw1/cam1/not-a-date").exists());
    }

    #[test]
    fn test_freed_bytes_counts_removed_files() {
        let tmp = TempDir::new().unwrap();
        seed_day(tmp.path(), "gw1", "cam1", "2025-12-01", 4096);
        seed_day(tmp.path(), "gw1", "cam1", "2025-12-02", 1024);

        let stats = cleaner(tmp.path()).sweep_at(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        assert_eq!(stats.removed_dirs, 2);
        assert_eq!(stats.freed_bytes, 5120);
    }

    #[test]
    fn test_freed_bytes_includes_nested_files() {
        let tmp = TempDir::new().unwrap();
        seed_day(tmp.path(), "gw1", "cam1", "2025-12-01", 1024);
        let nested = tmp.path().join("gw1/cam1/2025-12-01/extra");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("00-15-00.mp4"), vec![0u8; 2048]).unwrap();

        let stats = cleaner(tmp.path()).sweep_at(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        assert_eq!(stats.removed_dirs, 1);
        assert_eq!(stats.freed_bytes, 3072);
    }

    #[test]
    fn test_missing_root_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nonexistent");

        let stats = cleaner(&missing).sweep_at(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        assert_eq!(stats, SweepStats::default());
    }
}
