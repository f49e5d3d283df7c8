use std::path::PathBuf;
use std::time::Duration;
use crate::compression::envelope::COMPRESSION_THRESHOLD;
use crate::storage::format::Format;

#[derive(Debug, Clone)]
pub struct Config {
    /// Snapshot file backing the engine. `None` keeps everything in memory.
    pub storage_path: Option<PathBuf>,
    pub format: Format,
    pub compression_threshold: usize,

    // Scan engine
    pub scan_workers: Option<usize>,            // None = min(cpus, max_scan_workers)
    pub max_scan_workers: usize,
    pub queue_depth_per_worker: usize,
    pub item_timeout: Duration,                 // producer -> worker handoff
    pub scan_timeout: Duration,                 // whole scan
    pub worker_buffer_capacity: usize,

    pub upgrade_on_read: bool,
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: None,
            format: Format::Json,
            compression_threshold: COMPRESSION_THRESHOLD,

            scan_workers: None,
            max_scan_workers: 6,
            queue_depth_per_worker: 2,
            item_timeout: Duration::from_secs(10),
            scan_timeout: Duration::from_secs(60),
            worker_buffer_capacity: 200,

            upgrade_on_read: true,
            sync_on_commit: true,
        }
    }
}

impl Config {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: Some(path.into()),
            ..Config::default()
        }
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = Some(workers.max(1));
        self
    }

    pub fn queue_depth_per_worker(mut self, depth: usize) -> Self {
        self.queue_depth_per_worker = depth.max(1);
        self
    }

    pub fn item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn upgrade_on_read(mut self, enabled: bool) -> Self {
        self.upgrade_on_read = enabled;
        self
    }

    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }

    /// Number of scan workers actually spawned
    pub fn effective_scan_workers(&self) -> usize {
        match self.scan_workers {
            Some(n) => n.max(1),
            None => num_cpus::get().min(self.max_scan_workers).max(1),
        }
    }
}
