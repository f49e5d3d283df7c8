use std::time::SystemTime;
use serde::{Serialize, Deserialize};
use crate::parallel::scan::ScanStats;

/// Database statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub name: String,
    pub buckets: Vec<BucketStats>,

    // Storage metrics
    pub size_bytes: u64,
    pub total_records: usize,

    // Scan engine
    pub scan_workers: usize,
    pub pooled_buffers: usize,
    pub scans: ScanCounters,       // cumulative since open
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketStats {
    pub name: String,
    pub records: usize,
    pub indexed_fields: Vec<String>,
    pub index_complete: bool,      // false: queries fall back to scan until reindex
}

/// Outcome of re-encoding every value in a bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompressionReport {
    pub processed: usize,
    pub rewritten: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

/// Serializable mirror of `ScanStats`, summed over scans
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanCounters {
    pub scanned: usize,
    pub matched: usize,
    pub skipped: usize,
    pub degraded: usize,
}

impl From<ScanStats> for ScanCounters {
    fn from(s: ScanStats) -> Self {
        ScanCounters {
            scanned: s.scanned,
            matched: s.matched,
            skipped: s.skipped,
            degraded: s.degraded,
        }
    }
}

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: u64,
}

impl HealthCheckResult {
    /// Worst status among the checks wins
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let mut status = HealthStatus::Healthy;
        for check in &checks {
            match &check.status {
                HealthStatus::Unhealthy(msg) => {
                    status = HealthStatus::Unhealthy(format!("{}: {}", check.name, msg));
                    break;
                }
                HealthStatus::Degraded(msg) if status.is_healthy() => {
                    status = HealthStatus::Degraded(format!("{}: {}", check.name, msg));
                }
                _ => {}
            }
        }

        HealthCheckResult {
            status,
            checks,
            timestamp: SystemTime::now(),
        }
    }
}
