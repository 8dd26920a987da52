//! Memory sampling for adaptive page-size throttling
//!
//! The retriever keeps whole pages in memory before they are flattened into
//! the snapshot file, so sustained memory pressure means pages are too big.
//! The heuristic: if utilization is above the threshold but the snapshot
//! file grew since the last sample, memory is being released by
//! serialization and the page size can stay; if the file did not grow, the
//! page size is halved down to a floor of [`MIN_PAGE_SIZE`].

use std::fs;
use std::path::Path;
use sysinfo::System;

/// Smallest page size the throttle will go down to
pub const MIN_PAGE_SIZE: usize = 2;

/// Current process-wide memory utilization as a percentage of total
pub fn utilization_percent() -> f32 {
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    (sys.used_memory() as f64 / total as f64 * 100.0) as f32
}

/// Size of the snapshot file in bytes, 0 if it does not exist yet
pub fn snapshot_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Halve the page size, flooring at [`MIN_PAGE_SIZE`]
pub fn halve_page_size(current: usize) -> usize {
    let reduced = std::cmp::max(MIN_PAGE_SIZE, current / 2);
    if reduced != current {
        log::warn!("Reducing page size from {} to {}", current, reduced);
    }
    reduced
}

/// What the throttle decided for the next page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Pressure below threshold, or the snapshot file grew: keep going
    Continue,
    /// Pressure with no file growth: use this reduced page size
    Reduce(usize),
    /// Already at the floor and still under pressure: stop with partial data
    Abort,
}

/// Decide how to react to a memory sample taken after a page was persisted
pub fn throttle_decision(
    utilization: f32,
    threshold: f32,
    snapshot_grew: bool,
    page_size: usize,
) -> ThrottleDecision {
    if utilization <= threshold {
        return ThrottleDecision::Continue;
    }
    log::warn!(
        "High memory usage detected: {:.1}% (threshold {:.1}%)",
        utilization,
        threshold
    );
    if snapshot_grew {
        // Serialization is keeping up; the pressure is transient.
        return ThrottleDecision::Continue;
    }
    if page_size <= MIN_PAGE_SIZE {
        return ThrottleDecision::Abort;
    }
    ThrottleDecision::Reduce(halve_page_size(page_size))
}
