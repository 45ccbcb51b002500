//! Auto-fill: given an already-indexed job list sorted in relative-path
//! order, trims the tail to fit the smallest available destination, so a
//! caller can choose to skip what won't fit rather than let the copy stage
//! fail deep into a run. Not wired into [`crate::Engine`] — a caller applies
//! this to a job list before constructing one, as an external collaborator.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::disk_usage::{available_space, MountResolver};
use crate::error::{OrbitError, Result};
use crate::job::Job;

/// Index, in `jobs`, of the first entry that must be dropped for the run to
/// fit in `limit` bytes, or `None` if everything fits.
///
/// Mirrors a prefix-sum scan: walks forward accumulating remaining budget,
/// and remembers the last index at which the budget went negative. Jobs
/// are assumed already sorted by relative path so a cutoff lands on a
/// contiguous suffix.
fn cutoff_index(jobs: &[Arc<Job>], limit: i64) -> Option<usize> {
    let mut left = limit;
    let mut target: Option<usize> = None;
    for (idx, job) in jobs.iter().enumerate() {
        left -= job.size as i64;
        if left < 0 {
            target = Some(idx);
        }
    }
    target
}

/// Walks the cutoff back to the nearest ancestor directory boundary, so a
/// directory is either kept whole or dropped whole rather than split mid-way.
/// `split_depth` of 0 disables this and returns `idx` unchanged.
fn align_to_directory_boundary(jobs: &[Arc<Job>], idx: usize, split_depth: usize) -> usize {
    if split_depth == 0 {
        return idx;
    }

    for i in (0..=idx).rev() {
        let depth = jobs[i].source.relative_path().matches('/').count();
        if depth < split_depth {
            return i;
        }
    }
    0
}

/// The outcome of applying auto-fill to a job list: the jobs that remain,
/// and the relative-path prefixes of whichever source subtrees were cut.
pub struct AutoFillResult {
    pub kept: Vec<Arc<Job>>,
    pub dropped_sources: Vec<String>,
}

/// Computes the per-destination available-space budget by querying each
/// mount point once and dividing it evenly among however many of
/// `destinations` share that mount, then trims `jobs` (already sorted by
/// relative path) to fit. `split_depth` of 0 cuts at the exact byte
/// boundary; a positive depth backs the cut up to the nearest ancestor at
/// or above that many path components, so whole subtrees are kept or
/// dropped together.
pub fn apply_autofill(
    jobs: Vec<Arc<Job>>,
    destinations: &[impl AsRef<Path>],
    split_depth: usize,
) -> Result<AutoFillResult> {
    let resolver = MountResolver::new();
    let mut counts: HashMap<std::path::PathBuf, u64> = HashMap::new();
    let mut available: HashMap<std::path::PathBuf, u64> = HashMap::new();

    for dst in destinations {
        let mount = resolver.resolve(dst.as_ref());
        *counts.entry(mount.clone()).or_insert(0) += 1;
        available
            .entry(mount.clone())
            .or_insert_with(|| available_space(&mount).unwrap_or(0));
    }

    let mut limit = i64::MAX;
    for (mount, total) in &available {
        let share = *total / counts[mount].max(1);
        limit = limit.min(share as i64);
    }
    if available.is_empty() {
        return Err(OrbitError::Config("no destinations to auto-fill against".into()));
    }

    let Some(raw_idx) = cutoff_index(&jobs, limit) else {
        return Ok(AutoFillResult {
            kept: jobs,
            dropped_sources: Vec::new(),
        });
    };

    let idx = align_to_directory_boundary(&jobs, raw_idx, split_depth);
    if idx == 0 {
        return Err(OrbitError::Config(format!(
            "cannot find an available auto-fill slice, filesystem budget = {} bytes",
            limit
        )));
    }

    let mut dropped_sources = Vec::new();
    let mut last_prefix = String::new();
    for job in &jobs[idx..] {
        let rel = job.source.relative_path();
        if rel.starts_with(last_prefix.as_str()) && !last_prefix.is_empty() {
            continue;
        }
        dropped_sources.push(rel.clone());
        last_prefix = format!("{}/", rel);
    }

    let kept = jobs[..idx].to_vec();
    Ok(AutoFillResult {
        kept,
        dropped_sources,
    })
}
