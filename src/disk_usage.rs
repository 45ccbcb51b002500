//! Per-device disk-usage cache and the mount-point resolver that feeds it.
//!
//! The cache amortizes `sysinfo`'s disk-space query across roughly
//! `refresh_interval` bytes of reservations: most calls to `check` are pure
//! arithmetic against the last query, and only fall back to a fresh query
//! when the reserved total threatens to outrun the cached free space.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sysinfo::Disks;

use crate::error::{OrbitError, Result};

const DEFAULT_REFRESH_INTERVAL: u64 = 2 * 1024 * 1024 * 1024;

struct State {
    free_space: u64,
    reserved_used: u64,
}

/// Tracks free space and pending reservations for a single mount point.
pub struct DiskUsageCache {
    mount_point: PathBuf,
    refresh_interval: u64,
    state: Mutex<State>,
}

impl DiskUsageCache {
    pub fn new(mount_point: PathBuf) -> Self {
        Self::with_refresh_interval(mount_point, DEFAULT_REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(mount_point: PathBuf, refresh_interval: u64) -> Self {
        DiskUsageCache {
            mount_point,
            refresh_interval,
            state: Mutex::new(State {
                free_space: 0,
                reserved_used: 0,
            }),
        }
    }

    /// Reserves `need` bytes against this device. Returns
    /// `OrbitError::TargetNoSpace` if the device cannot be queried or lacks
    /// the space once the cache is refreshed.
    pub fn check(&self, need: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        state.reserved_used = state.reserved_used.saturating_add(need);
        if state.reserved_used <= state.free_space && state.reserved_used < self.refresh_interval {
            return Ok(());
        }

        let available = query_available(&self.mount_point)?;
        state.free_space = available;
        state.reserved_used = need;

        if state.reserved_used > state.free_space {
            return Err(OrbitError::TargetNoSpace {
                want: state.reserved_used,
                have: state.free_space,
            });
        }

        Ok(())
    }
}

/// One-shot available-space query for `mount_point`, bypassing the cache.
/// Used by callers that need a single up-front figure rather than ongoing
/// reservation tracking.
pub fn available_space(mount_point: &Path) -> Result<u64> {
    query_available(mount_point)
}

fn query_available(mount_point: &Path) -> Result<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|d| d.mount_point() == mount_point)
        .map(|d| d.available_space())
        .ok_or_else(|| {
            OrbitError::Config(format!(
                "could not find mount point for disk usage query: {}",
                mount_point.display()
            ))
        })
}

/// Resolves an absolute path to its owning mount point via longest-prefix
/// match against the system mount table, memoizing the result per path.
pub struct MountResolver {
    mount_points: Vec<PathBuf>,
    cache: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl MountResolver {
    /// Reads the mount table once.
    pub fn new() -> Self {
        let disks = Disks::new_with_refreshed_list();
        let mut mount_points: Vec<PathBuf> =
            disks.iter().map(|d| d.mount_point().to_path_buf()).collect();
        // Longest first so prefix search finds the most specific match.
        mount_points.sort_by_key(|p| std::cmp::Reverse(p.as_os_str().len()));

        MountResolver {
            mount_points,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Owning mount point of `path`, falling back to `/` if nothing
    /// matches (should not happen on a well-formed mount table).
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if let Some(hit) = self.cache.lock().unwrap().get(path) {
            return hit.clone();
        }

        let found = self
            .mount_points
            .iter()
            .find(|mp| path.starts_with(mp))
            .cloned()
            .unwrap_or_else(|| PathBuf::from("/"));

        self.cache
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), found.clone());
        found
    }
}

impl Default for MountResolver {
    fn default() -> Self {
        Self::new()
    }
}
