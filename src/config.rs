//! Engine configuration: a functional-options builder (mirroring the
//! option-closures pattern used elsewhere for CLI/engine wiring) plus an
//! optional TOML config file layered underneath it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};
use crate::event::EventHandler;
use crate::path::Source;

pub const DEFAULT_THREADS: usize = 8;
pub const DEFAULT_REFRESH_INTERVAL: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 1024 * 1024;
pub const INDEX_QUEUE_CAPACITY: usize = 128;
pub const WRITER_CHANNEL_CAPACITY: usize = 4;

/// Per-device discipline: linear devices (tape) force single-threaded
/// access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub linear: bool,
    pub threads: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            linear: false,
            threads: DEFAULT_THREADS,
        }
    }
}

/// The fully-resolved engine configuration. Built via [`EngineOptions`] and
/// a sequence of [`Opt`] closures, exactly like the CLI and the TOML loader
/// both populate it.
pub struct EngineOptions {
    pub wildcard_sources: Vec<PathBuf>,
    pub accurate_sources: Vec<(PathBuf, Vec<String>)>,
    pub targets: Vec<PathBuf>,
    pub overwrite: bool,
    pub with_hash: bool,
    pub from_device: DeviceConfig,
    pub to_device: DeviceConfig,
    pub batch_size: usize,
    pub refresh_interval: u64,
    pub event_handlers: Vec<EventHandler>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            wildcard_sources: Vec::new(),
            accurate_sources: Vec::new(),
            targets: Vec::new(),
            overwrite: false,
            with_hash: false,
            from_device: DeviceConfig::default(),
            to_device: DeviceConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            event_handlers: Vec::new(),
        }
    }
}

impl EngineOptions {
    pub fn apply(mut self, opts: Vec<Opt>) -> Self {
        for opt in opts {
            opt(&mut self);
        }
        self
    }

    /// Resolves wildcard and accurate sources into `Source` descriptors
    /// (each tagged with its own origin, so the index stage can still tell
    /// them apart downstream), and validates the minimum viable
    /// configuration (at least one source, at least one target, targets
    /// must exist and be directories).
    pub fn resolve_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = self
            .wildcard_sources
            .iter()
            .map(Source::wildcard)
            .collect();
        sources.extend(
            self.accurate_sources
                .iter()
                .map(|(base, segs)| Source::accurate(base.clone(), segs.clone())),
        );

        if sources.is_empty() {
            return Err(OrbitError::NoSources);
        }
        Ok(sources)
    }

    pub fn validate_targets(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(OrbitError::Config("no target paths configured".into()));
        }
        for t in &self.targets {
            let meta = std::fs::metadata(t).map_err(|_| OrbitError::InvalidTarget(t.clone()))?;
            if !meta.is_dir() {
                return Err(OrbitError::InvalidTarget(t.clone()));
            }
        }
        Ok(())
    }

    /// Device-linear discipline is symmetric with the original: if either
    /// side is linear, both thread counts collapse to one so the whole
    /// pipeline moves at the linear device's pace.
    pub fn normalize_linear_discipline(&mut self) {
        if self.from_device.linear || self.to_device.linear {
            self.from_device.threads = 1;
            self.to_device.threads = 1;
        }
    }
}

pub type Opt = Box<dyn FnOnce(&mut EngineOptions)>;

pub fn wildcard_source(paths: Vec<PathBuf>) -> Opt {
    Box::new(move |o| o.wildcard_sources.extend(paths))
}

pub fn accurate_source(base: PathBuf, segments: Vec<Vec<String>>) -> Opt {
    Box::new(move |o| {
        for seg in segments {
            o.accurate_sources.push((base.clone(), seg));
        }
    })
}

pub fn target(paths: Vec<PathBuf>) -> Opt {
    Box::new(move |o| o.targets.extend(paths))
}

pub fn overwrite(b: bool) -> Opt {
    Box::new(move |o| o.overwrite = b)
}

pub fn with_hash(b: bool) -> Opt {
    Box::new(move |o| o.with_hash = b)
}

pub fn set_from_device(linear: bool, threads: Option<usize>) -> Opt {
    Box::new(move |o| {
        o.from_device.linear = linear;
        if let Some(t) = threads {
            o.from_device.threads = t;
        }
    })
}

pub fn set_to_device(linear: bool, threads: Option<usize>) -> Opt {
    Box::new(move |o| {
        o.to_device.linear = linear;
        if let Some(t) = threads {
            o.to_device.threads = t;
        }
    })
}

pub fn event_handler(h: EventHandler) -> Opt {
    Box::new(move |o| o.event_handlers.push(h))
}

/// Layered, on-disk defaults: `orbit.toml` in the current directory,
/// falling back to `~/.orbit/orbit.toml`. Entirely optional; any field the
/// file omits keeps the engine's built-in default.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub overwrite: Option<bool>,
    #[serde(default)]
    pub with_hash: Option<bool>,
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub from_linear: Option<bool>,
    #[serde(default)]
    pub to_linear: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| OrbitError::Config(format!("parse {}: {}", path.display(), e)))
    }

    /// Tries `./orbit.toml`, then `~/.orbit/orbit.toml`, then built-in
    /// defaults if neither exists.
    pub fn load_with_fallback() -> Self {
        let cwd = PathBuf::from("orbit.toml");
        if cwd.is_file() {
            if let Ok(cfg) = Self::load(&cwd) {
                return cfg;
            }
        }

        if let Some(home) = dirs::home_dir() {
            let candidate = home.join(".orbit").join("orbit.toml");
            if candidate.is_file() {
                if let Ok(cfg) = Self::load(&candidate) {
                    return cfg;
                }
            }
        }

        ConfigFile::default()
    }

    /// Applies any fields the file sets as defaults the CLI/builder can
    /// still override afterward.
    pub fn apply_to(&self, opts: &mut EngineOptions) {
        if let Some(v) = self.overwrite {
            opts.overwrite = v;
        }
        if let Some(v) = self.with_hash {
            opts.with_hash = v;
        }
        if let Some(v) = self.threads {
            opts.from_device.threads = v;
            opts.to_device.threads = v;
        }
        if let Some(v) = self.from_linear {
            opts.from_device.linear = v;
        }
        if let Some(v) = self.to_linear {
            opts.to_device.linear = v;
        }
    }
}
