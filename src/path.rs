//! Source descriptors: (base, relative segments) pairs and the path
//! comparison used to sort and deduplicate jobs.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// How a `Source` was constructed. Wildcard-origin sources participate in
/// index-stage dedup against every other source; accurate-origin sources
/// are appended without deduplication (they carry an externally-chosen
/// relative layout the caller has already vetted, e.g. a resumed run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Wildcard,
    Accurate,
}

/// A source file or directory, expressed as an absolute `base` plus an
/// ordered sequence of path components relative to it.
///
/// The on-disk source path is `base/join(segments)`; the destination path
/// under a destination root `D` is `D/join(segments)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    base: PathBuf,
    segments: Vec<String>,
    origin: Origin,
}

impl Source {
    /// Wildcard construction: splits a full path `P` into `(base, last
    /// segment)` so the last segment becomes the first relative component.
    /// This preserves the source's top-level name under each destination.
    pub fn wildcard(path: impl AsRef<Path>) -> Self {
        let cleaned = clean(path.as_ref());
        let name = cleaned
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = cleaned
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));

        Source {
            base,
            segments: vec![name],
            origin: Origin::Wildcard,
        }
    }

    /// Accurate construction: caller supplies the base and an explicit
    /// segment vector, bypassing wildcard splitting. Used when restoring a
    /// prior run or copying with an externally-chosen relative layout.
    /// Jobs descending from an accurate source skip index-stage dedup.
    pub fn accurate(base: impl Into<PathBuf>, segments: Vec<String>) -> Self {
        Source {
            base: base.into(),
            segments,
            origin: Origin::Accurate,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_accurate(&self) -> bool {
        self.origin == Origin::Accurate
    }

    /// A new descriptor over the same base and origin but a replaced
    /// segment vector. Used by the index walk to build one descriptor per
    /// discovered file while keeping the root source's dedup eligibility.
    pub fn with_segments(&self, segments: Vec<String>) -> Self {
        Source {
            base: self.base.clone(),
            segments,
            origin: self.origin,
        }
    }

    /// Absolute on-disk path of this source.
    pub fn src_path(&self) -> PathBuf {
        let mut p = self.base.clone();
        for seg in &self.segments {
            p.push(seg);
        }
        p
    }

    /// Absolute path under a destination root.
    pub fn dst_path(&self, dst_root: &Path) -> PathBuf {
        let mut p = dst_root.to_path_buf();
        for seg in &self.segments {
            p.push(seg);
        }
        p
    }

    /// A new descriptor with one additional trailing segment.
    pub fn append(&self, next: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(next.into());
        Source {
            base: self.base.clone(),
            segments,
            origin: self.origin,
        }
    }

    /// Relative path joined with `/`, used as the dedup/sort key.
    pub fn relative_path(&self) -> String {
        self.segments.join("/")
    }
}

/// Lexicographic segment-by-segment comparison. A sequence that is a
/// strict prefix of another sorts first. Groups siblings together and
/// gives a deterministic total order used to sort jobs and detect
/// duplicate relative paths across source roots.
pub fn compare_segments(a: &[String], b: &[String]) -> Ordering {
    let len = a.len().min(b.len());
    for i in 0..len {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn clean(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}
