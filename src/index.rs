//! Index stage: walks every source tree with `stat` semantics (following
//! symlinks for classification), emits one job per regular file, sorts and
//! deduplicates by relative path, and feeds the result into a bounded
//! queue for the prepare stage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::config::INDEX_QUEUE_CAPACITY;
use crate::event::{Event, EventBus};
use crate::job::Job;
use crate::path::{compare_segments, Source};

/// A candidate job before dedup/sort, paired with the relative-path key
/// dedup operates on.
struct Candidate {
    job: Job,
    relative_path: String,
}

/// Walks `sources` against `targets`, returning a bounded-capacity
/// (capacity 128) receiver of ready jobs fed in deterministic order.
/// Errors encountered while walking are reported through `bus` and do not
/// stop the overall traversal.
pub fn spawn_index(
    sources: Vec<Source>,
    targets: Vec<PathBuf>,
    bus: EventBus,
    cancel: CancelToken,
) -> Receiver<Arc<Job>> {
    let (tx, rx) = bounded(INDEX_QUEUE_CAPACITY);

    crate::supervisor::spawn_supervised("index", move || {
        let total_bytes = AtomicU64::new(0);
        let total_files = AtomicU64::new(0);
        let mut last_tick = Instant::now();

        let mut candidates: Vec<Candidate> = Vec::new();
        for source in &sources {
            if cancel.is_cancelled() {
                return;
            }
            walk_one(
                source,
                &mut candidates,
                &bus,
                &total_bytes,
                &total_files,
                &mut last_tick,
                &cancel,
            );
        }

        bus.submit(Event::CountUpdated {
            bytes: total_bytes.load(Ordering::Relaxed),
            files: total_files.load(Ordering::Relaxed),
            finished: true,
        });

        for job in dedup_and_sort(candidates, &bus) {
            if cancel.is_cancelled() {
                return;
            }
            let job = build_job(job, &targets);
            if tx.send(Arc::new(job)).is_err() {
                break;
            }
        }
    });

    rx
}

fn walk_one(
    source: &Source,
    candidates: &mut Vec<Candidate>,
    bus: &EventBus,
    total_bytes: &AtomicU64,
    total_files: &AtomicU64,
    last_tick: &mut Instant,
    cancel: &CancelToken,
) {
    let root = source.src_path();

    for entry in WalkDir::new(&root).follow_links(true) {
        if cancel.is_cancelled() {
            return;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                bus.submit(Event::ErrorReported {
                    src: path,
                    dst: String::new(),
                    error: format!("walk get stat, {}", err),
                });
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            bus.submit(Event::ErrorReported {
                src: entry.path().display().to_string(),
                dst: String::new(),
                error: "unexpected file type, skipped".to_string(),
            });
            continue;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                bus.submit(Event::ErrorReported {
                    src: entry.path().display().to_string(),
                    dst: String::new(),
                    error: format!("walk get stat, {}", err),
                });
                continue;
            }
        };

        let rel = entry
            .path()
            .strip_prefix(&root)
            .unwrap_or_else(|_| entry.path());
        let mut segments = source.segments().to_vec();
        segments.extend(rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()));

        let full_source = source.with_segments(segments);
        let relative_path = full_source.relative_path();

        let size = meta.len();
        total_bytes.fetch_add(size, Ordering::Relaxed);
        let files_so_far = total_files.fetch_add(1, Ordering::Relaxed) + 1;

        if last_tick.elapsed() >= Duration::from_secs(1) {
            bus.submit(Event::CountUpdated {
                bytes: total_bytes.load(Ordering::Relaxed),
                files: files_so_far,
                finished: false,
            });
            *last_tick = Instant::now();
        }

        let mode = file_mode(&meta);
        let mod_time = meta.modified().unwrap_or(std::time::UNIX_EPOCH);

        candidates.push(Candidate {
            job: Job::new(full_source, size, mode, mod_time, Vec::new()),
            relative_path,
        });
    }
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    0o644
}

/// Sorts wildcard-origin candidates by relative path and drops every
/// duplicate past the first, reporting an error for each one dropped.
/// Accurate-origin candidates bypass this entirely and are appended
/// afterward in their original order, per their externally-chosen layout.
fn dedup_and_sort(candidates: Vec<Candidate>, bus: &EventBus) -> Vec<Job> {
    let (accurate, mut wildcard): (Vec<Candidate>, Vec<Candidate>) =
        candidates.into_iter().partition(|c| c.job.source.is_accurate());

    wildcard.sort_by(|a, b| {
        compare_segments(a.job.source.segments(), b.job.source.segments())
    });

    let mut out = Vec::with_capacity(wildcard.len() + accurate.len());
    let mut last_path: Option<String> = None;
    for candidate in wildcard {
        if last_path.as_deref() == Some(candidate.relative_path.as_str()) {
            bus.submit(Event::ErrorReported {
                src: candidate.job.source.src_path().display().to_string(),
                dst: String::new(),
                error: format!(
                    "same relative path as already-indexed file, ignored, '{}'",
                    candidate.relative_path
                ),
            });
            continue;
        }
        last_path = Some(candidate.relative_path.clone());
        out.push(candidate.job);
    }

    out.extend(accurate.into_iter().map(|c| c.job));
    out
}

fn build_job(job: Job, targets: &[PathBuf]) -> Job {
    let dst_paths: Vec<PathBuf> = targets.iter().map(|t| job.source.dst_path(t)).collect();
    Job::new(job.source, job.size, job.mode, job.mod_time, dst_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn drain(rx: Receiver<Arc<Job>>) -> Vec<Arc<Job>> {
        rx.iter().collect()
    }

    #[test]
    fn indexes_single_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        fs::write(&src, b"abc").unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let (bus, fanout) = EventBus::noop();
        let rx = spawn_index(
            vec![Source::wildcard(&src)],
            vec![dst.clone()],
            bus.clone(),
            CancelToken::new(),
        );
        let jobs = drain(rx);
        drop(bus);
        fanout.join().unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].size, 3);
        assert_eq!(jobs[0].targets, vec![dst.join("a.txt")]);
    }

    #[test]
    fn indexes_directory_tree_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("x")).unwrap();
        fs::write(src.join("x/y.bin"), vec![1u8; 16]).unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let (bus, fanout) = EventBus::noop();
        let rx = spawn_index(
            vec![Source::wildcard(&src)],
            vec![dst.clone()],
            bus.clone(),
            CancelToken::new(),
        );
        let jobs = drain(rx);
        drop(bus);
        fanout.join().unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].targets, vec![dst.join("tree/x/y.bin")]);
    }

    #[test]
    fn wildcard_sources_colliding_on_relative_path_keep_only_first() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = dir.path().join("a/x");
        let s2 = dir.path().join("b/x");
        fs::create_dir_all(&s1).unwrap();
        fs::create_dir_all(&s2).unwrap();
        fs::write(s1.join("f.txt"), b"one").unwrap();
        fs::write(s2.join("f.txt"), b"two").unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        // Both wildcard sources have the same last path segment ("x"), so
        // they collide on the relative path "x/f.txt" despite having
        // different bases.
        let (bus, fanout) = EventBus::noop();
        let rx = spawn_index(
            vec![Source::wildcard(&s1), Source::wildcard(&s2)],
            vec![dst.clone()],
            bus.clone(),
            CancelToken::new(),
        );
        let jobs = drain(rx);
        drop(bus);
        fanout.join().unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(fs::read(&jobs[0].source.src_path()).unwrap(), b"one");
    }

    #[test]
    fn accurate_sources_colliding_on_relative_path_are_both_kept() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = dir.path().join("s1");
        let s2 = dir.path().join("s2");
        fs::create_dir_all(&s1).unwrap();
        fs::create_dir_all(&s2).unwrap();
        fs::write(s1.join("a.txt"), b"one").unwrap();
        fs::write(s2.join("a.txt"), b"two").unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        // Accurate-origin sources bypass dedup entirely, even when they
        // share the exact same relative path.
        let src_a = Source::accurate(s1.clone(), vec!["a.txt".into()]);
        let src_b = Source::accurate(s2.clone(), vec!["a.txt".into()]);

        let (bus, fanout) = EventBus::noop();
        let rx = spawn_index(
            vec![src_a, src_b],
            vec![dst.clone()],
            bus.clone(),
            CancelToken::new(),
        );
        let jobs = drain(rx);
        drop(bus);
        fanout.join().unwrap();

        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn missing_source_reports_error_and_yields_no_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let dst = dir.path().join("dst");
        fs::create_dir(&dst).unwrap();

        let (bus, fanout) = EventBus::noop();
        let rx = spawn_index(
            vec![Source::wildcard(&missing)],
            vec![dst],
            bus.clone(),
            CancelToken::new(),
        );
        let jobs = drain(rx);
        drop(bus);
        fanout.join().unwrap();

        assert!(jobs.is_empty());
    }
}
