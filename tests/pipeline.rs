//! Black-box, end-to-end tests against the public `Engine` API: full
//! pipeline runs over real directory trees, covering the concrete
//! scenarios and cross-cutting invariants a single module's unit tests
//! can't exercise on their own.

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use assert_fs::prelude::*;
use predicates::prelude::*;
use sha2::{Digest, Sha256};

use orbit::config::{event_handler, overwrite, set_from_device, target, wildcard_source, with_hash};
use orbit::{Engine, EngineOptions, Event, ReportCollector};

fn run(opts: EngineOptions) {
    Engine::start(opts).expect("engine should start").wait();
}

#[test]
fn completeness_and_mtime_are_preserved_across_two_destinations() {
    let src = assert_fs::TempDir::new().unwrap();
    src.child("x/y.bin").write_binary(&vec![7u8; 64 * 1024]).unwrap();
    let stale_mtime = SystemTime::now() - Duration::from_secs(3 * 86_400);
    filetime::set_file_mtime(
        src.child("x/y.bin").path(),
        filetime::FileTime::from_system_time(stale_mtime),
    )
    .unwrap();

    let d1 = assert_fs::TempDir::new().unwrap();
    let d2 = assert_fs::TempDir::new().unwrap();

    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![src.path().to_path_buf()]),
        target(vec![d1.path().to_path_buf(), d2.path().to_path_buf()]),
        overwrite(true),
    ]);
    run(opts);

    let rel = src.path().file_name().unwrap().to_string_lossy().into_owned();
    let p1 = d1.path().join(&rel).join("x/y.bin");
    let p2 = d2.path().join(&rel).join("x/y.bin");
    p1.assert(predicate::path::is_file());
    p2.assert(predicate::path::is_file());
    assert_eq!(fs::read(&p1).unwrap(), fs::read(&p2).unwrap());

    let got_mtime = fs::metadata(&p1).unwrap().modified().unwrap();
    let diff = got_mtime
        .duration_since(stale_mtime)
        .or_else(|_| stale_mtime.duration_since(got_mtime))
        .unwrap();
    assert!(diff < Duration::from_secs(2), "mtime not preserved: diff={diff:?}");
}

#[test]
fn hash_matches_independently_computed_sha256() {
    let src = assert_fs::TempDir::new().unwrap();
    let content = b"abc";
    src.child("a.txt").write_binary(content).unwrap();
    let dst = assert_fs::TempDir::new().unwrap();

    let collector = ReportCollector::new();
    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![src.child("a.txt").path().to_path_buf()]),
        target(vec![dst.path().to_path_buf()]),
        overwrite(true),
        with_hash(true),
        event_handler(collector.handler()),
    ]);
    run(opts);

    let mut hasher = Sha256::new();
    hasher.update(content);
    let want = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();

    let report = collector.report();
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].sha256.as_deref(), Some(want.as_str()));
}

#[test]
fn empty_source_file_produces_empty_destination_with_hash_of_empty_string() {
    let src = assert_fs::TempDir::new().unwrap();
    src.child("empty.txt").write_binary(b"").unwrap();
    let dst = assert_fs::TempDir::new().unwrap();

    let collector = ReportCollector::new();
    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![src.child("empty.txt").path().to_path_buf()]),
        target(vec![dst.path().to_path_buf()]),
        overwrite(true),
        with_hash(true),
        event_handler(collector.handler()),
    ]);
    run(opts);

    let out = dst.path().join("empty.txt");
    out.assert(predicate::path::is_file());
    assert_eq!(fs::metadata(&out).unwrap().len(), 0);

    let report = collector.report();
    assert_eq!(
        report.files[0].sha256.as_deref(),
        Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
    );
}

#[test]
fn wildcard_sources_colliding_on_relative_path_keep_only_the_first() {
    let root = assert_fs::TempDir::new().unwrap();
    let s1 = root.child("a/x");
    let s2 = root.child("b/x");
    s1.child("f.txt").write_binary(b"first").unwrap();
    s2.child("f.txt").write_binary(b"second").unwrap();
    let dst = assert_fs::TempDir::new().unwrap();

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errs = errors.clone();

    // Both wildcard sources share the last path segment ("x"), so they
    // collide on the relative path "x/f.txt" despite different bases.
    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![s1.path().to_path_buf(), s2.path().to_path_buf()]),
        target(vec![dst.path().to_path_buf()]),
        overwrite(true),
        event_handler(Box::new(move |e| {
            if let Event::ErrorReported { error, .. } = e {
                errs.lock().unwrap().push(error);
            }
        })),
    ]);
    run(opts);

    let out = dst.path().join("x/f.txt");
    assert_eq!(fs::read(&out).unwrap(), b"first");
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.contains("already-indexed")));
}

#[test]
fn accurate_sources_colliding_on_relative_path_are_both_kept() {
    let s1 = assert_fs::TempDir::new().unwrap();
    let s2 = assert_fs::TempDir::new().unwrap();
    s1.child("a.txt").write_binary(b"first").unwrap();
    s2.child("a.txt").write_binary(b"second").unwrap();
    let dst = assert_fs::TempDir::new().unwrap();

    // Accurate-origin sources bypass index-stage dedup entirely, even when
    // they share the exact same relative path; forcing a single worker on
    // each side keeps the two writes to the shared destination ordered
    // rather than racing.
    let collector = ReportCollector::new();
    let opts = EngineOptions::default().apply(vec![
        orbit::config::accurate_source(s1.path().to_path_buf(), vec![vec!["a.txt".into()]]),
        orbit::config::accurate_source(s2.path().to_path_buf(), vec![vec!["a.txt".into()]]),
        target(vec![dst.path().to_path_buf()]),
        overwrite(true),
        set_from_device(false, Some(1)),
        orbit::config::set_to_device(false, Some(1)),
        event_handler(collector.handler()),
    ]);
    run(opts);

    // Neither source was dropped as a duplicate: both copies ran, the
    // second landing last since both write to the same destination path.
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"second");
}

#[test]
fn no_overwrite_existing_file_fails_only_that_target() {
    let src = assert_fs::TempDir::new().unwrap();
    src.child("a.txt").write_binary(b"fresh").unwrap();

    let d1 = assert_fs::TempDir::new().unwrap();
    let d2 = assert_fs::TempDir::new().unwrap();
    d1.child("a.txt").write_binary(b"stale").unwrap();

    let collector = ReportCollector::new();
    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![src.child("a.txt").path().to_path_buf()]),
        target(vec![d1.path().to_path_buf(), d2.path().to_path_buf()]),
        overwrite(false),
        event_handler(collector.handler()),
    ]);
    run(opts);

    // d1's pre-existing file is untouched; d2 received the fresh copy.
    assert_eq!(fs::read(d1.child("a.txt").path()).unwrap(), b"stale");
    assert_eq!(fs::read(d2.path().join("a.txt")).unwrap(), b"fresh");

    let report = collector.report();
    assert_eq!(report.files.len(), 1);
    let snap = &report.files[0];
    assert_eq!(snap.success_target.len(), 1);
    assert_eq!(snap.fail_target.len(), 1);
}

#[test]
fn target_independence_broken_destination_does_not_affect_sibling() {
    let src = assert_fs::TempDir::new().unwrap();
    src.child("sub/a.txt").write_binary(b"payload").unwrap();
    let rel = src.path().file_name().unwrap().to_string_lossy().into_owned();

    // d1 is a valid top-level directory (so it passes the engine's
    // startup validation), but the nested subdirectory the job needs to
    // create under it is blocked by a same-named plain file; mkdir -p
    // fails regardless of process privileges (unlike a permission-bit
    // test, which root bypasses), giving a portable per-target failure
    // that isn't device-terminal.
    let d1 = assert_fs::TempDir::new().unwrap();
    fs::create_dir_all(d1.path().join(&rel)).unwrap();
    fs::write(d1.path().join(&rel).join("sub"), b"blocker").unwrap();
    let d2 = assert_fs::TempDir::new().unwrap();

    let collector = ReportCollector::new();
    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![src.path().to_path_buf()]),
        target(vec![d1.path().to_path_buf(), d2.path().to_path_buf()]),
        overwrite(true),
        event_handler(collector.handler()),
    ]);
    run(opts);

    assert_eq!(
        fs::read(d2.path().join(&rel).join("sub/a.txt")).unwrap(),
        b"payload"
    );
    let report = collector.report();
    assert_eq!(report.files[0].success_target.len(), 1);
    assert_eq!(report.files[0].fail_target.len(), 1);
}

#[test]
fn linear_mode_round_trips_a_small_tree() {
    let src = assert_fs::TempDir::new().unwrap();
    src.child("a.txt").write_binary(b"one").unwrap();
    src.child("b.txt").write_binary(b"two").unwrap();
    let dst = assert_fs::TempDir::new().unwrap();

    let opts = EngineOptions::default().apply(vec![
        wildcard_source(vec![src.child("a.txt").path().to_path_buf(), src.child("b.txt").path().to_path_buf()]),
        target(vec![dst.path().to_path_buf()]),
        overwrite(true),
        set_from_device(true, None),
    ]);
    run(opts);

    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"one");
    assert_eq!(fs::read(dst.path().join("b.txt")).unwrap(), b"two");
}
