//! Copy stage: the fan-out core. Reads each job's source once and
//! broadcasts the same batches to every destination writer (plus an
//! optional hasher) over bounded per-consumer channels, so the slowest
//! consumer gates the reader without the others blocking on it.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::config::{DeviceConfig, WRITER_CHANNEL_CAPACITY};
use crate::disk_usage::{DiskUsageCache, MountResolver};
use crate::error::OrbitError;
use crate::event::{Event, EventBus};
use crate::job::{Job, JobStatus, WriteJob};

/// Shared state for the whole copy stage: the bad-device set, one
/// disk-usage cache per device, the mount resolver, and running counters
/// for the progress ticker.
pub struct CopyContext {
    pub to_device: DeviceConfig,
    pub overwrite: bool,
    pub with_hash: bool,
    pub batch_size: usize,
    pub refresh_interval: u64,
    mount_resolver: MountResolver,
    disk_caches: Mutex<HashMap<PathBuf, Arc<DiskUsageCache>>>,
    bad_devices: Mutex<HashSet<PathBuf>>,
    copied_bytes: AtomicU64,
    in_flight_files: AtomicI64,
    total_files: AtomicUsize,
}

impl CopyContext {
    pub fn new(to_device: DeviceConfig, overwrite: bool, with_hash: bool, batch_size: usize, refresh_interval: u64) -> Self {
        CopyContext {
            to_device,
            overwrite,
            with_hash,
            batch_size,
            refresh_interval,
            mount_resolver: MountResolver::new(),
            disk_caches: Mutex::new(HashMap::new()),
            bad_devices: Mutex::new(HashSet::new()),
            copied_bytes: AtomicU64::new(0),
            in_flight_files: AtomicI64::new(0),
            total_files: AtomicUsize::new(0),
        }
    }

    fn device_for(&self, path: &Path) -> PathBuf {
        self.mount_resolver.resolve(path)
    }

    fn cache_for(&self, device: &Path) -> Arc<DiskUsageCache> {
        let mut caches = self.disk_caches.lock().unwrap();
        caches
            .entry(device.to_path_buf())
            .or_insert_with(|| {
                Arc::new(DiskUsageCache::with_refresh_interval(
                    device.to_path_buf(),
                    self.refresh_interval,
                ))
            })
            .clone()
    }

    fn is_bad(&self, device: &Path) -> bool {
        self.bad_devices.lock().unwrap().contains(device)
    }

    fn mark_bad(&self, device: &Path) {
        self.bad_devices.lock().unwrap().insert(device.to_path_buf());
    }
}

/// Spawns the copy stage's worker pool plus a progress ticker, and returns
/// the receiver the cleanup stage drains.
pub fn spawn_copy(
    prepared: Receiver<WriteJob>,
    ctx: Arc<CopyContext>,
    bus: EventBus,
    cancel: CancelToken,
) -> Receiver<Arc<Job>> {
    let threads = if ctx.to_device.linear {
        1
    } else {
        ctx.to_device.threads.max(1)
    };

    let (tx, rx) = bounded::<Arc<Job>>(threads.max(1));

    let ticker_ctx = ctx.clone();
    let ticker_bus = bus.clone();
    let active = Arc::new(AtomicUsize::new(threads));
    let ticker_active = active.clone();
    crate::supervisor::spawn_supervised("copy-progress", move || {
        loop {
            std::thread::sleep(Duration::from_secs(1));
            let finished = ticker_active.load(Ordering::Acquire) == 0;
            ticker_bus.submit(Event::ProgressUpdated {
                bytes: ticker_ctx.copied_bytes.load(Ordering::Relaxed),
                files: ticker_ctx.total_files.load(Ordering::Relaxed) as u64,
                finished,
            });
            if finished {
                return;
            }
        }
    });

    for idx in 0..threads {
        let prepared = prepared.clone();
        let tx = tx.clone();
        let ctx = ctx.clone();
        let bus = bus.clone();
        let active = active.clone();
        let cancel = cancel.clone();
        crate::supervisor::spawn_supervised(&format!("copy-{idx}"), move || {
            for write_job in prepared.iter() {
                if cancel.is_cancelled() {
                    break;
                }
                process_write_job(write_job, ctx.clone(), &tx, &bus, &cancel);
            }
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
    drop(tx);

    rx
}

fn process_write_job(
    write_job: WriteJob,
    ctx: Arc<CopyContext>,
    cleanup_tx: &Sender<Arc<Job>>,
    bus: &EventBus,
    cancel: &CancelToken,
) {
    let WriteJob { job, mut reader, done_tx } = write_job;

    job.set_status(JobStatus::Copying);
    bus.submit(Event::JobUpdated {
        job: Arc::new(job.snapshot()),
    });
    ctx.in_flight_files.fetch_add(1, Ordering::Relaxed);
    ctx.total_files.fetch_add(1, Ordering::Relaxed);

    let devices: Vec<PathBuf> = job.targets.iter().map(|t| ctx.device_for(t)).collect();
    let all_bad = !devices.is_empty() && devices.iter().all(|d| ctx.is_bad(d));

    if all_bad {
        for target in &job.targets {
            job.mark_failed(target.clone(), "bad target path, device marked no-space/read-only");
            bus.submit(Event::ErrorReported {
                src: job.source.src_path().display().to_string(),
                dst: target.display().to_string(),
                error: "bad target path, device marked no-space/read-only".to_string(),
            });
        }
        finish_job(job, cleanup_tx, bus, done_tx);
        return;
    }

    let mut channels: Vec<Sender<Arc<[u8]>>> = Vec::with_capacity(job.targets.len() + 1);
    let mut writer_joins = Vec::with_capacity(job.targets.len());
    let read_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    for target in job.targets.clone() {
        let device = ctx.device_for(&target);
        if ctx.is_bad(&device) {
            job.mark_failed(target.clone(), "bad target path, device marked no-space/read-only");
            report(bus, &job, &target, "bad target path, device marked no-space/read-only");
            continue;
        }

        if let Err(err) = ctx.cache_for(&device).check(job.size) {
            if err.marks_device_bad() {
                ctx.mark_bad(&device);
            }
            job.mark_failed(target.clone(), err.to_string());
            report(bus, &job, &target, &err.to_string());
            continue;
        }

        if let Some(parent) = target.parent() {
            if let Err(io_err) = std::fs::create_dir_all(parent) {
                let err = OrbitError::classify_target_io(io_err);
                if err.marks_device_bad() {
                    ctx.mark_bad(&device);
                }
                job.mark_failed(target.clone(), format!("mkdir fail, {}", err));
                report(bus, &job, &target, &format!("mkdir fail, {}", err));
                continue;
            }
        }

        let open_result = open_target(&target, ctx.overwrite, job.mode);
        let file = match open_result {
            Ok(f) => f,
            Err(io_err) => {
                let err = OrbitError::classify_target_io(io_err);
                if err.marks_device_bad() {
                    ctx.mark_bad(&device);
                }
                job.mark_failed(target.clone(), format!("open dst file fail, {}", err));
                report(bus, &job, &target, &format!("open dst file fail, {}", err));
                continue;
            }
        };

        let (wtx, wrx) = bounded::<Arc<[u8]>>(WRITER_CHANNEL_CAPACITY);
        channels.push(wtx);

        let job2 = job.clone();
        let bus2 = bus.clone();
        let ctx2 = ctx.clone();
        let device2 = device.clone();
        let target2 = target.clone();
        let read_error2 = read_error.clone();
        writer_joins.push(crate::supervisor::spawn_supervised("copy-writer", move || {
            writer_task(wrx, file, target2, job2, bus2, read_error2, ctx2, device2);
        }));
    }

    let hasher_join = if ctx.with_hash && !channels.is_empty() {
        let (htx, hrx) = bounded::<Arc<[u8]>>(WRITER_CHANNEL_CAPACITY);
        channels.push(htx);
        let job2 = job.clone();
        Some(crate::supervisor::spawn_supervised("copy-hasher", move || {
            hasher_task(hrx, job2);
        }))
    } else {
        None
    };

    if channels.is_empty() {
        finish_job(job, cleanup_tx, bus, done_tx);
        return;
    }

    loop {
        if cancel.is_cancelled() {
            *read_error.lock().unwrap() = Some("copy cancelled".to_string());
            break;
        }
        match reader.next_batch(ctx.batch_size) {
            Ok(Some(buf)) => {
                for ch in &channels {
                    let _ = ch.send(buf.clone());
                }
                ctx.copied_bytes.fetch_add(buf.len() as u64, Ordering::Relaxed);
            }
            Ok(None) => break,
            Err(err) => {
                *read_error.lock().unwrap() = Some(err.to_string());
                break;
            }
        }
    }

    channels.clear(); // drop all senders, closing every channel
    for join in writer_joins {
        let _ = join.join();
    }
    if let Some(join) = hasher_join {
        let _ = join.join();
    }

    ctx.in_flight_files.fetch_sub(1, Ordering::Relaxed);
    finish_job(job, cleanup_tx, bus, done_tx);
}

fn finish_job(
    job: Arc<Job>,
    cleanup_tx: &Sender<Arc<Job>>,
    bus: &EventBus,
    done_tx: Option<Sender<()>>,
) {
    job.set_status(JobStatus::Finishing);
    bus.submit(Event::JobUpdated {
        job: Arc::new(job.snapshot()),
    });
    if let Some(tx) = done_tx {
        let _ = tx.send(());
    }
    let _ = cleanup_tx.send(job);
}

fn report(bus: &EventBus, job: &Job, target: &Path, message: &str) {
    bus.submit(Event::ErrorReported {
        src: job.source.src_path().display().to_string(),
        dst: target.display().to_string(),
        error: message.to_string(),
    });
}

fn open_target(target: &Path, overwrite: bool, mode: u32) -> std::io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if overwrite {
        opts.truncate(true);
    } else {
        opts.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    opts.open(target)
}

fn writer_task(
    rx: Receiver<Arc<[u8]>>,
    mut file: File,
    target: PathBuf,
    job: Arc<Job>,
    bus: EventBus,
    read_error: Arc<Mutex<Option<String>>>,
    ctx: Arc<CopyContext>,
    device: PathBuf,
) {
    let mut write_err: Option<std::io::Error> = None;
    for buf in rx.iter() {
        if write_err.is_some() {
            continue; // drain remaining buffers without writing further
        }
        if let Err(e) = file.write_all(&buf) {
            write_err = Some(e);
        }
    }

    if let Some(io_err) = write_err {
        let _ = std::fs::remove_file(&target);
        let err = OrbitError::classify_target_io(io_err);
        if err.marks_device_bad() {
            ctx.mark_bad(&device);
        }
        job.mark_failed(target.clone(), err.to_string());
        report(&bus, &job, &target, &err.to_string());
        return;
    }

    if let Some(msg) = read_error.lock().unwrap().clone() {
        let _ = std::fs::remove_file(&target);
        job.mark_failed(target.clone(), msg.clone());
        report(&bus, &job, &target, &msg);
        return;
    }

    job.mark_success(target);
}

fn hasher_task(rx: Receiver<Arc<[u8]>>, job: Arc<Job>) {
    let mut hasher = Sha256::new();
    for buf in rx.iter() {
        hasher.update(&buf);
    }
    let digest = hasher.finalize();
    job.set_hash(digest.to_vec());
}
