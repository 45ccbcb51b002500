//! Prepare stage: opens the source reader for each job — memory-mapped by
//! default, plain sequential I/O for linear (tape-like) source devices —
//! and hands a `WriteJob` to the copy stage.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};

use crate::cancel::CancelToken;
use crate::config::DeviceConfig;
use crate::event::{Event, EventBus};
use crate::job::{Job, JobStatus, WriteJob};
use crate::reader;

/// Spawns `from_device.threads` worker threads (forced to 1 when
/// `from_device.linear`) pulling from `indexed` and pushing opened
/// write-jobs to the returned receiver. Queue capacity is 32, or 0 (a pure
/// rendezvous) when the source device is linear, since nothing should be
/// opened ahead of the copy stage consuming the previous one.
pub fn spawn_prepare(
    indexed: Receiver<Arc<Job>>,
    from_device: DeviceConfig,
    bus: EventBus,
    cancel: CancelToken,
) -> Receiver<WriteJob> {
    let chan_len = if from_device.linear { 0 } else { 32 };
    let (tx, rx) = bounded(chan_len);

    let threads = if from_device.linear {
        1
    } else {
        from_device.threads.max(1)
    };
    let linear = from_device.linear;

    for idx in 0..threads {
        let indexed = indexed.clone();
        let tx = tx.clone();
        let bus = bus.clone();
        let cancel = cancel.clone();
        crate::supervisor::spawn_supervised(&format!("prepare-{idx}"), move || {
            prepare_worker(indexed, tx, bus, linear, cancel)
        });
    }
    drop(tx);

    rx
}

fn prepare_worker(
    indexed: Receiver<Arc<Job>>,
    tx: crossbeam_channel::Sender<WriteJob>,
    bus: EventBus,
    linear: bool,
    cancel: CancelToken,
) {
    for job in indexed.iter() {
        if cancel.is_cancelled() {
            return;
        }
        job.set_status(JobStatus::Preparing);
        bus.submit(Event::JobUpdated {
            job: Arc::new(job.snapshot()),
        });

        let path = job.source.src_path();
        let reader = match reader::open(&path, linear) {
            Ok(r) => r,
            Err(err) => {
                bus.submit(Event::ErrorReported {
                    src: path.display().to_string(),
                    dst: String::new(),
                    error: format!("open src file fail, {}", err),
                });
                continue;
            }
        };

        if linear {
            let (done_tx, done_rx) = bounded::<()>(1);
            let write_job = WriteJob {
                job: job.clone(),
                reader,
                done_tx: Some(done_tx),
            };
            if tx.send(write_job).is_err() {
                return;
            }
            // Serializes the source device: don't open the next job's
            // reader until the copy stage is done with this one's.
            let _ = done_rx.recv();
        } else {
            let write_job = WriteJob {
                job: job.clone(),
                reader,
                done_tx: None,
            };
            if tx.send(write_job).is_err() {
                return;
            }
        }
    }
}
