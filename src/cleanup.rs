//! Cleanup stage: the last leg of the pipeline. Restores each successful
//! target's mtime to match the source, then marks the job finished.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use filetime::FileTime;

use crate::cancel::CancelToken;
use crate::event::{Event, EventBus};
use crate::job::{Job, JobStatus};

/// Drains `copied` one job at a time, applying `filetime` to every
/// successful target before advancing the job to `Finished`. Jobs already
/// in the channel are always finished out even after cancellation, since
/// their bytes are already on disk; cancellation only stops pulling in new
/// ones once upstream stages have stopped producing them.
pub fn spawn_cleanup(
    copied: Receiver<Arc<Job>>,
    bus: EventBus,
    cancel: CancelToken,
) -> std::thread::JoinHandle<()> {
    crate::supervisor::spawn_supervised("cleanup", move || {
        let _ = &cancel; // jobs already queued here are always finished out
        for job in copied.iter() {
            let mtime = FileTime::from_system_time(job.mod_time);
            for target in job.successful_targets() {
                if let Err(err) = filetime::set_file_times(&target, mtime, mtime) {
                    bus.submit(Event::ErrorReported {
                        src: job.source.src_path().display().to_string(),
                        dst: target.display().to_string(),
                        error: format!("change info, chtimes fail, {}", err),
                    });
                }
            }

            job.set_status(JobStatus::Finished);
            bus.submit(Event::JobUpdated {
                job: Arc::new(job.snapshot()),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Source;
    use crossbeam_channel::bounded;
    use std::fs;
    use std::time::{Duration, SystemTime};

    #[test]
    fn applies_mod_time_to_successful_targets_and_marks_finished() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        fs::write(&target, b"hello").unwrap();

        let mod_time = SystemTime::now() - Duration::from_secs(86_400);
        let job = Arc::new(Job::new(
            Source::accurate(dir.path(), vec!["out.txt".into()]),
            5,
            0o644,
            mod_time,
            vec![target.clone()],
        ));
        job.mark_success(target.clone());

        let (tx, rx) = bounded(1);
        tx.send(job.clone()).unwrap();
        drop(tx);

        let (bus, fanout) = EventBus::noop();
        let handle = spawn_cleanup(rx, bus.clone(), CancelToken::new());
        handle.join().unwrap();
        drop(bus);
        fanout.join().unwrap();

        assert_eq!(job.status(), JobStatus::Finished);
        let meta = fs::metadata(&target).unwrap();
        let got = meta.modified().unwrap();
        let diff = got
            .duration_since(mod_time)
            .or_else(|_| mod_time.duration_since(got))
            .unwrap();
        assert!(diff < Duration::from_secs(2));
    }

    #[test]
    fn failed_target_without_chtimes_still_finishes_job() {
        let dir = tempfile::tempdir().unwrap();
        let job = Arc::new(Job::new(
            Source::accurate(dir.path(), vec!["missing.txt".into()]),
            0,
            0o644,
            SystemTime::now(),
            vec![dir.path().join("missing.txt")],
        ));
        // No successful targets recorded; chtimes is never attempted.

        let (tx, rx) = bounded(1);
        tx.send(job.clone()).unwrap();
        drop(tx);

        let (bus, fanout) = EventBus::noop();
        let handle = spawn_cleanup(rx, bus.clone(), CancelToken::new());
        handle.join().unwrap();
        drop(bus);
        fanout.join().unwrap();

        assert_eq!(job.status(), JobStatus::Finished);
    }
}
