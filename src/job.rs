//! The job model: one `Job` per regular file being copied, a per-job lock
//! guarding the mutable fields, and the immutable snapshot emitted on every
//! mutation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::path::Source;

/// Seconds since the epoch; the report has no use for sub-second precision
/// and this avoids pulling in a calendar/timezone crate for one field.
fn serialize_system_time<S: Serializer>(time: &SystemTime, ser: S) -> Result<S::Ok, S::Error> {
    let secs = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    ser.serialize_u64(secs)
}

fn serialize_opt_system_time<S: Serializer>(
    time: &Option<SystemTime>,
    ser: S,
) -> Result<S::Ok, S::Error> {
    match time {
        Some(t) => serialize_system_time(t, ser),
        None => ser.serialize_none(),
    }
}

/// Monotonic job status. Transitions only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Preparing,
    Copying,
    Finishing,
    Finished,
}

struct Mutable {
    status: JobStatus,
    write_start: Option<SystemTime>,
    successful: Vec<PathBuf>,
    failed: BTreeMap<PathBuf, String>,
    hash: Option<Vec<u8>>,
}

/// The central pipeline entity. Immutable fields are set at construction;
/// everything that can change after that lives behind `inner` and is only
/// ever mutated by calling one of the `Job` methods, each of which emits a
/// snapshot through the supplied event sink.
pub struct Job {
    pub source: Source,
    pub size: u64,
    pub mode: u32,
    pub mod_time: SystemTime,
    pub targets: Vec<PathBuf>,
    inner: Mutex<Mutable>,
}

impl Job {
    pub fn new(source: Source, size: u64, mode: u32, mod_time: SystemTime, targets: Vec<PathBuf>) -> Self {
        Job {
            source,
            size,
            mode,
            mod_time,
            targets,
            inner: Mutex::new(Mutable {
                status: JobStatus::Pending,
                write_start: None,
                successful: Vec::new(),
                failed: BTreeMap::new(),
                hash: None,
            }),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().unwrap().status
    }

    /// Advances status. Panics if the caller attempts to go backwards,
    /// since the invariant is enforced at the call sites that own stage
    /// transitions.
    pub fn set_status(&self, status: JobStatus) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(status >= inner.status, "job status must only advance");
        inner.status = status;
        if status == JobStatus::Copying && inner.write_start.is_none() {
            inner.write_start = Some(SystemTime::now());
        }
    }

    pub fn mark_success(&self, target: PathBuf) {
        let mut inner = self.inner.lock().unwrap();
        inner.successful.push(target);
    }

    pub fn mark_failed(&self, target: PathBuf, error: impl ToString) {
        let mut inner = self.inner.lock().unwrap();
        inner.failed.insert(target, error.to_string());
    }

    pub fn set_hash(&self, hash: Vec<u8>) {
        self.inner.lock().unwrap().hash = Some(hash);
    }

    /// All configured targets not yet recorded as successful or failed.
    pub fn pending_targets(&self) -> Vec<PathBuf> {
        let inner = self.inner.lock().unwrap();
        self.targets
            .iter()
            .filter(|t| !inner.successful.contains(t) && !inner.failed.contains_key(*t))
            .cloned()
            .collect()
    }

    pub fn successful_targets(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().successful.clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.lock().unwrap();
        JobSnapshot {
            base: self.source.base().to_path_buf(),
            path: self.source.segments().to_vec(),
            status: inner.status,
            size: self.size,
            mode: self.mode,
            mod_time: self.mod_time,
            write_start: inner.write_start,
            success_target: inner.successful.clone(),
            fail_target: inner.failed.clone(),
            sha256: inner.hash.as_ref().map(hex_encode),
        }
    }
}

fn hex_encode(bytes: &Vec<u8>) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Immutable snapshot of a job's state at one point in time. Used both as
/// the `JobUpdated` event payload and as the per-file entry in the JSON
/// report.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub base: PathBuf,
    pub path: Vec<String>,
    pub status: JobStatus,
    pub size: u64,
    pub mode: u32,
    #[serde(serialize_with = "serialize_system_time")]
    pub mod_time: SystemTime,
    #[serde(rename = "write_time", serialize_with = "serialize_opt_system_time")]
    pub write_start: Option<SystemTime>,
    pub success_target: Vec<PathBuf>,
    pub fail_target: BTreeMap<PathBuf, String>,
    pub sha256: Option<String>,
}

/// A job bundled with an opened source reader and, in linear-device mode
/// only, a completion signal the prepare stage waits on before opening the
/// next source.
pub struct WriteJob {
    pub job: Arc<Job>,
    pub reader: Box<dyn crate::reader::SourceReader>,
    /// Present only in linear source-device mode. The copy stage signals
    /// this once it has finished with the job's reader, which the prepare
    /// stage waits on before opening the next source.
    pub done_tx: Option<crossbeam_channel::Sender<()>>,
}
