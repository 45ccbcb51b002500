//! Accumulates `JobUpdated`/`ErrorReported` events into a serializable
//! summary of the run, keyed by relative path so repeat updates for the
//! same job collapse to its latest snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::event::{Event, EventHandler};
use crate::job::JobSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct ReportedError {
    pub src: String,
    pub dst: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<JobSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReportedError>,
}

impl Report {
    pub fn to_json(&self, pretty: bool) -> serde_json::Result<String> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

struct Inner {
    jobs: BTreeMap<String, JobSnapshot>,
    errors: Vec<ReportedError>,
}

/// Collects events into a running [`Report`]. Register [`ReportCollector::handler`]
/// as an event handler, then call [`ReportCollector::report`] once the
/// engine has finished to read the accumulated result.
#[derive(Clone)]
pub struct ReportCollector {
    inner: Arc<Mutex<Inner>>,
}

impl ReportCollector {
    pub fn new() -> Self {
        ReportCollector {
            inner: Arc::new(Mutex::new(Inner {
                jobs: BTreeMap::new(),
                errors: Vec::new(),
            })),
        }
    }

    pub fn handler(&self) -> EventHandler {
        let inner = self.inner.clone();
        Box::new(move |event| match event {
            Event::JobUpdated { job } => {
                let key = job.path.join("/");
                inner.lock().unwrap().jobs.insert(key, (*job).clone());
            }
            Event::ErrorReported { src, dst, error } => {
                inner.lock().unwrap().errors.push(ReportedError { src, dst, error });
            }
            _ => {}
        })
    }

    pub fn report(&self) -> Report {
        let inner = self.inner.lock().unwrap();
        Report {
            files: inner.jobs.values().cloned().collect(),
            errors: inner.errors.clone(),
        }
    }
}

impl Default for ReportCollector {
    fn default() -> Self {
        Self::new()
    }
}
