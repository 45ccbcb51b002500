//! Panic-catching thread supervisor. Every long-lived pipeline thread is
//! spawned through this helper so a panic in one worker logs with stack
//! context and lets the rest of the pipeline keep draining instead of
//! taking down the process.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// Spawns `f` on a new OS thread named `name`. If `f` panics, the panic is
/// caught, logged at `error` level with a backtrace, and the thread returns
/// normally.
pub fn spawn_supervised<F>(name: &str, f: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let name = name.to_string();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            if let Err(payload) = result {
                let message = panic_message(&payload);
                let backtrace = std::backtrace::Backtrace::force_capture();
                tracing::error!(thread = %name, panic = %message, %backtrace, "worker thread panicked");
            }
        })
        .expect("failed to spawn supervised thread")
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
