//! CLI progress bar: a single indicatif bar driven by `CountUpdated` (to
//! size it once indexing settles) and `ProgressUpdated` (to advance it).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

use crate::event::{Event, EventHandler};

/// Builds an event handler that drives a single progress bar over stderr.
/// `[files/total] indexing...` while the index stage is still running,
/// `[files/total] copying...` while bytes are moving, `finishing...` once
/// the last batch has been read.
pub fn new_progress_bar() -> EventHandler {
    let bar = ProgressBar::new(1);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar.set_message("[0/0] indexing...");

    let total_files = Arc::new(AtomicU64::new(0));

    Box::new(move |event| match event {
        Event::CountUpdated { bytes, files, finished } => {
            total_files.store(files, Ordering::Relaxed);
            bar.set_length(bytes);
            if finished {
                bar.set_message(format!("[0/{files}] copying..."));
            } else {
                bar.set_message(format!("[0/{files}] indexing..."));
            }
        }
        Event::ProgressUpdated { bytes, files, finished } => {
            bar.set_position(bytes);
            let total = total_files.load(Ordering::Relaxed);
            if finished {
                bar.set_message(format!("[{files}/{total}] finishing..."));
                bar.finish();
            } else {
                bar.set_message(format!("[{files}/{total}] copying..."));
            }
        }
        Event::Finished => {
            bar.finish_and_clear();
        }
        _ => {}
    })
}
