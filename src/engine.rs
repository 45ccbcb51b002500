//! The orchestrator: wires index -> prepare -> copy -> cleanup together
//! behind a single handle, exactly mirroring the four-stage pipeline the
//! rest of this crate implements piecewise.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::cancel::CancelToken;
use crate::config::EngineOptions;
use crate::copy::{spawn_copy, CopyContext};
use crate::error::Result;
use crate::event::EventBus;
use crate::index::spawn_index;
use crate::prepare::spawn_prepare;

/// A running copy operation. Construction starts every stage immediately;
/// call [`Engine::wait`] to block until the whole pipeline has drained.
pub struct Engine {
    bus: EventBus,
    fanout: JoinHandle<()>,
    cleanup: JoinHandle<()>,
    cancel: CancelToken,
}

impl Engine {
    /// Validates `opts`, then spawns the full pipeline. Each stage owns its
    /// own worker threads; this call returns as soon as they're launched.
    pub fn start(mut opts: EngineOptions) -> Result<Self> {
        opts.validate_targets()?;
        let sources = opts.resolve_sources()?;
        opts.normalize_linear_discipline();

        let cancel = CancelToken::new();
        let (bus, fanout) = EventBus::new(opts.event_handlers);

        let indexed = spawn_index(sources, opts.targets, bus.clone(), cancel.clone());
        let prepared = spawn_prepare(indexed, opts.from_device, bus.clone(), cancel.clone());

        let copy_ctx = Arc::new(CopyContext::new(
            opts.to_device,
            opts.overwrite,
            opts.with_hash,
            opts.batch_size,
            opts.refresh_interval,
        ));
        let copied = spawn_copy(prepared, copy_ctx, bus.clone(), cancel.clone());
        let cleanup = crate::cleanup::spawn_cleanup(copied, bus.clone(), cancel.clone());

        Ok(Engine { bus, fanout, cleanup, cancel })
    }

    /// Requests that every stage stop pulling new work as soon as it next
    /// checks in. Already in-flight files finish normally; nothing already
    /// written to a destination is rolled back.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Blocks until every job has passed through cleanup and every event
    /// handler has observed the terminal event.
    pub fn wait(self) {
        let Engine { bus, fanout, cleanup, cancel: _ } = self;
        let _ = cleanup.join();
        drop(bus);
        let _ = fanout.join();
    }
}
