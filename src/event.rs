//! Event bus: a single ingress channel fanned out to one channel (and one
//! thread) per registered handler, so a slow handler never blocks the
//! producer beyond the channel bound it owns.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::job::JobSnapshot;

const INGRESS_CAPACITY: usize = 128;
const HANDLER_CAPACITY: usize = 128;

/// A handler observes one event at a time, in order, and is guaranteed to
/// see the same sequence as every other registered handler.
pub type EventHandler = Box<dyn Fn(Event) + Send + 'static>;

/// Immutable event snapshots, safe to clone and share across handler
/// threads.
#[derive(Debug, Clone)]
pub enum Event {
    CountUpdated {
        bytes: u64,
        files: u64,
        finished: bool,
    },
    ProgressUpdated {
        bytes: u64,
        files: u64,
        finished: bool,
    },
    JobUpdated {
        job: Arc<JobSnapshot>,
    },
    ErrorReported {
        src: String,
        dst: String,
        error: String,
    },
    Finished,
}

/// The producer-facing handle: `submit` never blocks longer than the
/// ingress channel's bound, regardless of how slow any handler is.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
}

impl EventBus {
    /// Spawns the fan-out thread and one thread per handler. Returns the
    /// producer handle and a join handle that resolves once every handler
    /// has observed the terminal `Finished` event (i.e. once the bus is
    /// dropped and drained).
    pub fn new(handlers: Vec<EventHandler>) -> (Self, thread::JoinHandle<()>) {
        let (tx, rx) = bounded::<Event>(INGRESS_CAPACITY);

        let mut handler_txs = Vec::with_capacity(handlers.len());
        let mut handler_joins = Vec::with_capacity(handlers.len());

        for handler in handlers {
            let (htx, hrx): (Sender<Event>, Receiver<Event>) = bounded(HANDLER_CAPACITY);
            handler_txs.push(htx);

            let join = crate::supervisor::spawn_supervised("event-handler", move || {
                for event in hrx.iter() {
                    handler(event);
                }
                handler(Event::Finished);
            });
            handler_joins.push(join);
        }

        let fanout = crate::supervisor::spawn_supervised("event-fanout", move || {
            for event in rx.iter() {
                for htx in &handler_txs {
                    // A full handler channel is a deliberate back-pressure
                    // signal to producers; it is not an error.
                    let _ = htx.send(event.clone());
                }
            }
            drop(handler_txs);
            for join in handler_joins {
                let _ = join.join();
            }
        });

        (EventBus { tx }, fanout)
    }

    /// An event bus with no registered handlers; submissions are silently
    /// dropped once the ingress channel is full, which never happens since
    /// nothing ever needs to read it.
    pub fn noop() -> (Self, thread::JoinHandle<()>) {
        Self::new(Vec::new())
    }

    pub fn submit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn every_handler_sees_identical_sequence() {
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let sa = seen_a.clone();
        let sb = seen_b.clone();

        let (bus, fanout) = EventBus::new(vec![
            Box::new(move |e| sa.lock().unwrap().push(format!("{:?}", e))),
            Box::new(move |e| sb.lock().unwrap().push(format!("{:?}", e))),
        ]);

        bus.submit(Event::CountUpdated {
            bytes: 1,
            files: 1,
            finished: false,
        });
        bus.submit(Event::CountUpdated {
            bytes: 2,
            files: 1,
            finished: true,
        });
        drop(bus);
        fanout.join().unwrap();

        let a = seen_a.lock().unwrap();
        let b = seen_b.lock().unwrap();
        assert_eq!(a.len(), 3); // two events + terminal Finished
        assert_eq!(*a, *b);
    }

    #[test]
    fn noop_bus_accepts_submissions() {
        let (bus, fanout) = EventBus::noop();
        bus.submit(Event::Finished);
        drop(bus);
        fanout.join().unwrap();
    }
}
