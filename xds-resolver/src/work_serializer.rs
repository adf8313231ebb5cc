//! The single-threaded cooperative work serializer (spec §5).
//!
//! All resolver state is touched only from closures run through this
//! serializer, so call sites never need to reason about interleaving with
//! each other. Modeled on the discovery client's drain-task idiom: an
//! unbounded channel of boxed closures, drained in order by one spawned
//! task.

use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A handle used to schedule closures onto the serializer's task.
///
/// Cloning a handle shares the same underlying queue; jobs from any handle
/// run in the order they were scheduled, interleaved with jobs from other
/// handles in send order.
#[derive(Clone)]
pub struct WorkSerializer {
    tx: mpsc::UnboundedSender<Job>,
}

impl WorkSerializer {
    /// Spawn a new serializer task and return a handle to it.
    ///
    /// The task runs until every handle (including this one) is dropped.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self { tx }
    }

    /// Schedule a closure to run on the serializer task.
    ///
    /// Silently dropped if the serializer task has already exited (e.g.
    /// after the resolver that owned it has been destroyed).
    pub fn schedule<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(Box::new(job));
    }
}

impl Default for WorkSerializer {
    fn default() -> Self {
        Self::new()
    }
}
