//! Resource watcher types.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::worker::{WatcherId, WorkerCommand};
use crate::error::Error;
use crate::resource::{DecodedResource, Resource};

/// Events delivered to resource watchers.
#[derive(Debug)]
pub enum ResourceEvent<T> {
    /// A new version of the resource is available.
    ResourceChanged(Arc<T>),
    /// An error occurred while fetching or decoding the resource. The previously
    /// delivered value, if any, is still considered valid.
    ResourceError(Error),
    /// The resource does not exist on the management server.
    ///
    /// Only delivered for resource types where
    /// [`Resource::ALL_RESOURCES_REQUIRED_IN_SOTW`] is `true`: the server is
    /// required to enumerate every subscribed resource in each response, so a
    /// subscribed name missing from a response means it was deleted.
    ResourceDoesNotExist,
    /// An error occurred that does not invalidate the current resource value, but
    /// is surfaced for observability (e.g. a transient stream error that triggered
    /// a reconnect).
    AmbientError(Error),
}

/// A watcher for resources of type `T`.
///
/// Call [`next()`](Self::next) to receive resource events. Dropping the watcher
/// unsubscribes from the resource.
#[derive(Debug)]
pub struct ResourceWatcher<T: Resource> {
    pub(crate) rx: mpsc::Receiver<ResourceEvent<DecodedResource>>,
    pub(crate) watcher_id: WatcherId,
    pub(crate) command_tx: mpsc::UnboundedSender<WorkerCommand>,
    pub(crate) _marker: std::marker::PhantomData<T>,
}

impl<T: Resource> ResourceWatcher<T> {
    /// Returns the next resource event.
    ///
    /// Returns `None` when the subscription is closed (the client was dropped).
    pub async fn next(&mut self) -> Option<ResourceEvent<T>> {
        let event = self.rx.recv().await?;
        Some(match event {
            ResourceEvent::ResourceChanged(resource) => {
                let resource = resource
                    .downcast::<T>()
                    .expect("decoder produced resource of the wrong type");
                ResourceEvent::ResourceChanged(resource)
            }
            ResourceEvent::ResourceError(e) => ResourceEvent::ResourceError(e),
            ResourceEvent::ResourceDoesNotExist => ResourceEvent::ResourceDoesNotExist,
            ResourceEvent::AmbientError(e) => ResourceEvent::AmbientError(e),
        })
    }
}

impl<T: Resource> Drop for ResourceWatcher<T> {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Unwatch {
            watcher_id: self.watcher_id,
        });
    }
}
