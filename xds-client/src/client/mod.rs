//! Client interface through which the user can watch and receive updates for xDS resources.

use tokio::sync::mpsc;
use tracing::warn;

use crate::client::config::ClientConfig;
use crate::client::watch::ResourceWatcher;
use crate::client::worker::{AdsWorker, WatcherId, WorkerCommand, WorkerConfig};
use crate::error::{Error, Result};
use crate::resource::{decoder_fn, Resource};
use crate::runtime::Runtime;
use crate::transport::TransportBuilder;

pub mod config;
pub mod retry;
pub mod watch;
pub(crate) mod worker;

/// Size of the per-watcher event channel.
///
/// The worker applies backpressure against this channel, so the ADS stream
/// stalls (no ACKs sent) while a slow watcher is behind.
const WATCHER_CHANNEL_SIZE: usize = 16;

/// Builder for [`XdsClient`].
#[derive(Debug)]
pub struct XdsClientBuilder {
    config: ClientConfig,
}

impl XdsClientBuilder {
    /// Create a new builder with the given configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Build the client, connecting to [`ClientConfig::servers`] in priority
    /// order (gRFC A71) with `transport_builder`, and spawning the background
    /// worker that manages the resulting ADS stream with `runtime`.
    ///
    /// Servers are tried in order; the first one that connects successfully
    /// is used. Returns an error if every server fails, or if no servers are
    /// configured.
    pub async fn build<B, R>(self, transport_builder: B, runtime: R) -> Result<XdsClient>
    where
        B: TransportBuilder,
        R: Runtime,
    {
        let mut last_error = None;
        let mut transport = None;

        for server in &self.config.servers {
            match transport_builder.build(server).await {
                Ok(t) => {
                    transport = Some(t);
                    break;
                }
                Err(e) => {
                    warn!(uri = %server.uri, error = %e, "failed to connect to xDS server, trying next");
                    last_error = Some(e);
                }
            }
        }

        let transport = transport.ok_or_else(|| {
            last_error.unwrap_or_else(|| Error::Connection("no xDS servers configured".into()))
        })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let worker = AdsWorker::new(
            transport,
            crate::codec::prost::ProstCodec,
            runtime.clone(),
            Some(self.config.node.clone()),
            WorkerConfig { retry_policy: self.config.retry_policy.clone() },
            command_rx,
        );

        runtime.spawn(worker.run());

        Ok(XdsClient { command_tx })
    }
}

/// The xDS client.
///
/// This is a handle to the background worker that manages the ADS stream.
/// Cloning this handle creates a new reference to the same worker; the worker
/// runs until every clone is dropped.
#[derive(Clone, Debug)]
pub struct XdsClient {
    command_tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl XdsClient {
    /// Create a new builder.
    pub fn builder(config: ClientConfig) -> XdsClientBuilder {
        XdsClientBuilder::new(config)
    }

    /// Watch a resource by name.
    ///
    /// Returns a [`ResourceWatcher`] that receives events for this resource.
    /// Dropping the watcher automatically unsubscribes.
    ///
    /// Pass an empty name to subscribe to every resource of type `T` (a
    /// wildcard subscription).
    pub fn watch<T: Resource>(&self, name: impl Into<String>) -> ResourceWatcher<T> {
        let (event_tx, rx) = mpsc::channel(WATCHER_CHANNEL_SIZE);
        let watcher_id = WatcherId::new();

        let command = WorkerCommand::Watch {
            type_url: T::TYPE_URL.as_str(),
            name: name.into(),
            watcher_id,
            event_tx,
            decoder: decoder_fn::<T>(),
            all_resources_required_in_sotw: T::ALL_RESOURCES_REQUIRED_IN_SOTW,
        };

        // If the worker has already shut down, the watcher simply never receives
        // an event; `next()` returns `None` immediately once `rx` is dropped.
        let _ = self.command_tx.send(command);

        ResourceWatcher {
            rx,
            watcher_id,
            command_tx: self.command_tx.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}
