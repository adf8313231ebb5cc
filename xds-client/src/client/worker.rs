//! ADS worker that manages the xDS stream.
//!
//! The worker runs as a background task, managing:
//! - The ADS stream lifecycle (connection, reconnection)
//! - Resource subscriptions and version/nonce tracking
//! - Dispatching resources to watchers
//! - ACK/NACK protocol

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::client::retry::{Backoff, RetryPolicy};
use crate::client::watch::ResourceEvent;
use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Node};
use crate::resource::{DecodeResult, DecodedResource, DecoderFn};
use crate::runtime::Runtime;
use crate::transport::{Transport, TransportStream};

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Create a new unique watcher ID.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands sent from `XdsClient` to the worker.
pub(crate) enum WorkerCommand {
    /// Subscribe to a resource.
    Watch {
        /// The type URL of the resource.
        type_url: &'static str,
        /// The resource name (empty string for wildcard subscription).
        name: String,
        /// Unique identifier for this watcher.
        watcher_id: WatcherId,
        /// Channel to send resource events to the watcher.
        event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
        /// Decoder function for this resource type.
        decoder: DecoderFn,
        /// Whether the server is required to enumerate every subscribed
        /// resource of this type in each SotW response (gRFC A53).
        all_resources_required_in_sotw: bool,
    },
    /// Unsubscribe a watcher.
    Unwatch {
        /// The watcher to remove.
        watcher_id: WatcherId,
    },
}

/// Represents the subscription mode for a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SubscriptionMode {
    /// Wildcard subscription - receive all resources of this type.
    /// In xDS protocol, this is represented by an empty resource_names list.
    Wildcard,
    /// Named subscription - receive only specific resources.
    Named(HashSet<String>),
}

impl SubscriptionMode {
    /// Returns resource names for the outgoing `DiscoveryRequest`.
    /// Empty vec for wildcard (xDS spec: empty = all resources).
    fn resource_names_for_request(&self) -> Vec<String> {
        match self {
            Self::Wildcard => Vec::new(),
            Self::Named(names) => names.iter().cloned().collect(),
        }
    }
}

/// Per-type_url state tracking.
struct TypeState {
    /// Decoder function for this resource type.
    decoder: DecoderFn,
    /// Version from last successful response.
    version_info: String,
    /// Nonce from last response (for ACK/NACK).
    nonce: String,
    /// Active watchers for this type.
    watchers: HashMap<WatcherId, WatcherEntry>,
    /// Current subscription mode (wildcard or named resources).
    subscription: SubscriptionMode,
    /// Whether the server must enumerate every subscribed resource in each
    /// SotW response (gRFC A53). Missing resources are treated as deleted
    /// only when this is true.
    all_resources_required_in_sotw: bool,
    /// Names of resources known to currently exist, from the last response
    /// in which this type's resources were enumerated. Used to detect
    /// deletions for `all_resources_required_in_sotw` types.
    known_resources: HashSet<String>,
}

impl std::fmt::Debug for TypeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeState")
            .field("decoder", &"<decoder fn>")
            .field("version_info", &self.version_info)
            .field("nonce", &self.nonce)
            .field("subscription", &self.subscription)
            .field("all_resources_required_in_sotw", &self.all_resources_required_in_sotw)
            .finish()
    }
}

impl TypeState {
    fn new(decoder: DecoderFn, all_resources_required_in_sotw: bool) -> Self {
        Self {
            decoder,
            version_info: String::new(),
            nonce: String::new(),
            watchers: HashMap::new(),
            subscription: SubscriptionMode::Named(HashSet::new()),
            all_resources_required_in_sotw,
            known_resources: HashSet::new(),
        }
    }

    /// Recalculate subscription mode from watchers.
    fn recalculate_subscriptions(&mut self) {
        let has_wildcard = self.watchers.values().any(|entry| entry.name.is_empty());

        if has_wildcard {
            self.subscription = SubscriptionMode::Wildcard;
        } else {
            let names: HashSet<String> = self
                .watchers
                .values()
                .map(|entry| entry.name.clone())
                .collect();
            self.subscription = SubscriptionMode::Named(names);
        }
    }

    /// Resource names to send in the next `DiscoveryRequest`.
    fn resource_names_for_request(&self) -> Vec<String> {
        self.subscription.resource_names_for_request()
    }
}

/// Per-watcher state.
struct WatcherEntry {
    /// Channel to send events to this watcher.
    event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
    /// Resource name this watcher subscribed to (empty = wildcard).
    name: String,
}

/// Configuration for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Retry policy governing reconnection backoff after a failed or dropped
    /// ADS stream (gRFC A6), taken from [`ClientConfig::retry_policy`](crate::ClientConfig::retry_policy).
    pub retry_policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { retry_policy: RetryPolicy::default() }
    }
}

/// The ADS worker manages the xDS stream and dispatches resources to watchers.
pub(crate) struct AdsWorker<T, C, R> {
    transport: T,
    codec: C,
    runtime: R,
    node: Option<Node>,

    command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    type_states: HashMap<String, TypeState>,
    backoff: Backoff,
}

impl<T, C, R> AdsWorker<T, C, R>
where
    T: Transport,
    C: XdsCodec,
    R: Runtime,
{
    /// Create a new worker.
    pub(crate) fn new(
        transport: T,
        codec: C,
        runtime: R,
        node: Option<Node>,
        config: WorkerConfig,
        command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    ) -> Self {
        Self {
            transport,
            codec,
            runtime,
            node,
            backoff: Backoff::new(config.retry_policy),
            command_rx,
            type_states: HashMap::new(),
        }
    }

    /// Run the worker event loop until every `XdsClient` handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            // Wait for at least one subscription before connecting. This
            // prevents deadlock with servers that require a message before
            // sending response headers - we need something to send.
            while self.type_states.is_empty() {
                match self.command_rx.recv().await {
                    Some(cmd) => self.handle_command_disconnected(cmd),
                    None => return,
                }
            }

            // Nonces are tied to the stream.
            for type_state in self.type_states.values_mut() {
                type_state.nonce.clear();
            }

            let stream = match self
                .transport
                .new_stream(self.build_initial_requests())
                .await
            {
                Ok(s) => {
                    self.backoff.reset();
                    s
                }
                Err(e) => {
                    match self.backoff.next_backoff() {
                        Some(delay) => {
                            warn!(error = %e, delay = ?delay, "failed to establish ADS stream, retrying");
                            self.runtime.sleep(delay).await;
                            continue;
                        }
                        None => {
                            warn!(error = %e, "failed to establish ADS stream, retry attempts exhausted");
                            return;
                        }
                    }
                }
            };

            if self.run_connected(stream).await {
                return; // shutdown
            }
            // else: reconnect
        }
    }

    /// Build initial `DiscoveryRequest`s for all active subscriptions.
    fn build_initial_requests(&self) -> Vec<Bytes> {
        let mut requests = Vec::new();

        for (type_url, type_state) in &self.type_states {
            if type_state.watchers.is_empty() {
                continue;
            }

            let request = DiscoveryRequest {
                node: self.node.clone(),
                type_url: type_url.clone(),
                resource_names: type_state.resource_names_for_request(),
                version_info: type_state.version_info.clone(),
                response_nonce: String::new(),
                error_detail: None,
            };

            if let Ok(bytes) = self.codec.encode_request(&request) {
                requests.push(bytes);
            }
        }

        requests
    }

    /// Handle a command while disconnected (just update state, can't send requests).
    fn handle_command_disconnected(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Watch {
                type_url,
                name,
                watcher_id,
                event_tx,
                decoder,
                all_resources_required_in_sotw,
            } => {
                self.add_watcher(
                    type_url,
                    name,
                    watcher_id,
                    event_tx,
                    decoder,
                    all_resources_required_in_sotw,
                );
            }
            WorkerCommand::Unwatch { watcher_id } => {
                self.remove_watcher(watcher_id);
            }
        }
    }

    /// Run the main event loop while connected.
    ///
    /// Returns `true` if the worker should shut down, `false` to reconnect.
    async fn run_connected<S: TransportStream>(&mut self, mut stream: S) -> bool {
        loop {
            tokio::select! {
                result = stream.recv() => {
                    match result {
                        Ok(Some(bytes)) => {
                            if self.handle_response(&mut stream, bytes).await.is_err() {
                                return false;
                            }
                        }
                        Ok(None) => return false,
                        Err(e) => {
                            warn!(error = %e, "ADS stream closed");
                            return false;
                        }
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_command(&mut stream, cmd).await.is_err() {
                                return false;
                            }
                        }
                        None => return true,
                    }
                }
            }
        }
    }

    /// Handle a command while connected.
    async fn handle_command<S: TransportStream>(
        &mut self,
        stream: &mut S,
        cmd: WorkerCommand,
    ) -> Result<()> {
        match cmd {
            WorkerCommand::Watch {
                type_url,
                name,
                watcher_id,
                event_tx,
                decoder,
                all_resources_required_in_sotw,
            } => {
                self.handle_watch(
                    stream,
                    type_url,
                    name,
                    watcher_id,
                    event_tx,
                    decoder,
                    all_resources_required_in_sotw,
                )
                .await
            }
            WorkerCommand::Unwatch { watcher_id } => self.handle_unwatch(stream, watcher_id).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_watch<S: TransportStream>(
        &mut self,
        stream: &mut S,
        type_url: &'static str,
        name: String,
        watcher_id: WatcherId,
        event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
        decoder: DecoderFn,
        all_resources_required_in_sotw: bool,
    ) -> Result<()> {
        let type_url_string = type_url.to_string();
        let is_new_type = !self.type_states.contains_key(&type_url_string);
        let subscriptions_changed = self.add_watcher(
            type_url,
            name,
            watcher_id,
            event_tx,
            decoder,
            all_resources_required_in_sotw,
        );

        if is_new_type || subscriptions_changed {
            self.send_request(stream, &type_url_string).await?;
        }

        Ok(())
    }

    async fn handle_unwatch<S: TransportStream>(
        &mut self,
        stream: &mut S,
        watcher_id: WatcherId,
    ) -> Result<()> {
        if let Some((type_url, subscriptions_changed)) = self.remove_watcher(watcher_id) {
            if subscriptions_changed {
                self.send_request(stream, &type_url).await?;
            }
        }
        Ok(())
    }

    /// Add a watcher to the state. Returns true if subscriptions changed.
    fn add_watcher(
        &mut self,
        type_url: &'static str,
        name: String,
        watcher_id: WatcherId,
        event_tx: mpsc::Sender<ResourceEvent<DecodedResource>>,
        decoder: DecoderFn,
        all_resources_required_in_sotw: bool,
    ) -> bool {
        let type_url_string = type_url.to_string();
        let type_state = self
            .type_states
            .entry(type_url_string)
            .or_insert_with(|| TypeState::new(decoder, all_resources_required_in_sotw));

        let old_subscription = type_state.subscription.clone();

        type_state
            .watchers
            .insert(watcher_id, WatcherEntry { event_tx, name });
        type_state.recalculate_subscriptions();

        type_state.subscription != old_subscription
    }

    /// Remove a watcher from the state. Returns the type_url and whether
    /// subscriptions changed.
    fn remove_watcher(&mut self, watcher_id: WatcherId) -> Option<(String, bool)> {
        let type_url = self
            .type_states
            .iter()
            .find(|(_, state)| state.watchers.contains_key(&watcher_id))
            .map(|(url, _)| url.clone())?;

        let type_state = self.type_states.get_mut(&type_url)?;

        let old_subscription = type_state.subscription.clone();

        type_state.watchers.remove(&watcher_id);
        type_state.recalculate_subscriptions();

        let subscriptions_changed = type_state.subscription != old_subscription;

        if type_state.watchers.is_empty() {
            self.type_states.remove(&type_url);
        }

        Some((type_url, subscriptions_changed))
    }

    /// Send a `DiscoveryRequest` for a type, reflecting its current subscription.
    async fn send_request<S: TransportStream>(&self, stream: &mut S, type_url: &str) -> Result<()> {
        let Some(type_state) = self.type_states.get(type_url) else {
            return Ok(());
        };

        let request = DiscoveryRequest {
            node: self.node.clone(),
            type_url: type_url.to_string(),
            resource_names: type_state.resource_names_for_request(),
            version_info: type_state.version_info.clone(),
            response_nonce: type_state.nonce.clone(),
            error_detail: None,
        };

        let bytes = self.codec.encode_request(&request)?;
        stream.send(bytes).await
    }

    /// Handle a response from the server: decode resources, dispatch to
    /// watchers, detect deletions, and ACK or NACK.
    async fn handle_response<S: TransportStream>(
        &mut self,
        stream: &mut S,
        bytes: Bytes,
    ) -> Result<()> {
        let response = self.codec.decode_response(bytes)?;
        let type_url = response.type_url.clone();

        let Some(type_state) = self.type_states.get(&type_url) else {
            trace!(%type_url, "ignoring response for unsubscribed type");
            return Ok(());
        };

        let mut seen_names = HashSet::new();
        let mut top_level_errors = Vec::new();
        let mut changed: Vec<(String, DecodedResource)> = Vec::new();
        let mut per_resource_errors: Vec<(String, Error)> = Vec::new();

        for resource_any in &response.resources {
            match (type_state.decoder)(resource_any.value.clone()) {
                DecodeResult::Success { name, resource } => {
                    seen_names.insert(name.clone());
                    changed.push((name, resource));
                }
                DecodeResult::ResourceError { name, error } => {
                    seen_names.insert(name.clone());
                    per_resource_errors.push((name, error));
                }
                DecodeResult::TopLevelError(error) => {
                    top_level_errors.push(error.to_string());
                }
            }
        }

        if let Some(type_state) = self.type_states.get_mut(&type_url) {
            type_state.nonce = response.nonce.clone();
        }

        if !top_level_errors.is_empty() {
            let message = top_level_errors.join("; ");
            self.send_nack(stream, &response, message.clone()).await?;
            self.notify_watchers_ambient_error(&type_url, Error::Validation(message))
                .await;
            return Ok(());
        }

        let all_required = self
            .type_states
            .get(&type_url)
            .map(|s| s.all_resources_required_in_sotw)
            .unwrap_or(false);

        let is_wildcard = matches!(
            self.type_states.get(&type_url).map(|s| &s.subscription),
            Some(SubscriptionMode::Wildcard)
        );

        let deleted: Vec<String> = if all_required {
            self.type_states
                .get(&type_url)
                .map(|s| {
                    s.known_resources
                        .iter()
                        .filter(|name| !seen_names.contains(*name))
                        .filter(|name| is_wildcard || s.watchers.values().any(|w| &w.name == *name))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        for (name, resource) in changed {
            debug!(%type_url, %name, "resource updated");
            self.notify_watchers_changed(&type_url, &name, resource)
                .await;
        }

        for (name, error) in per_resource_errors {
            warn!(%type_url, %name, %error, "resource failed validation");
            self.notify_watchers_resource_error(&type_url, &name, error)
                .await;
        }

        for name in &deleted {
            debug!(%type_url, %name, "resource no longer present in response, treating as deleted");
            self.notify_watchers_does_not_exist(&type_url, name).await;
        }

        if let Some(type_state) = self.type_states.get_mut(&type_url) {
            type_state.version_info = response.version_info.clone();
            if all_required {
                for name in &deleted {
                    type_state.known_resources.remove(name);
                }
                type_state.known_resources.extend(seen_names);
            }
        }

        self.send_ack(stream, &response).await
    }

    /// Notify watchers interested in `name` that it changed.
    async fn notify_watchers_changed(&mut self, type_url: &str, name: &str, resource: DecodedResource) {
        let Some(type_state) = self.type_states.get(type_url) else {
            return;
        };

        let resource = Arc::new(resource);
        for entry in type_state.watchers.values() {
            if entry.name.is_empty() || entry.name == name {
                let _ = entry
                    .event_tx
                    .send(ResourceEvent::ResourceChanged(Arc::clone(&resource)))
                    .await;
            }
        }
    }

    /// Notify watchers interested in `name` that it failed validation.
    async fn notify_watchers_resource_error(&mut self, type_url: &str, name: &str, error: Error) {
        let Some(type_state) = self.type_states.get(type_url) else {
            return;
        };

        for entry in type_state.watchers.values() {
            if entry.name.is_empty() || entry.name == name {
                let _ = entry
                    .event_tx
                    .send(ResourceEvent::ResourceError(Error::Validation(error.to_string())))
                    .await;
            }
        }
    }

    /// Notify watchers interested in `name` that it no longer exists.
    async fn notify_watchers_does_not_exist(&mut self, type_url: &str, name: &str) {
        let Some(type_state) = self.type_states.get(type_url) else {
            return;
        };

        for entry in type_state.watchers.values() {
            if entry.name == name {
                let _ = entry.event_tx.send(ResourceEvent::ResourceDoesNotExist).await;
            }
        }
    }

    /// Notify every watcher of a type about a top-level (whole-response) error.
    async fn notify_watchers_ambient_error(&mut self, type_url: &str, error: Error) {
        let Some(type_state) = self.type_states.get(type_url) else {
            return;
        };

        for entry in type_state.watchers.values() {
            let _ = entry
                .event_tx
                .send(ResourceEvent::AmbientError(Error::Validation(error.to_string())))
                .await;
        }
    }

    /// Send an ACK for a response.
    async fn send_ack<S: TransportStream>(
        &self,
        stream: &mut S,
        response: &DiscoveryResponse,
    ) -> Result<()> {
        let Some(type_state) = self.type_states.get(&response.type_url) else {
            return Ok(());
        };

        let request = DiscoveryRequest {
            node: None, // only the first request on a stream carries node identification
            type_url: response.type_url.clone(),
            resource_names: type_state.resource_names_for_request(),
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            error_detail: None,
        };

        let bytes = self.codec.encode_request(&request)?;
        stream.send(bytes).await
    }

    /// Send a NACK for a response.
    async fn send_nack<S: TransportStream>(
        &self,
        stream: &mut S,
        response: &DiscoveryResponse,
        error_message: String,
    ) -> Result<()> {
        let Some(type_state) = self.type_states.get(&response.type_url) else {
            return Ok(());
        };

        let request = DiscoveryRequest {
            node: None,
            type_url: response.type_url.clone(),
            resource_names: type_state.resource_names_for_request(),
            version_info: type_state.version_info.clone(), // keep old version on NACK
            response_nonce: response.nonce.clone(),
            error_detail: Some(ErrorDetail {
                code: 3, // INVALID_ARGUMENT
                message: error_message,
            }),
        };

        let bytes = self.codec.encode_request(&request)?;
        stream.send(bytes).await
    }
}
