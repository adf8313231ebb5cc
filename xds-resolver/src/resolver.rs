//! The resolver core (spec §4.4): construction, start, and shutdown.
//!
//! The resolver depends on [`RouteDiscoveryClient`], not on `xds_client`
//! concretely — the one production implementation adapts
//! [`xds_client::XdsClient`], but tests substitute a fake with no network
//! I/O, per the external-collaborator seam the update-translation engine is
//! built around.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::channel_args::ChannelArgs;
use crate::error::ResolverError;
use crate::route::allocator::{allocate, AllocatorState};
use crate::route::formatter;
use crate::route::model::RouteUpdate;
use crate::service_config::ChannelResult;
use crate::uri::XdsUri;
use crate::work_serializer::WorkSerializer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A route-discovery notification, independent of the wire representation.
pub enum RouteEvent {
    /// A new route update was delivered.
    Changed(RouteUpdate),
    /// The discovery client reported a transient error.
    Error(ResolverError),
    /// The subscribed route configuration does not exist.
    DoesNotExist,
}

/// A live subscription to route-configuration updates for one server name.
pub trait RouteSubscription: Send {
    /// Wait for the next notification, or `None` once the subscription is
    /// permanently closed.
    fn recv(&mut self) -> BoxFuture<'_, Option<RouteEvent>>;
}

/// The discovery-client seam the resolver depends on.
pub trait RouteDiscoveryClient: Send + Sync + 'static {
    /// The subscription type this client hands out.
    type Subscription: RouteSubscription + 'static;

    /// Subscribe to route-configuration updates for `name`.
    fn watch(&self, name: String) -> Self::Subscription;
}

struct ResolverState {
    allocator: AllocatorState,
}

/// The resolver: owns the allocator state, the discovery-client handle, and
/// the channel arguments it augments on every result.
pub struct Resolver<D: RouteDiscoveryClient> {
    server_name: String,
    base_args: ChannelArgs,
    serializer: WorkSerializer,
    results: mpsc::UnboundedSender<ChannelResult>,
    state: Mutex<ResolverState>,
    discovery: Mutex<Option<Arc<D>>>,
    released: AtomicBool,
}

impl<D: RouteDiscoveryClient> Resolver<D> {
    /// Construct a resolver from an xDS target URI and the channel's base
    /// arguments. Does not yet subscribe to anything; call [`start`](Self::start)
    /// for that.
    pub fn new(
        uri: &XdsUri,
        base_args: ChannelArgs,
        serializer: WorkSerializer,
        results: mpsc::UnboundedSender<ChannelResult>,
    ) -> Self {
        Self {
            server_name: uri.server_name.clone(),
            base_args,
            serializer,
            results,
            state: Mutex::new(ResolverState { allocator: AllocatorState::new() }),
            discovery: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// Build the discovery client via `build_client` and subscribe to the
    /// resolver's server name, dispatching update/error/does-not-exist
    /// notifications onto the serializer.
    ///
    /// If `build_client` fails, the failure is surfaced to the channel as a
    /// [`ResolverError::Construction`] result and the resolver remains inert:
    /// no subscription is ever started, and only [`shutdown`](Self::shutdown)
    /// has any further effect on it.
    ///
    /// Must be called at most once. If the resolver has already been shut
    /// down (possible if `shutdown` races a slow caller), this is a no-op.
    pub fn start<F>(self: &Arc<Self>, build_client: F)
    where
        F: FnOnce() -> Result<Arc<D>, ResolverError>,
    {
        if self.released.load(Ordering::Acquire) {
            return;
        }

        let client = match build_client() {
            Ok(client) => client,
            Err(error) => {
                warn!(%error, "failed to construct discovery client");
                self.push(ChannelResult::error(error, self.args_with_handle_only()));
                return;
            }
        };

        let mut subscription = client.watch(self.server_name.clone());
        *self.discovery.lock().unwrap() = Some(client);

        let resolver = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let handler = Arc::clone(&resolver);
                resolver.serializer.schedule(move || handler.handle_event(event));
            }
        });
    }

    /// Release the discovery handle. Idempotent; any callback already
    /// scheduled before this call completes harmlessly, callbacks scheduled
    /// after observe a released handle and return immediately.
    pub fn shutdown(&self) {
        self.released.store(true, Ordering::Release);
        self.discovery.lock().unwrap().take();
    }

    // Runs on the serializer task.
    fn handle_event(&self, event: RouteEvent) {
        if self.released.load(Ordering::Acquire) {
            return;
        }

        match event {
            RouteEvent::Changed(update) => self.handle_update(&update),
            RouteEvent::Error(error) => self.handle_error(error),
            RouteEvent::DoesNotExist => self.handle_does_not_exist(),
        }
    }

    fn handle_update(&self, update: &RouteUpdate) {
        let mut state = self.state.lock().unwrap();
        let (new_allocator, lookup) = allocate(&state.allocator, &update.routes);
        state.allocator = new_allocator;
        drop(state);

        let document = formatter::format(update, &lookup);
        let args = self.augmented_args();

        match ChannelResult::success(&document, args) {
            Ok(result) => self.push(result),
            Err(error) => {
                warn!(%error, "formatter produced a document the service config parser rejected");
                self.push(ChannelResult::error(error, self.args_with_handle_only()));
            }
        }
    }

    fn handle_error(&self, error: ResolverError) {
        debug!(%error, "route discovery reported an error");
        self.push(ChannelResult::error(error, self.args_with_handle_only()));
    }

    fn handle_does_not_exist(&self) {
        self.push(ChannelResult::empty(self.base_args.clone()));
    }

    fn push(&self, result: ChannelResult) {
        if self.released.load(Ordering::Acquire) {
            return;
        }
        let _ = self.results.send(result);
    }

    fn augmented_args(&self) -> ChannelArgs {
        self.args_with_handle_only().with(CallConfigSelector)
    }

    fn args_with_handle_only(&self) -> ChannelArgs {
        match self.discovery.lock().unwrap().as_ref() {
            Some(client) => self.base_args.with(DiscoveryClientHandle(Arc::clone(client))),
            None => self.base_args.clone(),
        }
    }
}

/// The opaque discovery-client handle augmented onto successful and error
/// results (spec §6).
#[derive(Clone)]
struct DiscoveryClientHandle<D>(Arc<D>);

/// The opaque call-config-selector handle augmented onto successful results.
///
/// The selector itself lives downstream of this resolver; its contents are
/// out of scope here, so this is a marker the channel recognizes by type.
#[derive(Clone, Copy)]
struct CallConfigSelector;

/// Adapts an [`xds_client::XdsClient`] to [`RouteDiscoveryClient`].
pub mod xds_client_adapter {
    use super::{BoxFuture, RouteDiscoveryClient, RouteEvent, RouteSubscription};
    use crate::route::RouteConfig;
    use xds_client::{ResourceEvent, ResourceWatcher, XdsClient};

    /// A subscription backed by an [`xds_client::ResourceWatcher`].
    pub struct XdsRouteSubscription(ResourceWatcher<RouteConfig>);

    impl RouteSubscription for XdsRouteSubscription {
        fn recv(&mut self) -> BoxFuture<'_, Option<RouteEvent>> {
            Box::pin(async move {
                self.0.next().await.map(|event| match event {
                    ResourceEvent::ResourceChanged(config) => RouteEvent::Changed(config.update.clone()),
                    ResourceEvent::ResourceError(error) => RouteEvent::Error(error.into()),
                    ResourceEvent::ResourceDoesNotExist => RouteEvent::DoesNotExist,
                    ResourceEvent::AmbientError(error) => RouteEvent::Error(error.into()),
                })
            })
        }
    }

    impl RouteDiscoveryClient for XdsClient {
        type Subscription = XdsRouteSubscription;

        fn watch(&self, name: String) -> Self::Subscription {
            XdsRouteSubscription(XdsClient::watch::<RouteConfig>(self, name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::model::{Action, PathMatch, Route};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeSubscription {
        events: std::sync::Arc<AsyncMutex<std::collections::VecDeque<RouteEvent>>>,
    }

    impl RouteSubscription for FakeSubscription {
        fn recv(&mut self) -> BoxFuture<'_, Option<RouteEvent>> {
            let events = std::sync::Arc::clone(&self.events);
            Box::pin(async move { events.lock().await.pop_front() })
        }
    }

    struct FakeDiscoveryClient {
        events: std::sync::Arc<AsyncMutex<std::collections::VecDeque<RouteEvent>>>,
    }

    impl RouteDiscoveryClient for FakeDiscoveryClient {
        type Subscription = FakeSubscription;

        fn watch(&self, _name: String) -> Self::Subscription {
            FakeSubscription { events: std::sync::Arc::clone(&self.events) }
        }
    }

    fn single_cluster_update() -> RouteUpdate {
        RouteUpdate {
            routes: vec![Route {
                path: PathMatch::Prefix("/".into()),
                headers: vec![],
                fraction: None,
                action: Action::SingleCluster("C".into()),
            }],
        }
    }

    #[tokio::test]
    async fn shutdown_before_start_suppresses_subsequent_events() {
        let uri = XdsUri::parse("xds:///my-service").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver: Arc<Resolver<FakeDiscoveryClient>> =
            Arc::new(Resolver::new(&uri, ChannelArgs::new(), WorkSerializer::new(), tx));
        resolver.shutdown();

        resolver.handle_event(RouteEvent::DoesNotExist);
        rx.close();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn resource_does_not_exist_pushes_empty_config_with_base_args() {
        let uri = XdsUri::parse("xds:///my-service").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver: Resolver<FakeDiscoveryClient> =
            Resolver::new(&uri, ChannelArgs::new(), WorkSerializer::new(), tx);

        resolver.handle_event(RouteEvent::DoesNotExist);

        let result = rx.recv().await.unwrap();
        assert_eq!(result.service_config.as_deref(), Some("{}"));
        assert!(result.error.is_none());
        assert!(result.args.get::<DiscoveryClientHandle<FakeDiscoveryClient>>().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_forwards_updates_through_to_the_result_channel() {
        let uri = XdsUri::parse("xds:///my-service").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver = Arc::new(Resolver::new(&uri, ChannelArgs::new(), WorkSerializer::new(), tx));

        let mut events = std::collections::VecDeque::new();
        events.push_back(RouteEvent::Changed(single_cluster_update()));
        let client = Arc::new(FakeDiscoveryClient { events: std::sync::Arc::new(AsyncMutex::new(events)) });

        resolver.start(|| Ok(client));

        let result = rx.recv().await.unwrap();
        assert!(result.error.is_none());
        assert!(result.service_config.unwrap().contains("cds:C"));
        assert!(result.args.get::<DiscoveryClientHandle<FakeDiscoveryClient>>().is_some());
        assert!(result.args.get::<CallConfigSelector>().is_some());
    }

    #[tokio::test]
    async fn start_surfaces_construction_failure_and_stays_inert() {
        let uri = XdsUri::parse("xds:///my-service").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let resolver: Arc<Resolver<FakeDiscoveryClient>> =
            Arc::new(Resolver::new(&uri, ChannelArgs::new(), WorkSerializer::new(), tx));

        resolver.start(|| Err(ResolverError::Construction("dial failed".into())));

        let result = rx.recv().await.unwrap();
        assert!(result.service_config.is_none());
        assert!(matches!(result.error, Some(ResolverError::Construction(_))));
        assert!(resolver.discovery.lock().unwrap().is_none());

        // Construction failure left the resolver inert, not shut down; a
        // later shutdown call still only has the usual idempotent effect.
        resolver.shutdown();
        rx.close();
        assert!(rx.recv().await.is_none());
    }
}
