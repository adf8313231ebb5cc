//! # xds-resolver
//!
//! An xDS Route Discovery Service resolver for gRPC client channels.
//!
//! This crate turns a stream of Route Discovery Service updates from an xDS
//! management server into a `xds_routing_experimental` service-configuration
//! document the channel's load-balancing stack understands. It does not
//! itself speak xDS over the wire or perform load balancing; those are
//! handled by [`xds_client`] and the channel respectively. This crate owns
//! the translation step in between: matching predicates, weighted-cluster
//! naming stability across updates, and the resolver lifecycle.
//!
//! ## How it works
//!
//! An [`xds_client::XdsClient`], adapted via [`resolver::xds_client_adapter`],
//! is handed to a [`resolver::Resolver`] constructed from an `xds:` target
//! [`uri::XdsUri`]. The resolver subscribes to route
//! updates for the target's server name; each update runs through
//! [`route::allocator`] to assign stable names to weighted-cluster actions and
//! then through [`route::formatter`] to render the service-config document.
//! Results are pushed to the channel as a [`service_config::ChannelResult`],
//! carrying the document alongside [`channel_args::ChannelArgs`] augmented
//! with the discovery-client handle and call-config-selector.

pub mod channel_args;
pub mod error;
pub mod resolver;
pub mod route;
pub mod service_config;
pub mod uri;
pub mod work_serializer;

pub use channel_args::ChannelArgs;
pub use error::ResolverError;
pub use resolver::{RouteDiscoveryClient, RouteEvent, RouteSubscription, Resolver};
pub use route::model::RouteUpdate;
pub use route::RouteConfig;
pub use service_config::ChannelResult;
pub use uri::{XdsUri, XdsUriError};
pub use work_serializer::WorkSerializer;
