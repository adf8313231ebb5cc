//! A minimal Rust implementation of an [xDS](https://www.envoyproxy.io/docs/envoy/latest/api-docs/xds_protocol)
//! Aggregated Discovery Service (ADS) client.
//!
//! This crate is the discovery-protocol transport and caching layer: it
//! maintains a single bidirectional gRPC stream to a management server,
//! tracks per-type version/nonce state, and dispatches decoded resources to
//! [`ResourceWatcher`]s. It has no opinion about what the resources mean;
//! callers implement [`Resource`] to decode their own domain types.

mod client;
mod codec;
mod error;
mod message;
mod resource;
mod runtime;
mod transport;

pub use client::config::{ClientConfig, ServerConfig};
pub use client::retry::{Backoff, RetryPolicy};
pub use client::watch::{ResourceEvent, ResourceWatcher};
pub use client::{XdsClient, XdsClientBuilder};
pub use codec::prost::ProstCodec;
pub use codec::XdsCodec;
pub use error::{Error, Result};
pub use message::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, Locality, Node, ResourceAny};
pub use resource::{DecodeResult, DecodedResource, Resource, TypeUrl};
pub use runtime::tokio::TokioRuntime;
pub use runtime::Runtime;
pub use transport::tonic::{TonicTransport, TonicTransportBuilder};
pub use transport::{Transport, TransportBuilder, TransportStream};
