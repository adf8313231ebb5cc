//! Crate-owned xDS message types.
//!
//! These types are codegen-agnostic and serve as the interface between
//! the worker's protocol state machine and the wire codec. The codec
//! converts these to/from `envoy-types`/prost proto structs.

use bytes::Bytes;

/// A discovery request to send to the management server.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    /// The version_info from the most recent successfully processed
    /// response for this type, or empty for the first request.
    pub version_info: String,
    /// The node making the request. Per the xDS protocol, only the first
    /// request on a stream needs to carry node identification.
    pub node: Option<Node>,
    /// List of resource names to subscribe to.
    pub resource_names: Vec<String>,
    /// Type URL of the resource being requested.
    pub type_url: String,
    /// The nonce from the most recent response, or empty for the first
    /// request.
    pub response_nonce: String,
    /// Error details, present when this is a NACK.
    pub error_detail: Option<ErrorDetail>,
}

/// A discovery response from the management server.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryResponse {
    /// The version of the response data.
    pub version_info: String,
    /// The response resources, wrapped as `google.protobuf.Any`.
    pub resources: Vec<ResourceAny>,
    /// Type URL of the resources in this response.
    pub type_url: String,
    /// Nonce for this response, echoed back in the next request.
    pub nonce: String,
}

/// A resource wrapped as `google.protobuf.Any`.
#[derive(Debug, Clone)]
pub struct ResourceAny {
    /// Type URL of the resource.
    pub type_url: String,
    /// Serialized resource bytes.
    pub value: Bytes,
}

/// Node identification for the client, sent on the first request of a
/// stream.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// An opaque node identifier.
    pub id: String,
    /// The cluster the node belongs to.
    pub cluster: String,
    /// Locality specifying where the node is running.
    pub locality: Option<Locality>,
    /// Free-form string identifying the client type (e.g. "xds-resolver").
    pub user_agent_name: String,
    /// Version of the client.
    pub user_agent_version: String,
}

impl Node {
    /// Create a new node with the required user agent fields.
    ///
    /// Other fields (id, cluster, locality) can be set using builder methods.
    pub fn new(user_agent_name: impl Into<String>, user_agent_version: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            cluster: String::new(),
            locality: None,
            user_agent_name: user_agent_name.into(),
            user_agent_version: user_agent_version.into(),
        }
    }

    /// Set the node id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the cluster.
    #[must_use]
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    /// Set the locality.
    #[must_use]
    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = Some(locality);
        self
    }
}

/// Locality information identifying where a node is running.
#[derive(Debug, Clone, Default)]
pub struct Locality {
    /// Region the node is in.
    pub region: String,
    /// Zone within the region.
    pub zone: String,
    /// Sub-zone within the zone.
    pub sub_zone: String,
}

/// Error details carried on a NACK request.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    /// gRPC status code.
    pub code: i32,
    /// Error message.
    pub message: String,
}
