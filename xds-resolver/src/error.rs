//! Error types for the resolver.

use thiserror::Error;

/// Errors surfaced to the channel as a result's error value.
///
/// Per the three error classes this resolver distinguishes: discovery errors
/// pass the underlying [`xds_client::Error`] through; formatter/parse errors
/// are a resolver defect (the formatter is expected to always produce
/// parser-acceptable output); construction errors fail the resolver before it
/// can subscribe to anything.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The discovery client reported a transport or protocol-level error.
    #[error("discovery error: {0}")]
    Discovery(#[from] xds_client::Error),

    /// A route's data model could not be translated to a service-config entry.
    #[error("route translation error: {0}")]
    Translation(String),

    /// The formatter produced a document the service-config parser rejected.
    ///
    /// This should never happen for well-formed route updates; seeing this
    /// variant indicates a formatter defect.
    #[error("service config parse error: {0}")]
    ServiceConfigParse(#[from] serde_json::Error),

    /// The resolver could not be constructed (e.g. the discovery client
    /// builder failed).
    #[error("resolver construction failed: {0}")]
    Construction(String),
}
