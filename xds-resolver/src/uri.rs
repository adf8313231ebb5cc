//! Parsing for `xds:` target URIs.

use thiserror::Error;

const XDS_SCHEME: &str = "xds";

/// Error parsing an xDS target URI.
#[derive(Debug, Error)]
pub enum XdsUriError {
    /// The URI scheme is not "xds".
    #[error("URI scheme must be 'xds'")]
    InvalidScheme,
    /// The URI carries a non-empty authority.
    ///
    /// `xds:///my-service` is valid; `xds://authority/my-service` is not — the
    /// resolver has no notion of a per-target management-server override via
    /// the authority component.
    #[error("xds URI must not carry an authority, got {0:?}")]
    NonEmptyAuthority(String),
    /// The URI could not be parsed at all.
    #[error("invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
}

/// A parsed `xds:` target URI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XdsUri {
    /// The server name to subscribe to, with one leading `/` stripped.
    pub server_name: String,
}

impl XdsUri {
    /// Parse an xDS target URI.
    ///
    /// The scheme must be `xds`, and the authority must be empty. The path
    /// supplies the server name; one leading `/` is stripped.
    pub fn parse(uri: &str) -> Result<Self, XdsUriError> {
        let uri = uri.parse::<http::Uri>()?;

        if uri.scheme_str() != Some(XDS_SCHEME) {
            return Err(XdsUriError::InvalidScheme);
        }

        if let Some(authority) = uri.authority() {
            if !authority.as_str().is_empty() {
                return Err(XdsUriError::NonEmptyAuthority(authority.to_string()));
            }
        }

        let server_name = uri.path().strip_prefix('/').unwrap_or(uri.path()).to_string();

        Ok(Self { server_name })
    }
}
