//! The channel result contract (spec §6): a tuple of an optional service
//! config, an optional error, and the augmented channel arguments.

use serde_json::Value;

use crate::channel_args::ChannelArgs;
use crate::error::ResolverError;

/// The result of one resolver pass, pushed to the channel.
///
/// Exactly one of `service_config` / `error` is present in the error case;
/// the success case carries only the config; the empty (resource-does-not-
/// exist) case carries only the parsed `{}` config.
#[derive(Debug)]
pub struct ChannelResult {
    /// The rendered service-config document, serialized, if this pass
    /// produced one.
    pub service_config: Option<String>,
    /// The error this pass surfaced, if any.
    pub error: Option<ResolverError>,
    /// The channel arguments to hand to the channel alongside this result.
    pub args: ChannelArgs,
}

impl ChannelResult {
    /// A successful pass: a config accepted by the parser, with the
    /// discovery-client handle and call-config-selector augmented in.
    pub fn success(document: &Value, args: ChannelArgs) -> Result<Self, ResolverError> {
        let service_config = serialize_and_verify(document)?;
        Ok(Self { service_config: Some(service_config), error: None, args })
    }

    /// A transient error: the channel keeps serving the previous good
    /// config, if any, but sees the discovery-client handle refreshed.
    pub fn error(error: ResolverError, args: ChannelArgs) -> Self {
        Self { service_config: None, error: Some(error), args }
    }

    /// The resource-does-not-exist pass: a parsed literal `{}`, no handles.
    pub fn empty(args: ChannelArgs) -> Self {
        // The literal `{}` must always be parser-acceptable; unwrap is safe.
        let service_config = serialize_and_verify(&serde_json::json!({})).expect("{} is always valid");
        Self { service_config: Some(service_config), error: None, args }
    }
}

/// Serialize a document and confirm the downstream service-config parser
/// would accept it, by round-tripping it through the same JSON parser.
///
/// The real parser's grammar is out of scope here; this guarantees the
/// weaker, always-true property the resolver actually owes the channel:
/// the text it emits is well-formed JSON.
fn serialize_and_verify(document: &Value) -> Result<String, ResolverError> {
    let text = serde_json::to_string(document)?;
    let _: Value = serde_json::from_str(&text)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_carries_only_the_config() {
        let result = ChannelResult::success(&serde_json::json!({"a": 1}), ChannelArgs::new()).unwrap();
        assert!(result.service_config.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn error_carries_only_the_error() {
        let result = ChannelResult::error(ResolverError::Construction("boom".into()), ChannelArgs::new());
        assert!(result.service_config.is_none());
        assert!(result.error.is_some());
    }

    #[test]
    fn empty_result_is_literal_empty_object() {
        let result = ChannelResult::empty(ChannelArgs::new());
        assert_eq!(result.service_config.as_deref(), Some("{}"));
        assert!(result.error.is_none());
    }
}
