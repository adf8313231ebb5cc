//! Route Discovery Service resource: the envoy wire format and its
//! translation into [`model::RouteUpdate`].

pub mod allocator;
pub mod formatter;
pub mod model;

use bytes::Bytes;
use prost::Message as _;
use xds_client::{DecodeResult, Error as ClientError, Resource, TypeUrl};

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, route::Action as RouteActionEnum,
    route_action::ClusterSpecifier, route_match::PathSpecifier, HeaderMatcher, Route as ProtoRoute,
    RouteConfiguration, RouteMatch,
};
use envoy_types::pb::envoy::r#type::matcher::v3::string_matcher::MatchPattern;
use envoy_types::pb::envoy::r#type::v3::fractional_percent::DenominatorType;

use model::{Action, CompiledRegex, HeaderMatch, HeaderMatchKind, PathMatch, Route, RouteUpdate, WeightedCluster};

const ROUTE_CONFIGURATION_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

/// A decoded route configuration, as delivered by the discovery client.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// The resource name (the route configuration name subscribed to).
    pub name: String,
    /// The routes it carries, in server-sent order.
    pub update: RouteUpdate,
}

impl Resource for RouteConfig {
    type Message = RouteConfiguration;

    const TYPE_URL: TypeUrl = TypeUrl::new(ROUTE_CONFIGURATION_TYPE_URL);

    // A management server may omit an unchanged route configuration from a
    // later SotW response; that is not a deletion. Only an explicit
    // "resource does not exist" from the cache (never having been seen) or a
    // later, truly empty update clears the listener watcher's route table.
    const ALL_RESOURCES_REQUIRED_IN_SOTW: bool = false;

    fn deserialize(bytes: Bytes) -> Result<Self::Message, ClientError> {
        RouteConfiguration::decode(bytes).map_err(ClientError::from)
    }

    fn name(message: &Self::Message) -> &str {
        &message.name
    }

    fn validate(message: Self::Message) -> Result<Self, ClientError> {
        let name = message.name.clone();
        let update = translate(message)?;
        Ok(Self { name, update })
    }
}

/// Decode a raw `RouteConfiguration` payload directly, bypassing the
/// discovery client's watcher machinery. Used by tests and by the formatter
/// when exercised against fixtures built from wire bytes.
pub fn decode(bytes: Bytes) -> DecodeResult<RouteConfig> {
    match RouteConfig::deserialize(bytes) {
        Ok(message) => {
            let name = RouteConfig::name(&message).to_string();
            match RouteConfig::validate(message) {
                Ok(resource) => DecodeResult::Success { name, resource },
                Err(error) => DecodeResult::ResourceError { name, error },
            }
        }
        Err(error) => DecodeResult::TopLevelError(error),
    }
}

fn translate(message: RouteConfiguration) -> Result<RouteUpdate, ClientError> {
    let mut routes = Vec::new();
    for vhost in &message.virtual_hosts {
        for proto_route in &vhost.routes {
            routes.push(translate_route(proto_route)?);
        }
    }
    Ok(RouteUpdate { routes })
}

fn translate_route(proto_route: &ProtoRoute) -> Result<Route, ClientError> {
    let route_match = proto_route
        .r#match
        .as_ref()
        .ok_or_else(|| ClientError::Validation("route is missing a match".into()))?;

    let path = translate_path(route_match)?;
    let headers = route_match
        .headers
        .iter()
        .map(translate_header)
        .collect::<Result<Vec<_>, _>>()?;
    let fraction = translate_fraction(route_match);
    let action = translate_action(proto_route)?;

    Ok(Route { path, headers, fraction, action })
}

fn translate_path(route_match: &RouteMatch) -> Result<PathMatch, ClientError> {
    match route_match
        .path_specifier
        .as_ref()
        .ok_or_else(|| ClientError::Validation("route match is missing a path specifier".into()))?
    {
        PathSpecifier::Prefix(prefix) => Ok(PathMatch::Prefix(prefix.clone())),
        PathSpecifier::Path(path) => Ok(PathMatch::Path(path.clone())),
        PathSpecifier::SafeRegex(regex) => CompiledRegex::new(regex.regex.clone())
            .map(PathMatch::Regex)
            .map_err(|e| ClientError::Validation(format!("invalid path regex: {e}"))),
        other => Err(ClientError::Validation(format!(
            "unsupported path specifier: {other:?}"
        ))),
    }
}

fn translate_header(header: &HeaderMatcher) -> Result<HeaderMatch, ClientError> {
    let kind = match header
        .header_match_specifier
        .as_ref()
        .ok_or_else(|| ClientError::Validation("header matcher is missing a specifier".into()))?
    {
        HeaderMatchSpecifier::ExactMatch(value) => HeaderMatchKind::Exact(value.clone()),
        HeaderMatchSpecifier::PrefixMatch(value) => HeaderMatchKind::Prefix(value.clone()),
        HeaderMatchSpecifier::SuffixMatch(value) => HeaderMatchKind::Suffix(value.clone()),
        HeaderMatchSpecifier::PresentMatch(present) => HeaderMatchKind::Present(*present),
        HeaderMatchSpecifier::RangeMatch(range) => HeaderMatchKind::Range {
            start: range.start,
            end: range.end,
        },
        HeaderMatchSpecifier::StringMatch(string_matcher) => match &string_matcher.match_pattern {
            Some(MatchPattern::Exact(value)) => HeaderMatchKind::Exact(value.clone()),
            Some(MatchPattern::Prefix(value)) => HeaderMatchKind::Prefix(value.clone()),
            Some(MatchPattern::Suffix(value)) => HeaderMatchKind::Suffix(value.clone()),
            Some(MatchPattern::SafeRegex(regex)) => HeaderMatchKind::Regex(regex.regex.clone()),
            other => {
                return Err(ClientError::Validation(format!(
                    "unsupported header string matcher: {other:?}"
                )))
            }
        },
        other => {
            return Err(ClientError::Validation(format!(
                "unsupported header match specifier: {other:?}"
            )))
        }
    };

    Ok(HeaderMatch {
        name: header.name.clone(),
        kind,
        invert: header.invert_match,
    })
}

fn translate_fraction(route_match: &RouteMatch) -> Option<u32> {
    let runtime_fraction = route_match.runtime_fraction.as_ref()?;
    let default_value = runtime_fraction.default_value.as_ref()?;

    let denominator = match DenominatorType::try_from(default_value.denominator) {
        Ok(DenominatorType::Hundred) => 100,
        Ok(DenominatorType::TenThousand) => 10_000,
        Ok(DenominatorType::Million) => 1_000_000,
        Err(_) => return None,
    };

    // Normalize to parts per million so every route's fraction is comparable
    // regardless of the denominator the control plane chose to express it in.
    let numerator = default_value.numerator as u64;
    Some(((numerator * 1_000_000) / denominator) as u32)
}

fn translate_action(proto_route: &ProtoRoute) -> Result<Action, ClientError> {
    match proto_route
        .action
        .as_ref()
        .ok_or_else(|| ClientError::Validation("route is missing an action".into()))?
    {
        RouteActionEnum::Route(route_action) => match route_action
            .cluster_specifier
            .as_ref()
            .ok_or_else(|| ClientError::Validation("route action is missing a cluster specifier".into()))?
        {
            ClusterSpecifier::Cluster(name) => Ok(Action::SingleCluster(name.clone())),
            ClusterSpecifier::WeightedClusters(weighted) => {
                if weighted.clusters.is_empty() {
                    return Err(ClientError::Validation(
                        "weighted_clusters action has no clusters".into(),
                    ));
                }
                let clusters = weighted
                    .clusters
                    .iter()
                    .map(|c| {
                        let weight = c
                            .weight
                            .as_ref()
                            .ok_or_else(|| {
                                ClientError::Validation(format!("cluster {} is missing a weight", c.name))
                            })?
                            .value;
                        Ok(WeightedCluster { name: c.name.clone(), weight })
                    })
                    .collect::<Result<Vec<_>, ClientError>>()?;
                Ok(Action::Weighted(clusters))
            }
            ClusterSpecifier::ClusterHeader(_) => Err(ClientError::Validation(
                "cluster_header routing is not supported".into(),
            )),
            other => Err(ClientError::Validation(format!(
                "unsupported cluster specifier: {other:?}"
            ))),
        },
        other => Err(ClientError::Validation(format!(
            "unsupported route action: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::envoy::config::route::v3::{
        weighted_cluster::ClusterWeight, RouteAction, VirtualHost, WeightedCluster as ProtoWeightedCluster,
    };
    use envoy_types::pb::google::protobuf::UInt32Value;

    fn route_config(routes: Vec<ProtoRoute>) -> RouteConfiguration {
        RouteConfiguration {
            name: "test-route".into(),
            virtual_hosts: vec![VirtualHost {
                name: "vhost".into(),
                domains: vec!["*".into()],
                routes,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn translates_single_cluster_prefix_route() {
        let config = route_config(vec![ProtoRoute {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/pkg.Svc/".into())),
                ..Default::default()
            }),
            action: Some(RouteActionEnum::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::Cluster("cluster-a".into())),
                ..Default::default()
            })),
            ..Default::default()
        }]);

        let update = translate(config).unwrap();
        assert_eq!(update.routes.len(), 1);
        assert_eq!(update.routes[0].action, Action::SingleCluster("cluster-a".into()));
        assert!(matches!(&update.routes[0].path, PathMatch::Prefix(p) if p == "/pkg.Svc/"));
    }

    #[test]
    fn translates_weighted_clusters_route() {
        let config = route_config(vec![ProtoRoute {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/".into())),
                ..Default::default()
            }),
            action: Some(RouteActionEnum::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::WeightedClusters(ProtoWeightedCluster {
                    clusters: vec![
                        ClusterWeight {
                            name: "a".into(),
                            weight: Some(UInt32Value { value: 30 }),
                            ..Default::default()
                        },
                        ClusterWeight {
                            name: "b".into(),
                            weight: Some(UInt32Value { value: 70 }),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                })),
                ..Default::default()
            })),
            ..Default::default()
        }]);

        let update = translate(config).unwrap();
        match &update.routes[0].action {
            Action::Weighted(clusters) => assert_eq!(clusters.len(), 2),
            _ => panic!("expected a weighted action"),
        }
    }

    #[test]
    fn rejects_route_with_no_match() {
        let config = route_config(vec![ProtoRoute { r#match: None, ..Default::default() }]);
        assert!(translate(config).is_err());
    }

    #[test]
    fn rejects_unsupported_cluster_header_routing() {
        let config = route_config(vec![ProtoRoute {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/".into())),
                ..Default::default()
            }),
            action: Some(RouteActionEnum::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::ClusterHeader("x-cluster".into())),
                ..Default::default()
            })),
            ..Default::default()
        }]);
        assert!(translate(config).is_err());
    }

    #[test]
    fn mixed_routes_with_header_matchers_translate_and_render_end_to_end() {
        use envoy_types::pb::envoy::config::route::v3::{
            header_matcher::HeaderMatchSpecifier as ProtoHeaderSpec, HeaderMatcher as ProtoHeaderMatcher,
        };

        let header_routed = ProtoRoute {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/pkg.Svc/Canary".into())),
                headers: vec![ProtoHeaderMatcher {
                    name: "x-canary".into(),
                    header_match_specifier: Some(ProtoHeaderSpec::ExactMatch("true".into())),
                    invert_match: false,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            action: Some(RouteActionEnum::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::Cluster("canary-cluster".into())),
                ..Default::default()
            })),
            ..Default::default()
        };
        let default_routed = ProtoRoute {
            r#match: Some(RouteMatch {
                path_specifier: Some(PathSpecifier::Prefix("/pkg.Svc/".into())),
                ..Default::default()
            }),
            action: Some(RouteActionEnum::Route(RouteAction {
                cluster_specifier: Some(ClusterSpecifier::WeightedClusters(ProtoWeightedCluster {
                    clusters: vec![
                        ClusterWeight {
                            name: "stable-a".into(),
                            weight: Some(UInt32Value { value: 80 }),
                            ..Default::default()
                        },
                        ClusterWeight {
                            name: "stable-b".into(),
                            weight: Some(UInt32Value { value: 20 }),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                })),
                ..Default::default()
            })),
            ..Default::default()
        };

        let config = route_config(vec![header_routed, default_routed]);
        let update = translate(config).unwrap();
        assert_eq!(update.routes.len(), 2);

        let (_state, lookup) = crate::route::allocator::allocate(
            &crate::route::allocator::AllocatorState::new(),
            &update.routes,
        );
        let doc = crate::route::formatter::format(&update, &lookup);

        let routes = doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"]
            .as_array()
            .unwrap();
        assert_eq!(routes[0]["prefix"], "/pkg.Svc/Canary");
        assert_eq!(routes[0]["headers"][0]["name"], "x-canary");
        assert_eq!(routes[0]["headers"][0]["exact_match"], "true");
        assert_eq!(routes[0]["action"], "cds:canary-cluster");

        assert_eq!(routes[1]["prefix"], "/pkg.Svc/");
        assert!(routes[1].get("headers").is_none());
        let weighted_action = routes[1]["action"].as_str().unwrap();
        assert!(weighted_action.starts_with("weighted:"));

        let actions = &doc["loadBalancingConfig"][0]["xds_routing_experimental"]["actions"];
        assert_eq!(actions["cds:canary-cluster"]["cds_experimental"]["cluster"], "canary-cluster");
        assert!(actions[weighted_action]["weighted_target_experimental"]["targets"]["stable-a"].is_object());
    }
}
