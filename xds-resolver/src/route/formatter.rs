//! The update formatter (spec §4.1): renders a route update into the
//! `xds_routing_experimental` service-config document.

use std::collections::HashSet;

use serde_json::{json, Value};

use super::allocator::NameLookup;
use super::model::{Action, HeaderMatch, HeaderMatchKind, PathMatch, Route, RouteUpdate};

/// Render a route update into its service-config document.
///
/// `lookup` supplies the stable names for weighted actions in this update,
/// as produced by the allocator against the same route list.
pub fn format(update: &RouteUpdate, lookup: &NameLookup) -> Value {
    let mut actions = serde_json::Map::new();
    let mut seen_action_names: HashSet<String> = HashSet::new();
    let mut routes = Vec::with_capacity(update.routes.len());

    for route in &update.routes {
        let action_name = action_name(route, lookup);
        if seen_action_names.insert(action_name.clone()) {
            actions.insert(action_name.clone(), format_action_entry(route, lookup));
        }
        routes.push(format_route_entry(route, &action_name));
    }

    json!({
        "loadBalancingConfig": [
            { "xds_routing_experimental": {
                "actions": Value::Object(actions),
                "routes": routes,
            } }
        ]
    })
}

/// The empty document delivered on "resource does not exist" (spec §4.3).
pub fn empty() -> Value {
    json!({})
}

fn action_name(route: &Route, lookup: &NameLookup) -> String {
    match &route.action {
        Action::SingleCluster(cluster) => format!("cds:{cluster}"),
        Action::Weighted(_) => format!("weighted:{}", lookup.name_for(&route.action)),
    }
}

fn format_action_entry(route: &Route, lookup: &NameLookup) -> Value {
    match &route.action {
        Action::SingleCluster(cluster) => json!({
            "cds_experimental": { "cluster": cluster }
        }),
        Action::Weighted(clusters) => {
            let _ = lookup.name_for(&route.action); // asserts the allocator covers this action
            let mut targets = serde_json::Map::new();
            for cluster in clusters {
                targets.insert(
                    cluster.name.clone(),
                    json!({
                        "weight": cluster.weight,
                        "childPolicy": [
                            { "cds_experimental": { "cluster": cluster.name } }
                        ],
                    }),
                );
            }
            json!({
                "weighted_target_experimental": { "targets": Value::Object(targets) }
            })
        }
    }
}

fn format_route_entry(route: &Route, action_name: &str) -> Value {
    let mut entry = serde_json::Map::new();

    match &route.path {
        PathMatch::Prefix(prefix) => {
            entry.insert("prefix".into(), json!(prefix));
        }
        PathMatch::Path(path) => {
            entry.insert("path".into(), json!(path));
        }
        PathMatch::Regex(regex) => {
            entry.insert("regex".into(), json!(regex.pattern));
        }
    }

    if !route.headers.is_empty() {
        entry.insert(
            "headers".into(),
            Value::Array(route.headers.iter().map(format_header_entry).collect()),
        );
    }

    if let Some(fraction) = route.fraction {
        entry.insert("match_fraction".into(), json!(fraction));
    }

    entry.insert("action".into(), json!(action_name));

    Value::Object(entry)
}

fn format_header_entry(header: &HeaderMatch) -> Value {
    let mut entry = serde_json::Map::new();
    entry.insert("name".into(), json!(header.name));

    match &header.kind {
        HeaderMatchKind::Exact(value) => {
            entry.insert("exact_match".into(), json!(value));
        }
        HeaderMatchKind::Regex(pattern) => {
            entry.insert("regex_match".into(), json!(pattern));
        }
        HeaderMatchKind::Range { start, end } => {
            entry.insert("range_match".into(), json!({ "start": start, "end": end }));
        }
        HeaderMatchKind::Present(present) => {
            entry.insert("present_match".into(), json!(present));
        }
        HeaderMatchKind::Prefix(value) => {
            entry.insert("prefix_match".into(), json!(value));
        }
        HeaderMatchKind::Suffix(value) => {
            entry.insert("suffix_match".into(), json!(value));
        }
    }

    if header.invert {
        entry.insert("invert_match".into(), json!(true));
    }

    Value::Object(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::allocator::{allocate, AllocatorState};
    use crate::route::model::{CompiledRegex, WeightedCluster};

    fn single_prefix_route() -> Route {
        Route {
            path: PathMatch::Prefix("/svc.S/".into()),
            headers: vec![],
            fraction: None,
            action: Action::SingleCluster("C".into()),
        }
    }

    #[test]
    fn single_prefix_cds_route_renders_expected_shape() {
        let update = RouteUpdate { routes: vec![single_prefix_route()] };
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);

        let routes = doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"]
            .as_array()
            .unwrap();
        assert_eq!(routes[0]["prefix"], "/svc.S/");
        assert_eq!(routes[0]["action"], "cds:C");

        let actions = &doc["loadBalancingConfig"][0]["xds_routing_experimental"]["actions"];
        assert_eq!(actions["cds:C"]["cds_experimental"]["cluster"], "C");
    }

    #[test]
    fn weighted_route_renders_targets_in_input_order() {
        let route = Route {
            path: PathMatch::Prefix("/".into()),
            headers: vec![],
            fraction: None,
            action: Action::Weighted(vec![
                WeightedCluster { name: "A".into(), weight: 30 },
                WeightedCluster { name: "B".into(), weight: 70 },
            ]),
        };
        let update = RouteUpdate { routes: vec![route] };
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);

        let action_name = doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"][0]["action"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(action_name, "weighted:A_B_0");

        let targets = &doc["loadBalancingConfig"][0]["xds_routing_experimental"]["actions"][&action_name]
            ["weighted_target_experimental"]["targets"];
        assert_eq!(targets["A"]["weight"], 30);
        assert_eq!(targets["B"]["weight"], 70);
    }

    #[test]
    fn duplicate_actions_emit_once_but_every_route() {
        let update = RouteUpdate {
            routes: vec![single_prefix_route(), single_prefix_route()],
        };
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);

        let routes = doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"]
            .as_array()
            .unwrap();
        assert_eq!(routes.len(), 2);
        let actions = doc["loadBalancingConfig"][0]["xds_routing_experimental"]["actions"]
            .as_object()
            .unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn header_and_fraction_clauses_are_conditional() {
        let route = Route {
            path: PathMatch::Path("/exact".into()),
            headers: vec![HeaderMatch {
                name: "x-env".into(),
                kind: HeaderMatchKind::Exact("prod".into()),
                invert: true,
            }],
            fraction: Some(250_000),
            action: Action::SingleCluster("C".into()),
        };
        let update = RouteUpdate { routes: vec![route] };
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);

        let entry = &doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"][0];
        assert_eq!(entry["match_fraction"], 250_000);
        assert_eq!(entry["headers"][0]["name"], "x-env");
        assert_eq!(entry["headers"][0]["exact_match"], "prod");
        assert_eq!(entry["headers"][0]["invert_match"], true);
    }

    #[test]
    fn each_header_matcher_kind_renders_its_own_key() {
        fn header_entry(kind: HeaderMatchKind) -> Value {
            let route = Route {
                path: PathMatch::Prefix("/".into()),
                headers: vec![HeaderMatch { name: "x-h".into(), kind, invert: false }],
                fraction: None,
                action: Action::SingleCluster("C".into()),
            };
            let update = RouteUpdate { routes: vec![route] };
            let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
            let doc = format(&update, &lookup);
            doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"][0]["headers"][0].clone()
        }

        let entry = header_entry(HeaderMatchKind::Regex("^foo.*$".into()));
        assert_eq!(entry["regex_match"], "^foo.*$");

        let entry = header_entry(HeaderMatchKind::Range { start: 1, end: 10 });
        assert_eq!(entry["range_match"]["start"], 1);
        assert_eq!(entry["range_match"]["end"], 10);

        let entry = header_entry(HeaderMatchKind::Present(true));
        assert_eq!(entry["present_match"], true);

        let entry = header_entry(HeaderMatchKind::Prefix("pre-".into()));
        assert_eq!(entry["prefix_match"], "pre-");

        let entry = header_entry(HeaderMatchKind::Suffix("-suf".into()));
        assert_eq!(entry["suffix_match"], "-suf");
    }

    #[test]
    fn route_without_headers_omits_headers_key() {
        let update = RouteUpdate { routes: vec![single_prefix_route()] };
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);
        let entry = &doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"][0];
        assert!(entry.get("headers").is_none());
    }

    #[test]
    fn regex_path_renders_pattern_not_compiled_form() {
        let route = Route {
            path: PathMatch::Regex(CompiledRegex::new("^/y.*$").unwrap()),
            headers: vec![],
            fraction: None,
            action: Action::SingleCluster("C".into()),
        };
        let update = RouteUpdate { routes: vec![route] };
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);
        let entry = &doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"][0];
        assert_eq!(entry["regex"], "^/y.*$");
    }

    #[test]
    fn empty_update_renders_no_routes_or_actions() {
        let update = RouteUpdate::default();
        let (_state, lookup) = allocate(&AllocatorState::new(), &update.routes);
        let doc = format(&update, &lookup);
        assert!(doc["loadBalancingConfig"][0]["xds_routing_experimental"]["routes"]
            .as_array()
            .unwrap()
            .is_empty());
        assert!(doc["loadBalancingConfig"][0]["xds_routing_experimental"]["actions"]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn resource_does_not_exist_renders_literal_empty_object() {
        assert_eq!(empty(), json!({}));
    }
}
