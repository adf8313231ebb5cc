//! The route update data model (spec §3).

use regex::Regex;

/// An ordered sequence of routes delivered by a single route-discovery update.
#[derive(Debug, Clone, Default)]
pub struct RouteUpdate {
    /// Routes in the order the management server sent them. Order is
    /// significant: the first matching route wins at the data plane, and the
    /// formatter must preserve this order in its output.
    pub routes: Vec<Route>,
}

/// A single route: a match predicate and the action to take when it matches.
#[derive(Debug, Clone)]
pub struct Route {
    /// The path matcher.
    pub path: PathMatch,
    /// Header matchers, in input order.
    pub headers: Vec<HeaderMatch>,
    /// An optional runtime fraction, in parts per million.
    pub fraction: Option<u32>,
    /// The action to take.
    pub action: Action,
}

/// A path-matching clause.
#[derive(Debug, Clone)]
pub enum PathMatch {
    /// Prefix match.
    Prefix(String),
    /// Exact path match.
    Path(String),
    /// Regex match. Carries the compiled pattern alongside the source string
    /// so routes remain reusable without recompiling.
    Regex(CompiledRegex),
}

/// A compiled regex alongside its source pattern.
///
/// `Regex` is neither `PartialEq` nor cheap to compare, so equality and
/// ordering are defined purely in terms of the source pattern — the compiled
/// form is derived state.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    /// The original pattern string, exactly as received from the control plane.
    pub pattern: String,
    /// The compiled form, used for matching against the config-selector layer
    /// (out of scope here, but part of the data the route carries).
    pub regex: Regex,
}

impl CompiledRegex {
    /// Compile a pattern, failing if it is not a valid regex.
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        let regex = Regex::new(&pattern)?;
        Ok(Self { pattern, regex })
    }
}

impl PartialEq for CompiledRegex {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for CompiledRegex {}

/// A single header-matching clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    /// The header name to match against.
    pub name: String,
    /// The match type and its associated value.
    pub kind: HeaderMatchKind,
    /// If set, the match result is inverted.
    pub invert: bool,
}

/// The type tag and value carried by a [`HeaderMatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMatchKind {
    /// Exact string match.
    Exact(String),
    /// Regex match. Source pattern only — compiling this is the concern of
    /// whatever evaluates the match at call time, out of scope here.
    Regex(String),
    /// Range match `[start, end)`.
    Range {
        /// Inclusive lower bound.
        start: i64,
        /// Exclusive upper bound.
        end: i64,
    },
    /// Header presence/absence match.
    Present(bool),
    /// Prefix match.
    Prefix(String),
    /// Suffix match.
    Suffix(String),
}

/// The action a matching route resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Route directly to a single named cluster.
    SingleCluster(String),
    /// Split traffic across a non-empty set of weighted clusters.
    Weighted(Vec<WeightedCluster>),
}

/// A single (cluster name, weight) pair within a weighted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedCluster {
    /// The cluster name.
    pub name: String,
    /// The non-negative weight.
    pub weight: u32,
}

impl Action {
    /// Compute the allocator's cluster-names key for a weighted action:
    /// cluster names, lexicographically sorted, joined with `_`.
    ///
    /// Returns `None` for single-cluster actions, which never go through the
    /// allocator.
    pub fn cluster_names_key(&self) -> Option<String> {
        match self {
            Action::SingleCluster(_) => None,
            Action::Weighted(clusters) => {
                let mut names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();
                names.sort_unstable();
                Some(names.join("_"))
            }
        }
    }

    /// Compute the allocator's cluster-weights key for a weighted action:
    /// each `name_weight` pair, sorted, joined with `_`.
    pub fn cluster_weights_key(&self) -> Option<String> {
        match self {
            Action::SingleCluster(_) => None,
            Action::Weighted(clusters) => {
                let mut parts: Vec<String> = clusters
                    .iter()
                    .map(|c| format!("{}_{}", c.name, c.weight))
                    .collect();
                parts.sort_unstable();
                Some(parts.join("_"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_names_key_is_sorted() {
        let action = Action::Weighted(vec![
            WeightedCluster { name: "B".into(), weight: 70 },
            WeightedCluster { name: "A".into(), weight: 30 },
        ]);
        assert_eq!(action.cluster_names_key().unwrap(), "A_B");
    }

    #[test]
    fn cluster_weights_key_is_sorted() {
        let action = Action::Weighted(vec![
            WeightedCluster { name: "B".into(), weight: 70 },
            WeightedCluster { name: "A".into(), weight: 30 },
        ]);
        assert_eq!(action.cluster_weights_key().unwrap(), "A_30_B_70");
    }

    #[test]
    fn single_cluster_has_no_allocator_keys() {
        let action = Action::SingleCluster("C".into());
        assert_eq!(action.cluster_names_key(), None);
        assert_eq!(action.cluster_weights_key(), None);
    }

    #[test]
    fn compiled_regex_equality_ignores_compiled_form() {
        let a = CompiledRegex::new("^/y$").unwrap();
        let b = CompiledRegex::new("^/y$").unwrap();
        assert_eq!(a, b);
    }
}
