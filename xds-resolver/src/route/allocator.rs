//! The weighted-cluster name allocator (spec §4.2).
//!
//! Implemented as a pure function `allocate(old_state, routes) -> (new_state,
//! name_lookup)` rather than a mutating object, per the design note that this
//! makes the stability/recycling invariants directly testable.

use indexmap::IndexMap;
use std::collections::HashMap;

use super::model::{Action, Route};

/// Per-names-group state: the allocated indices for each weights key seen
/// under this names key, plus the next index to hand out for a genuinely new
/// weights key.
#[derive(Debug, Clone, Default)]
struct NamesGroup {
    /// weights key -> allocated index, in insertion order (level 2 map).
    indices: IndexMap<String, u32>,
    next_index: u32,
}

/// The allocator's persistent state: the two-level map from spec §3.
#[derive(Debug, Clone, Default)]
pub struct AllocatorState {
    /// names key -> group.
    groups: IndexMap<String, NamesGroup>,
}

impl AllocatorState {
    /// An empty allocator, as created for a freshly constructed resolver.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Maps a weighted action's cluster-weights key to its allocated name, for
/// every weighted action referenced in the update just applied.
#[derive(Debug, Clone, Default)]
pub struct NameLookup {
    /// weights key -> allocated name (`<names key>_<index>`).
    names: HashMap<String, String>,
}

impl NameLookup {
    /// Look up the allocated name for a weighted action.
    ///
    /// Per spec §4.2 "Name retrieval", the lookup must succeed for any action
    /// that was part of the update the allocator was just run against; a miss
    /// is a programming error.
    pub fn name_for(&self, action: &Action) -> &str {
        let weights_key = action
            .cluster_weights_key()
            .expect("name_for called on a non-weighted action");
        self.names
            .get(&weights_key)
            .unwrap_or_else(|| panic!("allocator has no name for weights key {weights_key:?}; it must be updated before names are retrieved for the same update"))
    }
}

/// Run the allocator procedure (spec §4.2, steps 1-4) against a new update's
/// routes, producing the new allocator state and a lookup table for the
/// names assigned in this pass.
pub fn allocate(old_state: &AllocatorState, routes: &[Route]) -> (AllocatorState, NameLookup) {
    // Step 1: collect the set of unique weighted actions, keyed by weights key,
    // remembering each one's names key. Duplicates collapse to one entry.
    let mut to_process: IndexMap<String, String> = IndexMap::new(); // weights key -> names key
    for route in routes {
        if let (Some(names_key), Some(weights_key)) = (
            route.action.cluster_names_key(),
            route.action.cluster_weights_key(),
        ) {
            to_process.entry(weights_key).or_insert(names_key);
        }
    }

    // Work on a scratch copy of the old groups so we can pop entries out of it
    // as they're carried forward or recycled (step 2/3 "remove from the old map").
    let mut old_groups = old_state.groups.clone();
    let mut new_groups: IndexMap<String, NamesGroup> = IndexMap::new();
    let mut lookup = NameLookup::default();

    // Step 2: carry forward exact matches.
    to_process.retain(|weights_key, names_key| {
        let Some(old_group) = old_groups.get_mut(names_key) else {
            return true; // names key unknown to the old allocator; keep for step 3
        };
        let Some(index) = old_group.indices.shift_remove(weights_key) else {
            return true; // weights key unknown under this names key; keep for step 3
        };

        let new_group = new_groups.entry(names_key.clone()).or_insert_with(|| NamesGroup {
            indices: IndexMap::new(),
            next_index: old_group.next_index,
        });
        new_group.indices.insert(weights_key.clone(), index);
        lookup.names.insert(weights_key.clone(), format!("{names_key}_{index}"));

        false // carried forward, drop from the to-process set
    });

    // Step 3: recycle or allocate for everything left over.
    for (weights_key, names_key) in to_process {
        let recycled = old_groups
            .get_mut(&names_key)
            .and_then(|group| group.indices.shift_remove_index(0))
            .map(|(_, index)| index);

        let new_group = new_groups
            .entry(names_key.clone())
            .or_insert_with(|| NamesGroup {
                indices: IndexMap::new(),
                next_index: old_groups.get(&names_key).map(|g| g.next_index).unwrap_or(0),
            });

        let index = match recycled {
            Some(index) => index,
            None => {
                let index = new_group.next_index;
                new_group.next_index += 1;
                index
            }
        };

        new_group.indices.insert(weights_key.clone(), index);
        lookup.names.insert(weights_key, format!("{names_key}_{index}"));
    }

    // Step 4: commit. Anything left in `old_groups` — whole names groups not
    // referenced in the new update, or leftover weights entries within a
    // referenced group — is simply not copied into `new_groups`.
    (AllocatorState { groups: new_groups }, lookup)
}
