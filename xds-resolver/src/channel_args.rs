//! Opaque, type-keyed channel argument bundle (spec §6).
//!
//! Grounded in the gRPC channel `Attributes` pattern: a map keyed by the
//! value's `TypeId` rather than a string, so unrelated layers can stash
//! strongly-typed handles on the same bundle without naming collisions.
//! Unlike that pattern this bundle does not need structural equality, so
//! entries only need `Send + Sync + 'static`, not `Eq + Ord`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A cloneable bundle of opaque, strongly-typed values threaded through the
/// channel alongside each resolver result.
#[derive(Clone, Default)]
pub struct ChannelArgs {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ChannelArgs {
    /// An empty argument bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new bundle with `value` added (or replacing any existing
    /// value of the same type). The receiver is left unmodified.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let mut values = self.values.clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self { values }
    }

    /// Returns a new bundle with any value of type `T` removed.
    #[must_use]
    pub fn without<T: 'static>(&self) -> Self {
        let mut values = self.values.clone();
        values.remove(&TypeId::of::<T>());
        Self { values }
    }

    /// Borrow the value of type `T`, if present.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }
}

impl fmt::Debug for ChannelArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelArgs")
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct DiscoveryHandle(u64);

    #[derive(Debug, PartialEq)]
    struct ConfigSelector(&'static str);

    #[test]
    fn with_adds_and_get_retrieves() {
        let args = ChannelArgs::new().with(DiscoveryHandle(1));
        assert_eq!(args.get::<DiscoveryHandle>(), Some(&DiscoveryHandle(1)));
        assert_eq!(args.get::<ConfigSelector>(), None);
    }

    #[test]
    fn with_does_not_mutate_the_original() {
        let base = ChannelArgs::new();
        let augmented = base.with(DiscoveryHandle(1));
        assert_eq!(base.get::<DiscoveryHandle>(), None);
        assert_eq!(augmented.get::<DiscoveryHandle>(), Some(&DiscoveryHandle(1)));
    }

    #[test]
    fn without_removes_only_the_named_type() {
        let args = ChannelArgs::new()
            .with(DiscoveryHandle(1))
            .with(ConfigSelector("selector"));
        let reduced = args.without::<ConfigSelector>();
        assert_eq!(reduced.get::<DiscoveryHandle>(), Some(&DiscoveryHandle(1)));
        assert_eq!(reduced.get::<ConfigSelector>(), None);
    }

    #[test]
    fn with_replaces_an_existing_value_of_the_same_type() {
        let args = ChannelArgs::new().with(DiscoveryHandle(1)).with(DiscoveryHandle(2));
        assert_eq!(args.get::<DiscoveryHandle>(), Some(&DiscoveryHandle(2)));
    }
}
