//! Heterogeneous meta bag: a map keyed by meta-type. Typed `get`/`set` return present/absent rather
//! than erroring; accessing an absent meta type is a recoverable miss.

pub mod types;

pub use types::{
    ClassificationObject, ColorFormat, HceDataMetaBufType, HceDatabaseMeta, InferenceTimeStamp, ObjectAssociate,
    PointClouds, RadarConfig, SendController, TimeStamp, TrackerOutput,
};

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A map from a compile-time type-tag to an owned, reference-counted value.
/// Cloning a `MetaBag` is cheap (each entry is an `Arc` clone) so it can ride
/// along with a cloned `Buffer` when a worker forwards a modified copy.
#[derive(Clone, Default)]
pub struct MetaBag {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl MetaBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole typed entry atomically.
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.entries.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> bool {
        self.entries.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for MetaBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaBag").field("len", &self.entries.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_meta_type_is_a_miss_not_a_failure() {
        let bag = MetaBag::new();
        assert!(bag.get::<HceDatabaseMeta>().is_none());
    }

    #[test]
    fn set_replaces_whole_entry() {
        let mut bag = MetaBag::new();
        let mut first = HceDatabaseMeta::default();
        first.media_uri = "a".into();
        bag.set(first);
        let mut second = HceDatabaseMeta::default();
        second.media_uri = "b".into();
        bag.set(second);
        assert_eq!(bag.get::<HceDatabaseMeta>().unwrap().media_uri, "b");
    }
}
