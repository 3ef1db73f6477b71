// meta.rs - Typed metadata attached to buffers
use gpu_context::GpuError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What happens to a metadata entry when its buffer is duplicated onto
/// another pipeline branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchPolicy {
    /// Both buffers hold the same `Arc`. Only valid for data consumers treat
    /// as read-only.
    Share,
    /// The duplicate receives an independent copy made with
    /// [`BufferMeta::deep_copy`].
    DeepCopy,
}

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("deep copy of {kind} failed: {source}")]
    DeepCopy {
        kind: &'static str,
        #[source]
        source: GpuError,
    },
    #[error("{0} does not support deep copies")]
    NotCopyable(&'static str),
}

/// A metadata kind that can be attached to a [`crate::VideoBuffer`].
pub trait BufferMeta: Send + Sync + 'static {
    const KIND: &'static str;
    const BRANCH_POLICY: BranchPolicy;

    fn deep_copy(&self) -> Result<Self, MetaError>
    where
        Self: Sized,
    {
        Err(MetaError::NotCopyable(Self::KIND))
    }
}

trait ErasedMeta: Send + Sync {
    fn kind(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn branch(&self) -> Result<Box<dyn ErasedMeta>, MetaError>;
}

struct Entry<T: BufferMeta>(Arc<T>);

impl<T: BufferMeta> ErasedMeta for Entry<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn branch(&self) -> Result<Box<dyn ErasedMeta>, MetaError> {
        let branched = match T::BRANCH_POLICY {
            BranchPolicy::Share => Arc::clone(&self.0),
            BranchPolicy::DeepCopy => Arc::new(self.0.deep_copy()?),
        };
        Ok(Box::new(Entry(branched)))
    }
}

/// Per-buffer side table of metadata, at most one entry per kind.
#[derive(Default)]
pub struct MetaTable {
    entries: HashMap<TypeId, Box<dyn ErasedMeta>>,
}

impl MetaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `meta`, returning the entry of the same kind it replaced.
    pub fn insert<T: BufferMeta>(&mut self, meta: Arc<T>) -> Option<Arc<T>> {
        self.entries
            .insert(TypeId::of::<T>(), Box::new(Entry(meta)))
            .and_then(|old| old.into_any().downcast::<Entry<T>>().ok())
            .map(|entry| entry.0)
    }

    pub fn get<T: BufferMeta>(&self) -> Option<&Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.as_any().downcast_ref::<Entry<T>>())
            .map(|entry| &entry.0)
    }

    pub fn remove<T: BufferMeta>(&mut self) -> Option<Arc<T>> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|entry| entry.into_any().downcast::<Entry<T>>().ok())
            .map(|entry| entry.0)
    }

    pub fn contains<T: BufferMeta>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.entries.values().map(|e| e.kind()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Apply every entry's branch policy. Entries that fail to branch are left
    /// out of the new table and reported alongside it.
    pub fn branch(&self) -> (MetaTable, Vec<MetaError>) {
        let mut table = MetaTable::new();
        let mut errors = Vec::new();
        for (type_id, entry) in &self.entries {
            match entry.branch() {
                Ok(branched) => {
                    table.entries.insert(*type_id, branched);
                }
                Err(e) => errors.push(e),
            }
        }
        (table, errors)
    }
}

impl fmt::Debug for MetaTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Shared(u32);

    impl BufferMeta for Shared {
        const KIND: &'static str = "shared";
        const BRANCH_POLICY: BranchPolicy = BranchPolicy::Share;
    }

    #[derive(Debug, PartialEq)]
    struct Copied(Vec<u8>);

    impl BufferMeta for Copied {
        const KIND: &'static str = "copied";
        const BRANCH_POLICY: BranchPolicy = BranchPolicy::DeepCopy;

        fn deep_copy(&self) -> Result<Self, MetaError> {
            Ok(Copied(self.0.clone()))
        }
    }

    struct Broken;

    impl BufferMeta for Broken {
        const KIND: &'static str = "broken";
        const BRANCH_POLICY: BranchPolicy = BranchPolicy::DeepCopy;
    }

    #[test]
    fn one_entry_per_kind() {
        let mut table = MetaTable::new();
        assert!(table.insert(Arc::new(Shared(1))).is_none());
        let replaced = table.insert(Arc::new(Shared(2))).unwrap();
        assert_eq!(*replaced, Shared(1));
        assert_eq!(table.len(), 1);
        assert_eq!(**table.get::<Shared>().unwrap(), Shared(2));
        assert!(table.get::<Copied>().is_none());
    }

    #[test]
    fn branch_follows_each_policy() {
        let mut table = MetaTable::new();
        let shared = Arc::new(Shared(7));
        let copied = Arc::new(Copied(vec![1, 2, 3]));
        table.insert(Arc::clone(&shared));
        table.insert(Arc::clone(&copied));

        let (branched, errors) = table.branch();
        assert!(errors.is_empty());
        assert!(Arc::ptr_eq(branched.get::<Shared>().unwrap(), &shared));
        let copy = branched.get::<Copied>().unwrap();
        assert!(!Arc::ptr_eq(copy, &copied));
        assert_eq!(**copy, Copied(vec![1, 2, 3]));
        assert_eq!(Arc::strong_count(&shared), 3);
    }

    #[test]
    fn failed_branch_drops_only_that_entry() {
        let mut table = MetaTable::new();
        table.insert(Arc::new(Shared(1)));
        table.insert(Arc::new(Broken));

        let (branched, errors) = table.branch();
        assert_eq!(branched.kinds(), vec!["shared"]);
        assert!(matches!(errors.as_slice(), [MetaError::NotCopyable("broken")]));
    }

    #[test]
    fn remove_hands_back_the_entry() {
        let mut table = MetaTable::new();
        table.insert(Arc::new(Shared(5)));
        assert_eq!(*table.remove::<Shared>().unwrap(), Shared(5));
        assert!(table.is_empty());
        assert!(table.remove::<Shared>().is_none());
    }
}
