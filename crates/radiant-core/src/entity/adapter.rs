// Generic normalized collection: entities keyed by primary key plus unique
// secondary indexes.
//
// Every container inside `EntityState` sits behind an `Arc`, and all writes go
// through `Arc::make_mut`. A write clones a container only while it is still
// shared with an older snapshot, so the first change in a batch pays for one
// copy and every later change in the same batch mutates in place. Operations
// that change nothing hand back a state whose containers are the very same
// allocations as the input, which lets readers detect "nothing happened" with
// a pointer comparison.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Primary key type shared by every entity the backend sends.
pub type Pk = i64;

/// Key stored in a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Int(i64),
    Text(String),
}

impl From<i64> for IndexKey {
    fn from(value: i64) -> Self {
        IndexKey::Int(value)
    }
}

impl From<String> for IndexKey {
    fn from(value: String) -> Self {
        IndexKey::Text(value)
    }
}

impl From<&str> for IndexKey {
    fn from(value: &str) -> Self {
        IndexKey::Text(value.to_string())
    }
}

/// Anything with a stable integer primary key.
pub trait Entity: Clone {
    fn pk(&self) -> Pk;
}

/// Returns `true` when `next` differs observably from `current`.
pub type ChangeDetector<T> = fn(current: &T, next: &T) -> bool;

/// A declared secondary index: a name plus a key extractor. Entities whose
/// extractor returns `None` are simply not indexed.
pub struct IndexSpec<T> {
    pub name: &'static str,
    pub key: fn(&T) -> Option<IndexKey>,
}

impl<T> Clone for IndexSpec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for IndexSpec<T> {}

impl<T> fmt::Debug for IndexSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec").field("name", &self.name).finish()
    }
}

type IndexMap = HashMap<IndexKey, Pk>;

// ---------------------------------------------------------------------------
// EntityState
// ---------------------------------------------------------------------------

/// Immutable snapshot of a normalized collection.
///
/// Cloning is cheap (reference-count bumps only). Two snapshots share an
/// allocation exactly when nothing was written between them.
pub struct EntityState<T> {
    entities: Arc<BTreeMap<Pk, Arc<T>>>,
    indexes: Arc<BTreeMap<&'static str, Arc<IndexMap>>>,
}

impl<T> Clone for EntityState<T> {
    fn clone(&self) -> Self {
        Self {
            entities: Arc::clone(&self.entities),
            indexes: Arc::clone(&self.indexes),
        }
    }
}

impl<T> Default for EntityState<T> {
    fn default() -> Self {
        Self {
            entities: Arc::new(BTreeMap::new()),
            indexes: Arc::new(BTreeMap::new()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityState")
            .field("entities", &self.entities)
            .field("indexes", &self.indexes)
            .finish()
    }
}

impl<T> EntityState<T> {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, pk: Pk) -> Option<&Arc<T>> {
        self.entities.get(&pk)
    }

    pub fn contains(&self, pk: Pk) -> bool {
        self.entities.contains_key(&pk)
    }

    /// Entities in ascending primary-key order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entities.values()
    }

    pub fn pks(&self) -> impl Iterator<Item = Pk> + '_ {
        self.entities.keys().copied()
    }

    /// Resolve a secondary index entry to its entity.
    pub fn get_by_index(&self, index: &str, key: &IndexKey) -> Option<&Arc<T>> {
        let pk = self.indexes.get(index)?.get(key)?;
        self.entities.get(pk)
    }

    /// Raw view of one index, mostly useful for consistency checks.
    pub fn index_entries(&self, index: &str) -> Option<&HashMap<IndexKey, Pk>> {
        self.indexes.get(index).map(|m| &**m)
    }

    /// Names of the indexes present in this snapshot.
    pub fn index_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.indexes.keys().copied()
    }

    /// `true` when both snapshots share the same entity map allocation.
    pub fn same_entities(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entities, &other.entities)
    }

    /// `true` when both snapshots share every top-level allocation, i.e. no
    /// write happened between them.
    pub fn same_as(&self, other: &Self) -> bool {
        self.same_entities(other) && Arc::ptr_eq(&self.indexes, &other.indexes)
    }
}

// ---------------------------------------------------------------------------
// EntityAdapter
// ---------------------------------------------------------------------------

/// Stateless operations over `EntityState<T>` for one entity schema.
pub struct EntityAdapter<T> {
    indexes: Vec<IndexSpec<T>>,
    has_changed: ChangeDetector<T>,
}

impl<T> fmt::Debug for EntityAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityAdapter")
            .field("indexes", &self.indexes)
            .finish_non_exhaustive()
    }
}

impl<T: Entity + PartialEq> EntityAdapter<T> {
    /// Adapter whose change detection compares every field via `PartialEq`.
    pub fn new() -> Self {
        Self::with_change_detector(|current, next| current != next)
    }
}

impl<T: Entity + PartialEq> Default for EntityAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityAdapter<T> {
    pub fn with_change_detector(has_changed: ChangeDetector<T>) -> Self {
        Self {
            indexes: Vec::new(),
            has_changed,
        }
    }

    /// Declare a unique secondary index.
    pub fn with_index(mut self, name: &'static str, key: fn(&T) -> Option<IndexKey>) -> Self {
        self.indexes.push(IndexSpec { name, key });
        self
    }

    pub fn index_specs(&self) -> &[IndexSpec<T>] {
        &self.indexes
    }

    /// Empty entity map plus one empty map per declared index.
    pub fn initial_state(&self) -> EntityState<T> {
        let indexes = self
            .indexes
            .iter()
            .map(|spec| (spec.name, Arc::new(IndexMap::new())))
            .collect();
        EntityState {
            entities: Arc::new(BTreeMap::new()),
            indexes: Arc::new(indexes),
        }
    }

    /// Insert or replace one entity. Returns `state` itself (same allocations)
    /// when an entity with the same pk exists and the change detector reports
    /// no difference.
    pub fn upsert_one(&self, state: &EntityState<T>, entity: T) -> EntityState<T> {
        self.upsert_many(state, std::iter::once(entity))
    }

    /// Upsert a batch. The entity map is copied at most once, on the first
    /// entity that actually changes; an all-unchanged batch returns `state`.
    pub fn upsert_many<I>(&self, state: &EntityState<T>, entities: I) -> EntityState<T>
    where
        I: IntoIterator<Item = T>,
    {
        let mut next = state.clone();
        for entity in entities {
            let pk = entity.pk();
            let previous = next.entities.get(&pk).cloned();
            if let Some(existing) = previous.as_deref() {
                if !(self.has_changed)(existing, &entity) {
                    continue;
                }
            }
            self.update_indexes_for_entity(&mut next, pk, previous.as_deref(), Some(&entity));
            Arc::make_mut(&mut next.entities).insert(pk, Arc::new(entity));
        }
        next
    }

    /// Write an entity into `state` in place, skipping change detection.
    ///
    /// For caches that decide on their own whether an update is observable.
    /// Copy-on-write still applies: the first write into a snapshot that is
    /// shared with another holder clones the containers it touches.
    pub fn write_entity(&self, state: &mut EntityState<T>, entity: T) {
        let pk = entity.pk();
        let previous = state.entities.get(&pk).cloned();
        self.update_indexes_for_entity(state, pk, previous.as_deref(), Some(&entity));
        Arc::make_mut(&mut state.entities).insert(pk, Arc::new(entity));
    }

    /// Remove one entity and its index entries. Unknown pks leave the state
    /// untouched.
    pub fn remove_one(&self, state: &EntityState<T>, pk: Pk) -> EntityState<T> {
        self.remove_many(state, std::iter::once(pk))
    }

    pub fn remove_many<I>(&self, state: &EntityState<T>, pks: I) -> EntityState<T>
    where
        I: IntoIterator<Item = Pk>,
    {
        let mut next = state.clone();
        for pk in pks {
            let Some(existing) = next.entities.get(&pk).cloned() else {
                continue;
            };
            self.update_indexes_for_entity(&mut next, pk, Some(&existing), None);
            Arc::make_mut(&mut next.entities).remove(&pk);
        }
        next
    }

    pub fn select_by_id<'a>(&self, state: &'a EntityState<T>, pk: Pk) -> Option<&'a Arc<T>> {
        state.get(pk)
    }

    pub fn select_all<'a>(&self, state: &'a EntityState<T>) -> Vec<&'a Arc<T>> {
        state.iter().collect()
    }

    pub fn select_by_index<'a>(
        &self,
        state: &'a EntityState<T>,
        index: &str,
        key: &IndexKey,
    ) -> Option<&'a Arc<T>> {
        state.get_by_index(index, key)
    }

    /// Move the index entries of `pk` from the keys of `previous` to the keys
    /// of `next`. Only indexes whose key actually changed are touched (and
    /// therefore copied). `None` on either side means "not present".
    pub fn update_indexes_for_entity(
        &self,
        state: &mut EntityState<T>,
        pk: Pk,
        previous: Option<&T>,
        next: Option<&T>,
    ) {
        for spec in &self.indexes {
            let old_key = previous.and_then(spec.key);
            let new_key = next.and_then(spec.key);
            if old_key == new_key {
                continue;
            }

            let indexes = Arc::make_mut(&mut state.indexes);
            let index = Arc::make_mut(indexes.entry(spec.name).or_default());
            if let Some(old) = old_key {
                // Another entity may have claimed the key since; leave it be.
                if index.get(&old) == Some(&pk) {
                    index.remove(&old);
                }
            }
            if let Some(new) = new_key {
                index.insert(new, pk);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
