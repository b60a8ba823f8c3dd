//! Object registry: stable integer ids for live native instances.
//!
//! Identity is the instance allocation, so registering the same `Arc` twice
//! yields the same id. Ids are allocated from 1 upward and never reused, even
//! after release. Every reference remembers which connections were handed
//! it; a disconnect drops the connection from each owner set and releases the
//! references nobody else holds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kestrel_core::ObjectId;
use parking_lot::Mutex;

use super::native::Instance;
use super::operation::CallError;
use crate::network::ConnectionId;

/// An id handed out for an instance, with the class it was registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    pub id: ObjectId,
    /// `Service.Class`.
    pub class: String,
}

struct Entry {
    instance: Instance,
    class: String,
    owners: HashSet<ConnectionId>,
}

struct Tables {
    by_id: HashMap<ObjectId, Entry>,
    by_addr: HashMap<usize, ObjectId>,
    next_id: u64,
    closed: HashSet<ConnectionId>,
}

fn addr(instance: &Instance) -> usize {
    Arc::as_ptr(instance).cast::<()>() as usize
}

/// Bidirectional id/instance map behind a single lock.
///
/// The lock only covers table updates; handlers never run under it.
pub struct ObjectRegistry {
    tables: Mutex<Tables>,
}

impl ObjectRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                by_id: HashMap::new(),
                by_addr: HashMap::new(),
                next_id: 1,
                closed: HashSet::new(),
            }),
        }
    }

    /// Returns the id for `instance`, allocating one on first sight, and
    /// records `owner` as holding it.
    ///
    /// An instance keeps the class it was first registered under. An owner
    /// already closed by [`ObjectRegistry::release_owner`] is never recorded;
    /// an instance only it would hold gets a fresh id that resolves to
    /// nothing.
    pub fn register(&self, instance: &Instance, class: &str, owner: ConnectionId) -> ObjectReference {
        let mut tables = self.tables.lock();
        let key = addr(instance);
        let closed = tables.closed.contains(&owner);
        if let Some(&id) = tables.by_addr.get(&key) {
            if let Some(entry) = tables.by_id.get_mut(&id) {
                if entry.class != class {
                    tracing::warn!(
                        id = id.0,
                        registered = %entry.class,
                        requested = class,
                        "object already registered under another class"
                    );
                }
                if !closed {
                    entry.owners.insert(owner);
                }
                return ObjectReference {
                    id,
                    class: entry.class.clone(),
                };
            }
        }

        let id = ObjectId(tables.next_id);
        tables.next_id += 1;
        if closed {
            tracing::debug!(id = id.0, class, owner = owner.0, "object not retained for closed connection");
            return ObjectReference {
                id,
                class: class.to_string(),
            };
        }
        tables.by_addr.insert(key, id);
        tables.by_id.insert(
            id,
            Entry {
                instance: Arc::clone(instance),
                class: class.to_string(),
                owners: HashSet::from([owner]),
            },
        );
        tracing::debug!(id = id.0, class, owner = owner.0, "object registered");
        ObjectReference {
            id,
            class: class.to_string(),
        }
    }

    /// # Errors
    ///
    /// `InvalidReference` if `id` was never issued or has been released.
    pub fn resolve(&self, id: ObjectId) -> Result<Instance, CallError> {
        self.tables
            .lock()
            .by_id
            .get(&id)
            .map(|entry| Arc::clone(&entry.instance))
            .ok_or(CallError::InvalidReference { id })
    }

    /// Resolves `id` and checks it was registered as `class`.
    ///
    /// # Errors
    ///
    /// `InvalidReference` for unknown ids, `TypeMismatch` when the object
    /// belongs to another class.
    pub fn resolve_as(&self, id: ObjectId, class: &str, context: &str) -> Result<Instance, CallError> {
        let tables = self.tables.lock();
        let entry = tables.by_id.get(&id).ok_or(CallError::InvalidReference { id })?;
        if entry.class != class {
            return Err(CallError::mismatch(
                context,
                format!("Class({class})"),
                format!("Class({})", entry.class),
            ));
        }
        Ok(Arc::clone(&entry.instance))
    }

    /// Drops the reference. Returns whether it existed.
    pub fn release(&self, id: ObjectId) -> bool {
        let mut tables = self.tables.lock();
        let Some(entry) = tables.by_id.remove(&id) else {
            return false;
        };
        tables.by_addr.remove(&addr(&entry.instance));
        tracing::debug!(id = id.0, "object released");
        true
    }

    /// Removes `owner` from every reference and releases those left without
    /// owners. The owner is closed for good. Returns how many were released.
    pub fn release_owner(&self, owner: ConnectionId) -> usize {
        let mut tables = self.tables.lock();
        tables.closed.insert(owner);
        let mut orphaned = Vec::new();
        for (id, entry) in &mut tables.by_id {
            if entry.owners.remove(&owner) && entry.owners.is_empty() {
                orphaned.push(*id);
            }
        }
        for id in &orphaned {
            if let Some(entry) = tables.by_id.remove(id) {
                tables.by_addr.remove(&addr(&entry.instance));
            }
        }
        orphaned.len()
    }

    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.tables.lock().by_id.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const CONN_A: ConnectionId = ConnectionId(1);
    const CONN_B: ConnectionId = ConnectionId(2);

    fn instance(label: &str) -> Instance {
        Arc::new(label.to_string())
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let objects = ObjectRegistry::new();
        let a = objects.register(&instance("a"), "S.C", CONN_A);
        let b = objects.register(&instance("b"), "S.C", CONN_A);
        assert_eq!(a.id, ObjectId(1));
        assert_eq!(b.id, ObjectId(2));
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn same_instance_keeps_its_id() {
        let objects = ObjectRegistry::new();
        let obj = instance("x");
        let first = objects.register(&obj, "S.C", CONN_A);
        let second = objects.register(&Arc::clone(&obj), "S.C", CONN_B);
        assert_eq!(first.id, second.id);
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn equal_values_in_distinct_allocations_get_distinct_ids() {
        let objects = ObjectRegistry::new();
        let a = objects.register(&instance("same"), "S.C", CONN_A);
        let b = objects.register(&instance("same"), "S.C", CONN_A);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn resolve_returns_the_registered_instance() {
        let objects = ObjectRegistry::new();
        let obj = instance("x");
        let reference = objects.register(&obj, "S.C", CONN_A);
        let back = objects.resolve(reference.id).unwrap();
        assert!(Arc::ptr_eq(&obj, &back));
    }

    #[test]
    fn released_ids_are_invalid_and_never_reused() {
        let objects = ObjectRegistry::new();
        let first = objects.register(&instance("x"), "S.C", CONN_A);
        assert!(objects.release(first.id));
        assert!(!objects.release(first.id));
        assert_eq!(
            objects.resolve(first.id).unwrap_err(),
            CallError::InvalidReference { id: first.id }
        );

        let next = objects.register(&instance("y"), "S.C", CONN_A);
        assert_eq!(next.id, ObjectId(2));
    }

    #[test]
    fn resolve_as_checks_class() {
        let objects = ObjectRegistry::new();
        let reference = objects.register(&instance("x"), "S.A", CONN_A);
        assert!(objects.resolve_as(reference.id, "S.A", "ctx").is_ok());
        let err = objects.resolve_as(reference.id, "S.B", "ctx").unwrap_err();
        assert!(matches!(err, CallError::TypeMismatch { .. }));
        assert_eq!(
            objects.resolve_as(ObjectId(99), "S.A", "ctx").unwrap_err(),
            CallError::InvalidReference { id: ObjectId(99) }
        );
    }

    #[test]
    fn release_owner_keeps_shared_references() {
        let objects = ObjectRegistry::new();
        let shared = instance("shared");
        let only_a = objects.register(&instance("a"), "S.C", CONN_A);
        let both = objects.register(&shared, "S.C", CONN_A);
        objects.register(&shared, "S.C", CONN_B);

        assert_eq!(objects.release_owner(CONN_A), 1);
        assert!(!objects.contains(only_a.id));
        assert!(objects.contains(both.id));

        assert_eq!(objects.release_owner(CONN_B), 1);
        assert!(objects.is_empty());
    }

    #[test]
    fn closed_owner_is_never_recorded() {
        let objects = ObjectRegistry::new();
        let shared = instance("shared");
        let kept = objects.register(&shared, "S.C", CONN_B);
        objects.release_owner(CONN_A);

        let orphan = objects.register(&instance("late"), "S.C", CONN_A);
        assert!(!objects.contains(orphan.id));
        assert_eq!(
            objects.resolve(orphan.id).unwrap_err(),
            CallError::InvalidReference { id: orphan.id }
        );

        assert_eq!(objects.register(&shared, "S.C", CONN_A).id, kept.id);
        assert_eq!(objects.release_owner(CONN_B), 1);
        assert!(objects.is_empty());

        let next = objects.register(&instance("next"), "S.C", ConnectionId(3));
        assert!(next.id.0 > orphan.id.0);
    }

    #[test]
    fn instance_keeps_its_first_class() {
        let objects = ObjectRegistry::new();
        let obj = instance("x");
        let first = objects.register(&obj, "S.A", CONN_A);
        let second = objects.register(&obj, "S.B", CONN_A);
        assert_eq!(second, first);
        assert_eq!(second.class, "S.A");
    }

    proptest! {
        #[test]
        fn fresh_registrations_get_increasing_unseen_ids(
            releases in proptest::collection::vec(any::<bool>(), 1..64)
        ) {
            let objects = ObjectRegistry::new();
            let mut last = 0;
            let mut keep = Vec::new();
            for release in releases {
                let obj = instance("x");
                let reference = objects.register(&obj, "S.C", CONN_A);
                prop_assert!(reference.id.0 > last);
                last = reference.id.0;
                if release {
                    prop_assert!(objects.release(reference.id));
                } else {
                    keep.push(obj);
                }
            }
            prop_assert_eq!(objects.len(), keep.len());
        }
    }
}
