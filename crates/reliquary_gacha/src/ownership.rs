//! # Ownership & Duplicate Classification
//!
//! Which catalog items a user already holds, per category.
//!
//! Two storage models:
//!
//! - **Instanced**: every acquisition creates an [`OwnershipRecord`] with its
//!   own id (so it can carry per-instance state such as a level) and appends
//!   that id to the user's collection list for the category.
//! - **Direct-unlock**: the item id itself goes into the user's unlocked set.
//!   No record is created and unlocking twice changes nothing.
//!
//! On top of the models, [`OwnershipPolicy`] decides what counts as a
//! duplicate and how a new acquisition is settled.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::catalog::ItemId;
use crate::error::{StoreError, StoreResult};
use crate::ledger::UserId;
use crate::registry::CategoryKey;

/// Identifier of an instanced ownership record.
pub type RecordId = u64;

/// How acquisitions are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipModel {
    /// One record per acquisition.
    Instanced,
    /// Item id added to an unlocked set.
    DirectUnlock,
}

/// Reference to what an acquisition produced, as stored in the user's
/// collection list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OwnershipRef {
    /// An instanced record.
    Instance(RecordId),
    /// An unlocked item.
    Unlocked(ItemId),
}

/// An owned instance of a catalog item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OwnershipRecord {
    /// Record id.
    pub id: RecordId,
    /// Owner.
    pub user: UserId,
    /// Category of the item.
    pub category: CategoryKey,
    /// Catalog item this instance is of.
    pub item: ItemId,
    /// Per-instance level, starts at 1.
    pub level: u32,
    /// Monotonic acquisition order across the store.
    pub sequence: u64,
}

/// Per-user ownership storage.
pub trait OwnershipStore: Send + Sync {
    /// Whether the user already holds `item` in `category`.
    ///
    /// # Errors
    ///
    /// `StoreError` if the store cannot be read.
    fn is_owned(
        &self,
        user: UserId,
        category: &CategoryKey,
        item: &ItemId,
        model: OwnershipModel,
    ) -> StoreResult<bool>;

    /// Records a new acquisition and appends it to the collection list.
    ///
    /// # Errors
    ///
    /// `StoreError` if the write fails; nothing is recorded in that case.
    fn record_acquisition(
        &self,
        user: UserId,
        category: &CategoryKey,
        item: &ItemId,
        model: OwnershipModel,
    ) -> StoreResult<OwnershipRef>;

    /// Undoes a `record_acquisition`. Used to compensate a failed pull.
    ///
    /// # Errors
    ///
    /// `StoreError` if the write fails.
    fn revoke(&self, user: UserId, category: &CategoryKey, reference: &OwnershipRef) -> StoreResult<()>;

    /// The user's collection list for a category, in acquisition order.
    ///
    /// # Errors
    ///
    /// `StoreError` if the store cannot be read.
    fn collection(
        &self,
        user: UserId,
        category: &CategoryKey,
        model: OwnershipModel,
    ) -> StoreResult<Vec<OwnershipRef>>;

    /// Looks up an instanced record.
    ///
    /// # Errors
    ///
    /// `StoreError` if the store cannot be read.
    fn record(&self, id: RecordId) -> StoreResult<Option<OwnershipRecord>>;
}

/// Outcome of duplicate classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// The user does not hold the item yet (or duplicates are allowed).
    New,
    /// The user already holds the item.
    Duplicate,
}

/// Per-category ownership behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnershipPolicy {
    /// Instanced, and an already-held item is a duplicate.
    #[serde(rename = "instanced_dedup")]
    InstancedDedup,
    /// Instanced, duplicates allowed: every draw creates another instance.
    #[serde(rename = "instanced")]
    InstancedNoDedup,
    /// Unlocked set; an already-unlocked item is always a duplicate.
    #[serde(rename = "direct_unlock")]
    DirectUnlock,
}

impl OwnershipPolicy {
    /// Storage model used by this policy.
    #[must_use]
    pub const fn model(self) -> OwnershipModel {
        match self {
            Self::InstancedDedup | Self::InstancedNoDedup => OwnershipModel::Instanced,
            Self::DirectUnlock => OwnershipModel::DirectUnlock,
        }
    }

    /// Whether a drawn item can ever be classified as a duplicate.
    #[must_use]
    pub const fn detects_duplicates(self) -> bool {
        !matches!(self, Self::InstancedNoDedup)
    }

    /// Classifies a drawn item.
    ///
    /// # Errors
    ///
    /// `StoreError` if the ownership store cannot be read.
    pub fn classify<S: OwnershipStore + ?Sized>(
        self,
        store: &S,
        user: UserId,
        category: &CategoryKey,
        item: &ItemId,
    ) -> StoreResult<Classification> {
        if !self.detects_duplicates() {
            return Ok(Classification::New);
        }
        let owned = store.is_owned(user, category, item, self.model())?;
        Ok(if owned {
            Classification::Duplicate
        } else {
            Classification::New
        })
    }

    /// Settles a newly acquired item into the store.
    ///
    /// # Errors
    ///
    /// `StoreError` if the write fails.
    pub fn acquire<S: OwnershipStore + ?Sized>(
        self,
        store: &S,
        user: UserId,
        category: &CategoryKey,
        item: &ItemId,
    ) -> StoreResult<OwnershipRef> {
        store.record_acquisition(user, category, item, self.model())
    }
}

type Shelf = (UserId, CategoryKey);

#[derive(Debug, Default)]
struct UnlockSet {
    order: Vec<ItemId>,
    members: HashSet<ItemId>,
}

#[derive(Debug, Default)]
struct Shelves {
    records: HashMap<RecordId, OwnershipRecord>,
    collections: HashMap<Shelf, Vec<RecordId>>,
    unlocked: HashMap<Shelf, UnlockSet>,
}

/// Ownership store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryOwnershipStore {
    shelves: RwLock<Shelves>,
    next_id: AtomicU64,
}

impl InMemoryOwnershipStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total instanced records across all users.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.shelves.read().records.len()
    }
}

impl OwnershipStore for InMemoryOwnershipStore {
    fn is_owned(
        &self,
        user: UserId,
        category: &CategoryKey,
        item: &ItemId,
        model: OwnershipModel,
    ) -> StoreResult<bool> {
        let shelves = self.shelves.read();
        let shelf = (user, category.clone());
        let owned = match model {
            OwnershipModel::Instanced => shelves.collections.get(&shelf).is_some_and(|ids| {
                ids.iter()
                    .filter_map(|id| shelves.records.get(id))
                    .any(|record| &record.item == item)
            }),
            OwnershipModel::DirectUnlock => shelves
                .unlocked
                .get(&shelf)
                .is_some_and(|set| set.members.contains(item)),
        };
        Ok(owned)
    }

    fn record_acquisition(
        &self,
        user: UserId,
        category: &CategoryKey,
        item: &ItemId,
        model: OwnershipModel,
    ) -> StoreResult<OwnershipRef> {
        let mut shelves = self.shelves.write();
        let shelf = (user, category.clone());
        match model {
            OwnershipModel::Instanced => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
                shelves.records.insert(
                    id,
                    OwnershipRecord {
                        id,
                        user,
                        category: category.clone(),
                        item: item.clone(),
                        level: 1,
                        sequence: id,
                    },
                );
                shelves.collections.entry(shelf).or_default().push(id);
                Ok(OwnershipRef::Instance(id))
            }
            OwnershipModel::DirectUnlock => {
                let set = shelves.unlocked.entry(shelf).or_default();
                if set.members.insert(item.clone()) {
                    set.order.push(item.clone());
                }
                Ok(OwnershipRef::Unlocked(item.clone()))
            }
        }
    }

    fn revoke(&self, user: UserId, category: &CategoryKey, reference: &OwnershipRef) -> StoreResult<()> {
        let mut shelves = self.shelves.write();
        let shelf = (user, category.clone());
        match reference {
            OwnershipRef::Instance(id) => {
                let record = shelves
                    .records
                    .remove(id)
                    .ok_or_else(|| StoreError::Corrupt(format!("record {id} does not exist")))?;
                if record.user != user {
                    let owner = record.user;
                    shelves.records.insert(*id, record);
                    return Err(StoreError::Corrupt(format!(
                        "record {id} belongs to user {owner}, not {user}"
                    )));
                }
                if let Some(ids) = shelves.collections.get_mut(&shelf) {
                    ids.retain(|existing| existing != id);
                }
            }
            OwnershipRef::Unlocked(item) => {
                if let Some(set) = shelves.unlocked.get_mut(&shelf) {
                    set.members.remove(item);
                    set.order.retain(|existing| existing != item);
                }
            }
        }
        Ok(())
    }

    fn collection(
        &self,
        user: UserId,
        category: &CategoryKey,
        model: OwnershipModel,
    ) -> StoreResult<Vec<OwnershipRef>> {
        let shelves = self.shelves.read();
        let shelf = (user, category.clone());
        let refs = match model {
            OwnershipModel::Instanced => shelves
                .collections
                .get(&shelf)
                .map(|ids| ids.iter().copied().map(OwnershipRef::Instance).collect())
                .unwrap_or_default(),
            OwnershipModel::DirectUnlock => shelves
                .unlocked
                .get(&shelf)
                .map(|set| set.order.iter().cloned().map(OwnershipRef::Unlocked).collect())
                .unwrap_or_default(),
        };
        Ok(refs)
    }

    fn record(&self, id: RecordId) -> StoreResult<Option<OwnershipRecord>> {
        Ok(self.shelves.read().records.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pokemon() -> CategoryKey {
        CategoryKey::new("pokemon")
    }

    #[test]
    fn test_instanced_dedup_classification() {
        let store = InMemoryOwnershipStore::new();
        let policy = OwnershipPolicy::InstancedDedup;
        let pikachu = ItemId::new("25");

        assert_eq!(
            policy.classify(&store, 1, &pokemon(), &pikachu).unwrap(),
            Classification::New
        );
        let reference = policy.acquire(&store, 1, &pokemon(), &pikachu).unwrap();
        assert!(matches!(reference, OwnershipRef::Instance(_)));
        assert_eq!(
            policy.classify(&store, 1, &pokemon(), &pikachu).unwrap(),
            Classification::Duplicate
        );

        // Other users and other categories are unaffected.
        assert_eq!(
            policy.classify(&store, 2, &pokemon(), &pikachu).unwrap(),
            Classification::New
        );
        assert_eq!(
            policy
                .classify(&store, 1, &CategoryKey::new("snoopy"), &pikachu)
                .unwrap(),
            Classification::New
        );
    }

    #[test]
    fn test_instanced_without_dedup_always_new() {
        let store = InMemoryOwnershipStore::new();
        let policy = OwnershipPolicy::InstancedNoDedup;
        let card = ItemId::new("blue_eyes");
        let yugioh = CategoryKey::new("yugioh");

        for _ in 0..3 {
            assert_eq!(
                policy.classify(&store, 1, &yugioh, &card).unwrap(),
                Classification::New
            );
            policy.acquire(&store, 1, &yugioh, &card).unwrap();
        }
        assert_eq!(store.collection(1, &yugioh, OwnershipModel::Instanced).unwrap().len(), 3);
        assert_eq!(store.record_count(), 3);
    }

    #[test]
    fn test_direct_unlock_is_idempotent() {
        let store = InMemoryOwnershipStore::new();
        let policy = OwnershipPolicy::DirectUnlock;
        let persona = ItemId::new("stoic_abel");
        let personas = CategoryKey::new("abelpersona");

        policy.acquire(&store, 1, &personas, &persona).unwrap();
        for _ in 0..5 {
            assert_eq!(
                policy.classify(&store, 1, &personas, &persona).unwrap(),
                Classification::Duplicate
            );
            policy.acquire(&store, 1, &personas, &persona).unwrap();
        }
        assert_eq!(
            store.collection(1, &personas, OwnershipModel::DirectUnlock).unwrap(),
            vec![OwnershipRef::Unlocked(persona)]
        );
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn test_records_carry_instance_state() {
        let store = InMemoryOwnershipStore::new();
        let reference = store
            .record_acquisition(7, &pokemon(), &ItemId::new("1"), OwnershipModel::Instanced)
            .unwrap();
        let OwnershipRef::Instance(id) = reference else {
            panic!("expected an instance");
        };
        let record = store.record(id).unwrap().unwrap();
        assert_eq!(record.user, 7);
        assert_eq!(record.level, 1);
        assert_eq!(record.item.as_str(), "1");
    }

    #[test]
    fn test_revoke_undoes_acquisition() {
        let store = InMemoryOwnershipStore::new();
        let item = ItemId::new("4");
        let reference = store
            .record_acquisition(1, &pokemon(), &item, OwnershipModel::Instanced)
            .unwrap();

        store.revoke(1, &pokemon(), &reference).unwrap();

        assert!(!store.is_owned(1, &pokemon(), &item, OwnershipModel::Instanced).unwrap());
        assert!(store.collection(1, &pokemon(), OwnershipModel::Instanced).unwrap().is_empty());
        assert!(store.revoke(1, &pokemon(), &reference).is_err());
    }

    #[test]
    fn test_revoke_rejects_foreign_record() {
        let store = InMemoryOwnershipStore::new();
        let reference = store
            .record_acquisition(1, &pokemon(), &ItemId::new("4"), OwnershipModel::Instanced)
            .unwrap();

        assert!(store.revoke(2, &pokemon(), &reference).is_err());
        assert!(store
            .is_owned(1, &pokemon(), &ItemId::new("4"), OwnershipModel::Instanced)
            .unwrap());
    }
}
