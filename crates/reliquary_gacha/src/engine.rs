//! # Pull Engine
//!
//! **The only component with side effects.** Composes the registry, the
//! selectors, the ledger and the ownership store into one pull.
//!
//! ## The Pull Pipeline
//!
//! ```text
//! pull(user, category)
//!   1. Validating   resolve category, read balance, reject if short
//!   2. Selecting    read catalog, draw item           (CatalogEmpty)
//!   3. Classifying  new or duplicate?
//!   4. Settling     debit cost; record ownership  (new)
//!                               credit cost/4     (duplicate)
//!   5. Done         emit events, return result
//! ```
//!
//! Steps 1-4 run while holding a per-user lock, and the ledger debit is
//! itself conditional, so two concurrent pulls by the same user can never
//! both spend the same balance.
//!
//! Anything that fails after the debit rolls the pull back: acquired
//! ownership is revoked and the outstanding debit is credited back.

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::catalog::{CatalogItem, CatalogItemView, CatalogProvider, ItemId, Tier};
use crate::error::{ConfigError, ConfigResult, GachaResult, LedgerError, PullError, PullStage, StoreError};
use crate::ledger::{Currency, Ledger, UserId};
use crate::ownership::{Classification, OwnershipRef, OwnershipStore};
use crate::registry::{CategoryConfig, CategoryKey, CategoryRegistry};

/// Engine settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed RNG seed. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Duplicates refund `floor(cost / refund_divisor)`.
    pub refund_divisor: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            refund_divisor: 4,
        }
    }
}

impl EngineConfig {
    /// Reproducible draws, for tests and replays.
    #[must_use]
    pub const fn deterministic(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            refund_divisor: 4,
        }
    }
}

/// Outcome of a single pull.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PullResult {
    /// Category pulled from.
    pub category: CategoryKey,
    /// What was drawn.
    pub drawn_item: CatalogItemView,
    /// Whether the user already held it.
    pub is_duplicate: bool,
    /// Currency spent.
    pub currency: Currency,
    /// Cost minus any refund.
    pub currency_spent_net: u64,
    /// Ownership created by this pull. `None` for duplicates.
    pub ownership: Option<OwnershipRef>,
}

/// One card of an opened pack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackCard {
    /// What was drawn.
    pub item: CatalogItemView,
    /// Whether the user already held it when this card was settled.
    pub is_duplicate: bool,
    /// Ownership created for this card. `None` for duplicates.
    pub ownership: Option<OwnershipRef>,
}

/// Outcome of opening a pack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackResult {
    /// Category opened.
    pub category: CategoryKey,
    /// Cards in draw order.
    pub cards: Vec<PackCard>,
    /// Currency spent.
    pub currency: Currency,
    /// Cost minus refunds.
    pub currency_spent_net: u64,
}

/// Notifications for the dashboard UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PullEvent {
    /// An item was drawn and settled.
    Pulled {
        /// Who pulled.
        user: UserId,
        /// Category pulled from.
        category: CategoryKey,
        /// Item drawn.
        item: ItemId,
        /// Tier of the item.
        tier: Tier,
        /// Whether it was a duplicate.
        duplicate: bool,
    },
    /// A duplicate was partially refunded.
    DuplicateRefunded {
        /// Who was refunded.
        user: UserId,
        /// Category of the duplicate.
        category: CategoryKey,
        /// Currency credited.
        currency: Currency,
        /// Amount credited.
        amount: u64,
    },
    /// A failed pull was rolled back.
    Compensated {
        /// Whose pull failed.
        user: UserId,
        /// Category of the failed pull.
        category: CategoryKey,
        /// Whether every applied effect was reversed.
        complete: bool,
    },
}

/// Effects applied so far by one pull, for rollback.
struct Journal<'a> {
    user: UserId,
    config: &'a CategoryConfig,
    debited: u64,
    credited: u64,
    acquired: Vec<OwnershipRef>,
    events: Vec<PullEvent>,
}

impl<'a> Journal<'a> {
    fn new(user: UserId, config: &'a CategoryConfig) -> Self {
        Self {
            user,
            config,
            debited: 0,
            credited: 0,
            acquired: Vec::new(),
            events: Vec::new(),
        }
    }

    const fn net(&self) -> u64 {
        self.debited - self.credited
    }
}

/// Any ledger failure other than the user-facing ones, as a store failure.
fn ledger_fault(err: LedgerError) -> StoreError {
    match err {
        LedgerError::Store(source) => source,
        other => StoreError::Corrupt(other.to_string()),
    }
}

type LockTable = Mutex<HashMap<UserId, Arc<Mutex<()>>>>;

/// A user's entry in the lock table. Dropping it removes the entry once no
/// other pull for that user holds or waits on it.
struct UserSlot<'a> {
    table: &'a LockTable,
    user: UserId,
    lock: Arc<Mutex<()>>,
}

impl<'a> UserSlot<'a> {
    fn acquire(table: &'a LockTable, user: UserId) -> Self {
        let lock = Arc::clone(table.lock().entry(user).or_default());
        Self { table, user, lock }
    }
}

impl Drop for UserSlot<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Clones are only taken under the table lock: two references means
        // the table's and ours.
        if table
            .get(&self.user)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            table.remove(&self.user);
        }
    }
}

/// The gacha pull engine.
///
/// ## Thread Safety
///
/// `GachaEngine` is `Send + Sync` when its collaborators are; share it
/// behind an `Arc`. Pulls by different users run in parallel, pulls by the
/// same user are serialized.
///
/// ## Memory
///
/// The per-user lock table only holds users with a pull in flight. Events
/// accumulate until [`GachaEngine::drain_events`] is called, so a caller that
/// never drains them grows the buffer by a few entries per pull.
pub struct GachaEngine<L, O, C> {
    registry: CategoryRegistry,
    ledger: L,
    ownership: O,
    catalog: C,
    rng: Mutex<ChaCha20Rng>,
    user_locks: LockTable,
    events: Mutex<Vec<PullEvent>>,
    refund_divisor: u64,
}

impl<L, O, C> GachaEngine<L, O, C>
where
    L: Ledger,
    O: OwnershipStore,
    C: CatalogProvider,
{
    /// Creates an engine over explicit collaborators.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if `refund_divisor` is zero.
    pub fn new(
        registry: CategoryRegistry,
        ledger: L,
        ownership: O,
        catalog: C,
        config: EngineConfig,
    ) -> ConfigResult<Self> {
        if config.refund_divisor == 0 {
            return Err(ConfigError::Invalid("refund_divisor must be positive".into()));
        }

        let rng = match config.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };

        Ok(Self {
            registry,
            ledger,
            ownership,
            catalog,
            rng: Mutex::new(rng),
            user_locks: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::with_capacity(64)),
            refund_divisor: config.refund_divisor,
        })
    }

    /// The category registry.
    pub const fn registry(&self) -> &CategoryRegistry {
        &self.registry
    }

    /// The currency ledger.
    pub const fn ledger(&self) -> &L {
        &self.ledger
    }

    /// The ownership store.
    pub const fn ownership(&self) -> &O {
        &self.ownership
    }

    /// The catalog provider.
    pub const fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Spends one pull's cost for one random item.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`, `UnknownUser`, `InsufficientFunds`: nothing changed.
    /// - `CatalogEmpty`: nothing changed.
    /// - `PersistenceFailure`: a collaborator failed; applied effects were
    ///   rolled back unless `compensated` is false.
    pub fn pull(&self, user: UserId, category: &str) -> GachaResult<PullResult> {
        let config = self.resolve(user, category)?;
        let slot = UserSlot::acquire(&self.user_locks, user);
        let _serialized = slot.lock.lock();

        self.validate(user, config)?;

        debug!(user, category = %config.key, stage = %PullStage::Selecting, "drawing");
        let item = {
            let items = self.load_catalog(user, config)?;
            let mut rng = self.rng.lock();
            Self::select(config, &items, &mut *rng)?
        };

        debug!(user, category = %config.key, item = %item.id, stage = %PullStage::Classifying, "classifying");
        let classification = config
            .policy
            .classify(&self.ownership, user, &config.key, &item.id)
            .map_err(|source| Self::service_failure(user, config, PullStage::Classifying, true, source))?;

        debug!(user, category = %config.key, item = %item.id, stage = %PullStage::Settling, "settling");
        let mut journal = Journal::new(user, config);
        self.debit(&mut journal)?;
        let card = match self.settle_card(&mut journal, &item, classification) {
            Ok(card) => card,
            Err(source) => return Err(self.abort(journal, source)),
        };

        info!(
            user,
            category = %config.key,
            item = %card.item.id,
            duplicate = card.is_duplicate,
            spent = journal.net(),
            "pull settled"
        );

        let spent = journal.net();
        self.events.lock().append(&mut journal.events);

        Ok(PullResult {
            category: config.key.clone(),
            drawn_item: card.item,
            is_duplicate: card.is_duplicate,
            currency: config.currency,
            currency_spent_net: spent,
            ownership: card.ownership,
        })
    }

    /// Spends one pull's cost for `pack_size` random items.
    ///
    /// Each card is settled on its own, so a card drawn twice in one pack is
    /// a duplicate the second time (for categories that detect duplicates).
    /// Duplicates refund `floor(cost / 4)` each, never more than `cost` in
    /// total. If any card fails to settle the whole pack is rolled back.
    ///
    /// # Errors
    ///
    /// Same as [`GachaEngine::pull`].
    pub fn open_pack(&self, user: UserId, category: &str) -> GachaResult<PackResult> {
        let config = self.resolve(user, category)?;
        let slot = UserSlot::acquire(&self.user_locks, user);
        let _serialized = slot.lock.lock();

        self.validate(user, config)?;

        debug!(user, category = %config.key, cards = config.pack_size, stage = %PullStage::Selecting, "drawing pack");
        let draws = {
            let items = self.load_catalog(user, config)?;
            let mut rng = self.rng.lock();
            (0..config.pack_size)
                .map(|_| Self::select(config, &items, &mut *rng))
                .collect::<GachaResult<Vec<_>>>()?
        };

        debug!(user, category = %config.key, stage = %PullStage::Settling, "settling pack");
        let mut journal = Journal::new(user, config);
        self.debit(&mut journal)?;

        let mut cards = Vec::with_capacity(draws.len());
        for item in &draws {
            let settled = config
                .policy
                .classify(&self.ownership, user, &config.key, &item.id)
                .and_then(|classification| self.settle_card(&mut journal, item, classification));
            match settled {
                Ok(card) => cards.push(card),
                Err(source) => return Err(self.abort(journal, source)),
            }
        }

        let spent = journal.net();
        info!(
            user,
            category = %config.key,
            cards = cards.len(),
            duplicates = cards.iter().filter(|c| c.is_duplicate).count(),
            spent,
            "pack settled"
        );
        self.events.lock().append(&mut journal.events);

        Ok(PackResult {
            category: config.key.clone(),
            cards,
            currency: config.currency,
            currency_spent_net: spent,
        })
    }

    /// Drains all pending events.
    pub fn drain_events(&self) -> Vec<PullEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Number of pending events.
    #[must_use]
    pub fn pending_event_count(&self) -> usize {
        self.events.lock().len()
    }

    fn resolve(&self, user: UserId, category: &str) -> GachaResult<&CategoryConfig> {
        self.registry.get(category).map_err(|err| {
            debug!(user, category, %err, "pull rejected");
            err
        })
    }

    /// Step 1: the user must exist and afford the cost. Reads only.
    fn validate(&self, user: UserId, config: &CategoryConfig) -> GachaResult<()> {
        debug!(user, category = %config.key, stage = %PullStage::Validating, "validating");
        let available = match self.ledger.balance(user, config.currency) {
            Ok(balance) => balance,
            Err(LedgerError::UnknownUser(user)) => {
                debug!(user, category = %config.key, "pull rejected: unknown user");
                return Err(PullError::UnknownUser(user));
            }
            Err(err) => {
                return Err(Self::service_failure(
                    user,
                    config,
                    PullStage::Validating,
                    true,
                    ledger_fault(err),
                ))
            }
        };

        if available < config.cost {
            debug!(user, category = %config.key, available, cost = config.cost, "pull rejected: insufficient funds");
            return Err(PullError::InsufficientFunds {
                currency: config.currency,
                required: config.cost,
                available,
            });
        }
        Ok(())
    }

    fn load_catalog(&self, user: UserId, config: &CategoryConfig) -> GachaResult<Vec<CatalogItem>> {
        self.catalog
            .list_items(&config.key)
            .map_err(|source| Self::service_failure(user, config, PullStage::Selecting, true, source))
    }

    fn select<R: rand::Rng + ?Sized>(
        config: &CategoryConfig,
        items: &[CatalogItem],
        rng: &mut R,
    ) -> GachaResult<CatalogItem> {
        config.selector.select(items, rng).cloned().map_err(|err| {
            error!(category = %config.key, items = items.len(), %err, "catalog has nothing to draw");
            PullError::CatalogEmpty(config.key.to_string())
        })
    }

    /// The conditional debit. A concurrent spend that slipped in after
    /// validation surfaces here as `InsufficientFunds`.
    fn debit(&self, journal: &mut Journal<'_>) -> GachaResult<()> {
        let Journal { user, config, .. } = *journal;
        match self.ledger.debit(user, config.currency, config.cost) {
            Ok(_) => {
                journal.debited = config.cost;
                Ok(())
            }
            Err(LedgerError::InsufficientFunds {
                currency,
                required,
                available,
            }) => {
                debug!(user, category = %config.key, available, "pull rejected at debit: insufficient funds");
                Err(PullError::InsufficientFunds {
                    currency,
                    required,
                    available,
                })
            }
            Err(LedgerError::UnknownUser(user)) => Err(PullError::UnknownUser(user)),
            Err(err) => Err(Self::service_failure(
                user,
                config,
                PullStage::Settling,
                true,
                ledger_fault(err),
            )),
        }
    }

    /// Records a new item or refunds a duplicate, writing into the journal.
    fn settle_card(
        &self,
        journal: &mut Journal<'_>,
        item: &CatalogItem,
        classification: Classification,
    ) -> Result<PackCard, StoreError> {
        let Journal { user, config, .. } = *journal;

        let (is_duplicate, ownership) = match classification {
            Classification::New => {
                let reference = config.policy.acquire(&self.ownership, user, &config.key, &item.id)?;
                journal.acquired.push(reference.clone());
                (false, Some(reference))
            }
            Classification::Duplicate => {
                let refund = config
                    .refund(self.refund_divisor)
                    .min(journal.debited - journal.credited);
                if refund > 0 {
                    self.ledger
                        .credit(user, config.currency, refund)
                        .map_err(ledger_fault)?;
                    journal.credited += refund;
                    journal.events.push(PullEvent::DuplicateRefunded {
                        user,
                        category: config.key.clone(),
                        currency: config.currency,
                        amount: refund,
                    });
                }
                (true, None)
            }
        };

        journal.events.push(PullEvent::Pulled {
            user,
            category: config.key.clone(),
            item: item.id.clone(),
            tier: item.tier,
            duplicate: is_duplicate,
        });

        Ok(PackCard {
            item: CatalogItemView {
                id: item.id.clone(),
                name: item.name.clone(),
                tier: item.tier,
                tier_name: config.tier_name(item.tier).map(str::to_string),
            },
            is_duplicate,
            ownership,
        })
    }

    /// Reverses everything in the journal and builds the error to return.
    fn abort(&self, journal: Journal<'_>, source: StoreError) -> PullError {
        let Journal { user, config, .. } = journal;
        let mut complete = true;

        for reference in journal.acquired.iter().rev() {
            if let Err(err) = self.ownership.revoke(user, &config.key, reference) {
                error!(user, category = %config.key, ?reference, %err, "rollback failed to revoke ownership");
                complete = false;
            }
        }

        let outstanding = journal.net();
        if outstanding > 0 {
            if let Err(err) = self.ledger.credit(user, config.currency, outstanding) {
                error!(user, category = %config.key, outstanding, %err, "rollback failed to restore balance");
                complete = false;
            }
        }

        self.events.lock().push(PullEvent::Compensated {
            user,
            category: config.key.clone(),
            complete,
        });

        Self::service_failure(user, config, PullStage::Settling, complete, source)
    }

    fn service_failure(
        user: UserId,
        config: &CategoryConfig,
        stage: PullStage,
        compensated: bool,
        source: StoreError,
    ) -> PullError {
        error!(user, category = %config.key, %stage, compensated, error = %source, "pull failed");
        PullError::PersistenceFailure {
            stage,
            compensated,
            source,
        }
    }
}
