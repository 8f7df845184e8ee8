//! # Reliquary Gacha
//!
//! The pull economy of the reliquary dashboard: spend one of three
//! currencies, get a random collectible from a banner's catalog.
//!
//! ## Design Principles
//!
//! 1. **Integer money** - balances are `u64`, tier odds are parts-per-million
//! 2. **Never negative** - debits are conditional updates, pulls are serialized per user
//! 3. **All-or-nothing pulls** - a failed settlement is rolled back
//! 4. **External configuration** - banners live in TOML
//! 5. **Explicit collaborators** - ledger, ownership store and catalogs are
//!    traits handed to the engine, never globals
//!
//! ## Example
//!
//! ```rust,ignore
//! use reliquary_gacha::{
//!     CategoryRegistry, EngineConfig, GachaEngine, InMemoryCatalog, InMemoryLedger,
//!     InMemoryOwnershipStore, Wallet,
//! };
//!
//! let ledger = InMemoryLedger::new();
//! ledger.open_account(user_id, Wallet::new(50, 0, 0));
//!
//! let engine = GachaEngine::new(
//!     CategoryRegistry::builtin()?,
//!     ledger,
//!     InMemoryOwnershipStore::new(),
//!     InMemoryCatalog::from_toml_str(&catalog_toml)?,
//!     EngineConfig::default(),
//! )?;
//!
//! let result = engine.pull(user_id, "pokemon")?;
//! println!("{} (duplicate: {})", result.drawn_item.name, result.is_duplicate);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod ownership;
pub mod registry;
pub mod selector;
pub mod tier;

pub use catalog::{CatalogItem, CatalogItemView, CatalogProvider, InMemoryCatalog, ItemId, Tier};
pub use engine::{EngineConfig, GachaEngine, PackCard, PackResult, PullEvent, PullResult};
pub use error::{
    ConfigError, GachaResult, LedgerError, PullError, PullStage, SelectError, StoreError,
};
pub use ledger::{Currency, InMemoryLedger, Ledger, UserId, Wallet};
pub use ownership::{
    Classification, InMemoryOwnershipStore, OwnershipModel, OwnershipPolicy, OwnershipRecord,
    OwnershipRef, OwnershipStore, RecordId,
};
pub use registry::{CategoryConfig, CategoryKey, CategoryRegistry};
pub use selector::Selector;
pub use tier::{TierHistogram, TierSpec, TierTable, PPM_SCALE};
