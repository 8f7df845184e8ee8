//! # Currency Ledger
//!
//! Three non-negative counters per user, one per [`Currency`].
//!
//! The invariant is enforced at the point of mutation: [`Wallet::debit`]
//! checks the balance and decrements in one step, and [`InMemoryLedger`]
//! performs that step under its write lock, so a debit is a conditional
//! update rather than a read followed by a write.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{LedgerError, LedgerResult};

/// Opaque user identifier.
pub type UserId = u64;

/// The three currencies a pull can be paid with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Currency {
    /// Earned from habits and tasks.
    TemuTokens = 0,
    /// Earned from workouts.
    GatillaGold = 1,
    /// Earned from books.
    WendyHearts = 2,
}

impl Currency {
    /// Every currency, in wallet order.
    pub const ALL: [Self; 3] = [Self::TemuTokens, Self::GatillaGold, Self::WendyHearts];

    /// Config/display name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TemuTokens => "temu_tokens",
            Self::GatillaGold => "gatilla_gold",
            Self::WendyHearts => "wendy_hearts",
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Balances of one user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    balances: [u64; 3],
}

impl Wallet {
    /// Creates a wallet with the given starting balances.
    #[must_use]
    pub const fn new(temu_tokens: u64, gatilla_gold: u64, wendy_hearts: u64) -> Self {
        Self {
            balances: [temu_tokens, gatilla_gold, wendy_hearts],
        }
    }

    /// Creates a wallet holding `amount` of a single currency.
    #[must_use]
    pub fn with_balance(currency: Currency, amount: u64) -> Self {
        let mut wallet = Self::default();
        wallet.balances[currency.index()] = amount;
        wallet
    }

    /// Current balance for a currency.
    #[inline]
    #[must_use]
    pub const fn balance(&self, currency: Currency) -> u64 {
        self.balances[currency.index()]
    }

    /// Removes `amount`, or fails without touching the balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InsufficientFunds` if the balance is below `amount`.
    pub fn debit(&mut self, currency: Currency, amount: u64) -> LedgerResult<u64> {
        let slot = &mut self.balances[currency.index()];
        if *slot < amount {
            return Err(LedgerError::InsufficientFunds {
                currency,
                required: amount,
                available: *slot,
            });
        }
        *slot -= amount;
        Ok(*slot)
    }

    /// Adds `amount`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Overflow` if the counter would wrap.
    pub fn credit(&mut self, currency: Currency, amount: u64) -> LedgerResult<u64> {
        let slot = &mut self.balances[currency.index()];
        *slot = slot.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(*slot)
    }
}

/// Per-user currency balances.
///
/// `debit` must be atomic: it either observes a sufficient balance and
/// decrements it, or reports `InsufficientFunds` and changes nothing. Two
/// concurrent debits against the same wallet must never both succeed on a
/// balance that only covers one of them.
pub trait Ledger: Send + Sync {
    /// Reads one balance.
    ///
    /// # Errors
    ///
    /// `UnknownUser` if the user has no wallet, `Store` on I/O failure.
    fn balance(&self, user: UserId, currency: Currency) -> LedgerResult<u64>;

    /// Reads all three balances.
    ///
    /// # Errors
    ///
    /// `UnknownUser` if the user has no wallet, `Store` on I/O failure.
    fn wallet(&self, user: UserId) -> LedgerResult<Wallet>;

    /// Conditionally removes `amount`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` if the balance is below `amount` (nothing changes).
    fn debit(&self, user: UserId, currency: Currency, amount: u64) -> LedgerResult<u64>;

    /// Adds `amount`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// `Overflow` if the counter would wrap, `Store` on I/O failure.
    fn credit(&self, user: UserId, currency: Currency, amount: u64) -> LedgerResult<u64>;
}

/// Ledger held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    wallets: RwLock<HashMap<UserId, Wallet>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) a user's wallet.
    pub fn open_account(&self, user: UserId, wallet: Wallet) {
        self.wallets.write().insert(user, wallet);
    }

    /// Number of wallets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wallets.read().len()
    }

    /// True if no wallet has been opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wallets.read().is_empty()
    }

    fn with_wallet<T>(
        &self,
        user: UserId,
        f: impl FnOnce(&mut Wallet) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut wallets = self.wallets.write();
        let wallet = wallets.get_mut(&user).ok_or(LedgerError::UnknownUser(user))?;
        f(wallet)
    }
}

impl Ledger for InMemoryLedger {
    fn balance(&self, user: UserId, currency: Currency) -> LedgerResult<u64> {
        self.wallet(user).map(|w| w.balance(currency))
    }

    fn wallet(&self, user: UserId) -> LedgerResult<Wallet> {
        self.wallets
            .read()
            .get(&user)
            .copied()
            .ok_or(LedgerError::UnknownUser(user))
    }

    fn debit(&self, user: UserId, currency: Currency, amount: u64) -> LedgerResult<u64> {
        self.with_wallet(user, |w| w.debit(currency, amount))
    }

    fn credit(&self, user: UserId, currency: Currency, amount: u64) -> LedgerResult<u64> {
        self.with_wallet(user, |w| w.credit(currency, amount))
    }
}
