//! # Gacha Error Types
//!
//! All errors that can occur in the pull economy.
//!
//! Errors are split by concern: collaborator I/O ([`StoreError`]), currency
//! movements ([`LedgerError`]), draws ([`SelectError`]), configuration
//! ([`ConfigError`]) and the caller-facing [`PullError`].

use thiserror::Error;

use crate::ledger::{Currency, UserId};

/// Failure reported by a storage collaborator (ledger, ownership, catalog).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backing store returned data that does not make sense.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

/// Result type for collaborator operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from currency ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// No wallet exists for this user.
    #[error("no wallet for user {0}")]
    UnknownUser(UserId),

    /// Debit would drive the balance below zero.
    #[error("insufficient funds: need {required} {currency}, have {available}")]
    InsufficientFunds {
        /// Currency being debited.
        currency: Currency,
        /// Amount requested.
        required: u64,
        /// Balance at the time of the debit.
        available: u64,
    },

    /// Credit would overflow the counter.
    #[error("arithmetic overflow in balance")]
    Overflow,

    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors from item selection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// Uniform selection over zero items.
    #[error("empty catalog")]
    EmptyCatalog,

    /// Every tier pool is empty.
    #[error("no items available in any tier")]
    NoItemsAvailable,
}

/// Errors while loading registry or catalog configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The TOML could not be read or parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// The TOML parsed but describes an impossible setup.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Step of the pull state machine at which a service failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStage {
    /// Resolving the category and reading the wallet.
    Validating,
    /// Reading the catalog and drawing an item.
    Selecting,
    /// Asking the ownership store whether the item is already held.
    Classifying,
    /// Debiting, recording ownership, refunding.
    Settling,
}

impl std::fmt::Display for PullStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Selecting => "selecting",
            Self::Classifying => "classifying",
            Self::Settling => "settling",
        };
        f.write_str(name)
    }
}

/// Errors returned to the caller of a pull.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PullError {
    /// The category key is not in the registry.
    #[error("gacha category not found: {0}")]
    CategoryNotFound(String),

    /// The user has no wallet.
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// The user cannot afford the pull.
    #[error("insufficient funds: requires {required} {currency}, have {available}")]
    InsufficientFunds {
        /// Currency of the category.
        currency: Currency,
        /// Cost of the pull.
        required: u64,
        /// Balance observed.
        available: u64,
    },

    /// The category's catalog has nothing to draw from.
    #[error("catalog for {0} has no items")]
    CatalogEmpty(String),

    /// A collaborator failed. `compensated` tells whether every applied
    /// effect was reversed before returning.
    #[error("persistence failure while {stage} (compensated: {compensated}): {source}")]
    PersistenceFailure {
        /// Where the failure happened.
        stage: PullStage,
        /// Whether the pull's applied effects were rolled back.
        compensated: bool,
        /// Underlying store failure.
        source: StoreError,
    },
}

impl PullError {
    /// True for errors caused by the request itself rather than the system.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::CategoryNotFound(_) | Self::UnknownUser(_) | Self::InsufficientFunds { .. }
        )
    }

    /// True if the same request may succeed later.
    ///
    /// Pulls are not idempotent: a retried pull draws again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceFailure { .. })
    }
}

/// Result type for engine operations.
pub type GachaResult<T> = Result<T, PullError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_and_service_errors_are_split() {
        assert!(PullError::CategoryNotFound("x".into()).is_user_error());
        assert!(PullError::InsufficientFunds {
            currency: Currency::TemuTokens,
            required: 5,
            available: 1,
        }
        .is_user_error());
        assert!(!PullError::CatalogEmpty("x".into()).is_user_error());

        let failure = PullError::PersistenceFailure {
            stage: PullStage::Settling,
            compensated: true,
            source: StoreError::Unavailable("down".into()),
        };
        assert!(!failure.is_user_error());
        assert!(failure.is_retryable());
        assert!(!PullError::CatalogEmpty("x".into()).is_retryable());
    }

    #[test]
    fn test_messages() {
        let err = PullError::InsufficientFunds {
            currency: Currency::GatillaGold,
            required: 20,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: requires 20 gatilla_gold, have 3"
        );
    }
}
