//! Account identity and snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amount::Amount;

/// Identity of a balance holder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AccountId {
    /// An account owned by a player, keyed by the player's UUID.
    Player(Uuid),
    /// A virtual account (bank, shop, faction, ...) keyed by a free-form id.
    NonPlayer(String),
}

impl AccountId {
    #[must_use]
    pub fn is_player(&self) -> bool {
        matches!(self, AccountId::Player(_))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Player(uuid) => write!(f, "player:{uuid}"),
            AccountId::NonPlayer(id) => write!(f, "account:{id}"),
        }
    }
}

/// Point-in-time view of an account as reported by its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: Option<String>,
    /// Balance per currency identifier. Currencies never touched are absent
    /// and read as zero.
    pub balances: BTreeMap<String, Amount>,
}

impl Account {
    #[must_use]
    pub fn new(id: AccountId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            balances: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn balance(&self, currency: &str) -> Amount {
        self.balances.get(currency).copied().unwrap_or(Amount::ZERO)
    }
}

/// Who initiated a balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Initiator {
    Server,
    Player(Uuid),
    Plugin(String),
}

/// Initiator and optional free-text reason attached to every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionCause {
    pub initiator: Initiator,
    pub reason: Option<String>,
}

impl TransactionCause {
    #[must_use]
    pub fn server() -> Self {
        Self {
            initiator: Initiator::Server,
            reason: None,
        }
    }

    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            initiator: Initiator::Plugin(name.into()),
            reason: None,
        }
    }

    #[must_use]
    pub fn player(uuid: Uuid) -> Self {
        Self {
            initiator: Initiator::Player(uuid),
            reason: None,
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
