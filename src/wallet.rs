//! Wallet model: per-user, per-type balance buckets
//!
//! A member holds exactly one wallet per [`WalletType`], created lazily at
//! balance 0 on first reference. Wallets are owned by the
//! [`WalletStore`](crate::store::WalletStore) and mutated only through the
//! [`TransferCoordinator`](crate::coordinator::TransferCoordinator).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::balance::{Balance, BalanceError};
use crate::core_types::{Credits, UserId};

/// Wallet bucket type
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    #[default]
    Main,
    Task,
    Royalty,
}

impl WalletType {
    pub const ALL: [WalletType; 3] = [WalletType::Main, WalletType::Task, WalletType::Royalty];

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Main => "main",
            WalletType::Task => "task",
            WalletType::Royalty => "royalty",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "main" => Ok(WalletType::Main),
            "task" => Ok(WalletType::Task),
            "royalty" => Ok(WalletType::Royalty),
            _ => Err(format!("Invalid wallet type: {}", s)),
        }
    }
}

/// Identity of one wallet row: (owner, bucket)
///
/// `Ord` gives the canonical lock-acquisition order used by the
/// coordinator, so two concurrent transfers touching the same pair of
/// wallets always lock them in the same sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WalletKey {
    pub user_id: UserId,
    pub wallet_type: WalletType,
}

impl WalletKey {
    pub fn new(user_id: UserId, wallet_type: WalletType) -> Self {
        Self {
            user_id,
            wallet_type,
        }
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.wallet_type)
    }
}

/// One wallet row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    key: WalletKey,                // PRIVATE - immutable after creation
    balance: Balance,              // PRIVATE - mutated through credit/debit
    pub updated_at: DateTime<Utc>, // stamped on every successful mutation
}

impl Wallet {
    pub fn new(key: WalletKey) -> Self {
        Self {
            key,
            balance: Balance::default(),
            updated_at: Utc::now(),
        }
    }

    #[inline(always)]
    pub fn key(&self) -> WalletKey {
        self.key
    }

    /// Current whole-unit balance
    #[inline(always)]
    pub fn balance(&self) -> Credits {
        self.balance.units()
    }

    /// Headroom check for an incoming credit
    #[inline(always)]
    pub fn can_credit(&self, amount: Credits) -> bool {
        self.balance.can_credit(amount)
    }

    pub fn credit(&mut self, amount: Credits) -> Result<(), BalanceError> {
        self.balance.credit(amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn debit(&mut self, amount: Credits) -> Result<(), BalanceError> {
        self.balance.debit(amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Point-in-time view of one member's balances, as handed to pollers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub main: Credits,
    pub task: Credits,
    pub royalty: Credits,
}

impl WalletSnapshot {
    pub fn get(&self, wallet_type: WalletType) -> Credits {
        match wallet_type {
            WalletType::Main => self.main,
            WalletType::Task => self.task,
            WalletType::Royalty => self.royalty,
        }
    }

    pub fn set(&mut self, wallet_type: WalletType, units: Credits) {
        match wallet_type {
            WalletType::Main => self.main = units,
            WalletType::Task => self.task = units,
            WalletType::Royalty => self.royalty = units,
        }
    }

    pub fn total(&self) -> Credits {
        self.main + self.task + self.royalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_type_roundtrip() {
        for wt in WalletType::ALL {
            assert_eq!(wt.as_str().parse::<WalletType>().unwrap(), wt);
        }
        assert!("savings".parse::<WalletType>().is_err());
    }

    #[test]
    fn test_wallet_key_ordering() {
        let a = WalletKey::new(1, WalletType::Main);
        let b = WalletKey::new(1, WalletType::Task);
        let c = WalletKey::new(2, WalletType::Main);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_wallet_mutation_stamps_updated_at() {
        let mut w = Wallet::new(WalletKey::new(7, WalletType::Main));
        let before = w.updated_at;
        w.credit(10).unwrap();
        assert!(w.updated_at >= before);
        assert_eq!(w.balance(), 10);
    }

    #[test]
    fn test_snapshot_get_set() {
        let mut snap = WalletSnapshot::default();
        snap.set(WalletType::Royalty, 42);
        assert_eq!(snap.get(WalletType::Royalty), 42);
        assert_eq!(snap.total(), 42);
    }
}
