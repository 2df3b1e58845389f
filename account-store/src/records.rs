use chrono::{DateTime, NaiveDate, Utc};
use core_types::types::{AccountKey, ShipTotals};
use serde::{Deserialize, Serialize};

/// Durable account row. Identity fields are refreshed by the periodic clan
/// job and on re-bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub key: AccountKey,
    pub display_name: String,
    pub clan_tag: Option<String>,
}

/// One cumulative statistics row per (account, ship, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub key: AccountKey,
    pub ship_id: u64,
    pub date: NaiveDate,
    pub battles: u64,
    pub wins: u64,
    pub shots: u64,
    pub hits: u64,
    pub damage: u64,
    pub frags: u64,
    pub survivals: u64,
    pub xp: u64,
    pub last_battle_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn from_totals(key: AccountKey, date: NaiveDate, totals: &ShipTotals) -> Self {
        Self {
            key,
            ship_id: totals.ship_id,
            date,
            battles: totals.battles,
            wins: totals.wins,
            shots: totals.shots,
            hits: totals.hits,
            damage: totals.damage,
            frags: totals.frags,
            survivals: totals.survivals,
            xp: totals.xp,
            last_battle_at: totals.last_battle_at,
        }
    }
}

/// All snapshot rows recorded for one account on one date.
#[derive(Debug, Clone)]
pub struct SnapshotPage {
    pub date: NaiveDate,
    pub rows: Vec<SnapshotRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub replaced: usize,
    /// Rows whose date marker moved forward because the last-battle
    /// timestamp was unchanged.
    pub refreshed: usize,
    pub unchanged: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.replaced + self.refreshed + self.unchanged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbindOutcome {
    NotBound,
    /// Binding removed; `account_deleted` is set when this was the last
    /// binding referencing the account.
    Removed { account_deleted: bool },
}
