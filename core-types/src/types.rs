use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One independent regional instance of the remote game-stats service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Asia,
    Eu,
    Na,
    Ru,
}

impl Region {
    pub const ALL: [Region; 4] = [Region::Asia, Region::Eu, Region::Na, Region::Ru];

    /// Base URL of the regional API endpoint.
    pub fn api_base_url(self) -> &'static str {
        match self {
            Region::Asia => "https://api.worldofwarships.asia",
            Region::Eu => "https://api.worldofwarships.eu",
            Region::Na => "https://api.worldofwarships.com",
            Region::Ru => "https://api.worldofwarships.ru",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Region::Asia => "Asia",
            Region::Eu => "EU",
            Region::Na => "NA",
            Region::Ru => "RU",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Unique identity of a game account: region plus the remote's opaque id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountKey {
    pub region: Region,
    pub account_id: u64,
}

impl AccountKey {
    pub fn new(region: Region, account_id: u64) -> Self {
        Self { region, account_id }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.account_id)
    }
}

/// One account returned by a shard search, tagged with its origin shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub display_name: String,
    pub account_id: u64,
    pub region: Region,
}

impl Candidate {
    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.region, self.account_id)
    }
}

/// Merged search results across shards. Transient; per-shard order is the
/// remote's returned order, cross-shard interleave is unspecified.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

/// Cumulative per-ship totals as reported by the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipTotals {
    pub ship_id: u64,
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

/// Account-level personal data from the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: u64,
    pub nickname: String,
    pub last_battle_at: Option<DateTime<Utc>>,
}

/// Personal data plus per-ship statistics for one account.
#[derive(Debug, Clone, Default)]
pub struct PlayerData {
    pub info: Option<AccountInfo>,
    pub ships: Vec<ShipTotals>,
}

/// Clan membership as reported for a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClanMembership {
    pub clan_id: u64,
    pub account_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClanDetails {
    pub clan_id: u64,
    pub tag: String,
    pub name: String,
}
