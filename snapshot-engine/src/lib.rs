//! Recent-activity deltas over stored cumulative snapshots.
//!
//! A snapshot row holds cumulative per-ship counters as of a date. Recent
//! activity is live counters minus the chosen baseline row, ship by ship.

pub mod jobs;

use std::collections::HashMap;
use std::sync::Arc;

use account_store::records::{SnapshotRecord, UpsertSummary};
use account_store::{Store, StoreError};
use chrono::NaiveDate;
use core_types::types::{AccountKey, ShipTotals};
use log::warn;
use shard_client::fanout::{FanOut, FanOutError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no stored snapshot to diff against")]
    NoBaseline,
    #[error("live statistics unavailable after retries")]
    LiveDataUnavailable,
    #[error(transparent)]
    FanOut(#[from] FanOutError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-ship difference between live counters and the baseline row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipDelta {
    pub ship_id: u64,
    pub battles: u64,
    pub wins: u64,
    pub shots: u64,
    pub hits: u64,
    pub damage: u64,
    pub frags: u64,
    pub survivals: u64,
    pub xp: u64,
}

/// Sums over every ship delta in a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityTotals {
    pub battles: u64,
    pub wins: u64,
    pub shots: u64,
    pub hits: u64,
    pub damage: u64,
    pub frags: u64,
    pub survivals: u64,
    pub xp: u64,
}

impl ActivityTotals {
    fn accumulate(&mut self, delta: &ShipDelta) {
        self.battles += delta.battles;
        self.wins += delta.wins;
        self.shots += delta.shots;
        self.hits += delta.hits;
        self.damage += delta.damage;
        self.frags += delta.frags;
        self.survivals += delta.survivals;
        self.xp += delta.xp;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentActivity {
    /// Date of the snapshot the live counters were diffed against.
    pub baseline_date: Option<NaiveDate>,
    pub ships: Vec<ShipDelta>,
    pub totals: ActivityTotals,
}

/// Records snapshots and computes activity reports for one account at a
/// time. Batch recording across all accounts lives in [`jobs`].
pub struct SnapshotEngine {
    fanout: Arc<FanOut>,
    store: Arc<dyn Store>,
}

impl SnapshotEngine {
    pub fn new(fanout: Arc<FanOut>, store: Arc<dyn Store>) -> Self {
        Self { fanout, store }
    }

    /// Store one cumulative row per ship at `date`, through the merge rule.
    pub async fn record(
        &self,
        key: AccountKey,
        date: NaiveDate,
        ships: &[ShipTotals],
    ) -> Result<UpsertSummary, SnapshotError> {
        let rows = ships
            .iter()
            .map(|totals| SnapshotRecord::from_totals(key, date, totals))
            .collect();
        Ok(self.store.upsert_snapshots(rows).await?)
    }

    /// Activity since the latest snapshot at or before `since` (the latest
    /// snapshot overall when `since` is `None`).
    ///
    /// Ships missing from the baseline report their full live counters as
    /// the delta. Ships present only in the baseline are omitted; live data
    /// is authoritative for what the account currently holds.
    pub async fn recent(
        &self,
        key: AccountKey,
        since: Option<NaiveDate>,
        cancel: &CancellationToken,
    ) -> Result<RecentActivity, SnapshotError> {
        let anchor = match since {
            Some(date) => date,
            None => self
                .store
                .latest_snapshot_date(key)
                .await?
                .ok_or(SnapshotError::NoBaseline)?,
        };
        let baseline = self
            .store
            .snapshots_at_or_before(key, anchor)
            .await?
            .ok_or(SnapshotError::NoBaseline)?;
        let live = self
            .fanout
            .fetch_account(key, cancel)
            .await?
            .ok_or(SnapshotError::LiveDataUnavailable)?;

        let by_ship: HashMap<u64, &SnapshotRecord> = baseline
            .rows
            .iter()
            .map(|row| (row.ship_id, row))
            .collect();
        let mut report = RecentActivity {
            baseline_date: Some(baseline.date),
            ..RecentActivity::default()
        };
        for current in &live.ships {
            let delta = ship_delta(key, current, by_ship.get(&current.ship_id).copied());
            report.totals.accumulate(&delta);
            report.ships.push(delta);
        }
        Ok(report)
    }
}

/// Counters are cumulative, so live values below the baseline indicate a
/// remote-side reset or revision. Those fields clamp to zero with a warning
/// rather than wrapping.
fn ship_delta(key: AccountKey, current: &ShipTotals, base: Option<&SnapshotRecord>) -> ShipDelta {
    let Some(base) = base else {
        return ShipDelta {
            ship_id: current.ship_id,
            battles: current.battles,
            wins: current.wins,
            shots: current.shots,
            hits: current.hits,
            damage: current.damage,
            frags: current.frags,
            survivals: current.survivals,
            xp: current.xp,
        };
    };
    let mut regressed = false;
    let delta = ShipDelta {
        ship_id: current.ship_id,
        battles: clamped(current.battles, base.battles, &mut regressed),
        wins: clamped(current.wins, base.wins, &mut regressed),
        shots: clamped(current.shots, base.shots, &mut regressed),
        hits: clamped(current.hits, base.hits, &mut regressed),
        damage: clamped(current.damage, base.damage, &mut regressed),
        frags: clamped(current.frags, base.frags, &mut regressed),
        survivals: clamped(current.survivals, base.survivals, &mut regressed),
        xp: clamped(current.xp, base.xp, &mut regressed),
    };
    if regressed {
        warn!(
            "live counters for {} ship {} fell below the stored snapshot; clamping to zero",
            key, current.ship_id
        );
    }
    delta
}

fn clamped(current: u64, prior: u64, regressed: &mut bool) -> u64 {
    if current < prior {
        *regressed = true;
        0
    } else {
        current - prior
    }
}
