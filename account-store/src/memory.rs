use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::types::AccountKey;
use log::warn;
use parking_lot::RwLock;

use crate::records::{
    AccountRecord, SnapshotPage, SnapshotRecord, UnbindOutcome, UpsertSummary,
};
use crate::{Result, Store, StoreError};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountKey, AccountRecord>,
    bindings: HashMap<String, AccountKey>,
    // Per account, keyed (ship_id, date) so the latest earlier row for a
    // ship is a range lookup.
    snapshots: HashMap<AccountKey, BTreeMap<(u64, NaiveDate), SnapshotRecord>>,
}

/// In-process store. A single lock serializes writers, which is what gives
/// concurrent upserts for the same (account, ship, date) last-writer-wins
/// semantics after the merge rule.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_account(
        &self,
        key: AccountKey,
        display_name: &str,
        clan_tag: Option<String>,
    ) -> Result<(AccountRecord, bool)> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.accounts.get(&key) {
            return Ok((existing.clone(), false));
        }
        let record = AccountRecord {
            key,
            display_name: display_name.to_string(),
            clan_tag,
        };
        inner.accounts.insert(key, record.clone());
        Ok((record, true))
    }

    async fn update_account_identity(
        &self,
        key: AccountKey,
        display_name: &str,
        clan_tag: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        let record = inner
            .accounts
            .get_mut(&key)
            .ok_or(StoreError::AccountMissing(key))?;
        let changed = record.display_name != display_name || record.clan_tag != clan_tag;
        if changed {
            record.display_name = display_name.to_string();
            record.clan_tag = clan_tag;
        }
        Ok(changed)
    }

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        let inner = self.inner.read();
        let mut accounts: Vec<_> = inner.accounts.values().cloned().collect();
        accounts.sort_by_key(|record| record.key);
        Ok(accounts)
    }

    async fn create_binding(&self, requester: &str, key: AccountKey) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.accounts.contains_key(&key) {
            return Err(StoreError::AccountMissing(key));
        }
        if inner.bindings.contains_key(requester) {
            return Err(StoreError::BindingConflict {
                requester: requester.to_string(),
            });
        }
        inner.bindings.insert(requester.to_string(), key);
        Ok(())
    }

    async fn binding_for(&self, requester: &str) -> Result<Option<AccountRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .bindings
            .get(requester)
            .and_then(|key| inner.accounts.get(key))
            .cloned())
    }

    async fn remove_binding(&self, requester: &str) -> Result<UnbindOutcome> {
        let mut inner = self.inner.write();
        let Some(key) = inner.bindings.remove(requester) else {
            return Ok(UnbindOutcome::NotBound);
        };
        let still_referenced = inner.bindings.values().any(|bound| *bound == key);
        if !still_referenced {
            inner.accounts.remove(&key);
            inner.snapshots.remove(&key);
        }
        Ok(UnbindOutcome::Removed {
            account_deleted: !still_referenced,
        })
    }

    async fn upsert_snapshots(&self, rows: Vec<SnapshotRecord>) -> Result<UpsertSummary> {
        let mut inner = self.inner.write();
        let mut summary = UpsertSummary::default();
        for row in rows {
            let by_ship = inner.snapshots.entry(row.key).or_default();
            if let Some(existing) = by_ship.get_mut(&(row.ship_id, row.date)) {
                if existing.last_battle_at == row.last_battle_at {
                    summary.unchanged += 1;
                } else {
                    if row.last_battle_at < existing.last_battle_at {
                        warn!(
                            "snapshot for {} ship {} reports a last battle older than stored ({} < {})",
                            row.key, row.ship_id, row.last_battle_at, existing.last_battle_at
                        );
                    }
                    *existing = row;
                    summary.replaced += 1;
                }
                continue;
            }
            // No row at this date. If the latest earlier row carries the
            // same last-battle timestamp there were no new battles; only the
            // date marker moves, values stay.
            let prev = by_ship
                .range((row.ship_id, NaiveDate::MIN)..(row.ship_id, row.date))
                .next_back()
                .map(|(prev_key, prev_row)| (*prev_key, prev_row.last_battle_at));
            if let Some((prev_key, prev_last_battle)) = prev {
                if prev_last_battle == row.last_battle_at {
                    if let Some(mut moved) = by_ship.remove(&prev_key) {
                        moved.date = row.date;
                        by_ship.insert((row.ship_id, row.date), moved);
                        summary.refreshed += 1;
                        continue;
                    }
                }
            }
            by_ship.insert((row.ship_id, row.date), row);
            summary.inserted += 1;
        }
        Ok(summary)
    }

    async fn latest_snapshot_date(&self, key: AccountKey) -> Result<Option<NaiveDate>> {
        let inner = self.inner.read();
        Ok(inner
            .snapshots
            .get(&key)
            .and_then(|by_ship| by_ship.keys().map(|(_, date)| *date).max()))
    }

    async fn snapshots_at_or_before(
        &self,
        key: AccountKey,
        date: NaiveDate,
    ) -> Result<Option<SnapshotPage>> {
        let inner = self.inner.read();
        let Some(by_ship) = inner.snapshots.get(&key) else {
            return Ok(None);
        };
        let Some(target) = by_ship
            .keys()
            .map(|(_, row_date)| *row_date)
            .filter(|row_date| *row_date <= date)
            .max()
        else {
            return Ok(None);
        };
        let rows = by_ship
            .values()
            .filter(|row| row.date == target)
            .cloned()
            .collect();
        Ok(Some(SnapshotPage { date: target, rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use core_types::types::Region;

    fn key() -> AccountKey {
        AccountKey::new(Region::Asia, 2001)
    }

    fn snapshot(date: (i32, u32, u32), battles: u64, last_battle_ts: i64) -> SnapshotRecord {
        SnapshotRecord {
            key: key(),
            ship_id: 7,
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            battles,
            wins: battles / 2,
            shots: battles * 10,
            hits: battles * 3,
            damage: battles * 1_000,
            frags: battles,
            survivals: battles / 3,
            xp: battles * 100,
            last_battle_at: Utc.timestamp_opt(last_battle_ts, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn second_binding_for_same_requester_is_a_conflict() {
        let store = MemoryStore::new();
        store
            .get_or_create_account(key(), "alpha", None)
            .await
            .unwrap();
        store.create_binding("user-1", key()).await.unwrap();
        let err = store.create_binding("user-1", key()).await.unwrap_err();
        assert!(matches!(err, StoreError::BindingConflict { .. }));
        // Still exactly one binding.
        assert!(store.binding_for("user-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unbind_cascades_to_unreferenced_account() {
        let store = MemoryStore::new();
        store
            .get_or_create_account(key(), "alpha", None)
            .await
            .unwrap();
        store.create_binding("user-1", key()).await.unwrap();
        store.create_binding("user-2", key()).await.unwrap();

        let first = store.remove_binding("user-1").await.unwrap();
        assert_eq!(
            first,
            UnbindOutcome::Removed {
                account_deleted: false
            }
        );
        assert!(!store.list_accounts().await.unwrap().is_empty());

        let second = store.remove_binding("user-2").await.unwrap();
        assert_eq!(
            second,
            UnbindOutcome::Removed {
                account_deleted: true
            }
        );
        assert!(store.list_accounts().await.unwrap().is_empty());
        assert_eq!(
            store.remove_binding("user-2").await.unwrap(),
            UnbindOutcome::NotBound
        );
    }

    #[tokio::test]
    async fn upsert_is_idempotent_for_identical_rows() {
        let store = MemoryStore::new();
        let row = snapshot((2026, 8, 20), 100, 1_700_000_000);
        let first = store.upsert_snapshots(vec![row.clone()]).await.unwrap();
        assert_eq!(first.inserted, 1);
        let second = store.upsert_snapshots(vec![row.clone()]).await.unwrap();
        assert_eq!(second.unchanged, 1);
        let page = store
            .snapshots_at_or_before(key(), row.date)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0], row);
    }

    #[tokio::test]
    async fn unchanged_last_battle_moves_date_marker_only() {
        let store = MemoryStore::new();
        let monday = snapshot((2026, 8, 17), 100, 1_700_000_000);
        store.upsert_snapshots(vec![monday.clone()]).await.unwrap();

        // Same last-battle timestamp fetched three days later: no new
        // battles, so the (possibly stale) incoming values must not land.
        let thursday = snapshot((2026, 8, 20), 120, 1_700_000_000);
        let summary = store.upsert_snapshots(vec![thursday]).await.unwrap();
        assert_eq!(summary.refreshed, 1);

        let latest = store.latest_snapshot_date(key()).await.unwrap().unwrap();
        assert_eq!(latest, NaiveDate::from_ymd_opt(2026, 8, 20).unwrap());
        let page = store
            .snapshots_at_or_before(key(), latest)
            .await
            .unwrap()
            .unwrap();
        // Values are still Monday's; only the date moved.
        assert_eq!(page.rows[0].battles, 100);
        // The old date no longer holds a row.
        let earlier = store
            .snapshots_at_or_before(key(), NaiveDate::from_ymd_opt(2026, 8, 19).unwrap())
            .await
            .unwrap();
        assert!(earlier.is_none());
    }

    #[tokio::test]
    async fn changed_last_battle_replaces_values() {
        let store = MemoryStore::new();
        store
            .upsert_snapshots(vec![snapshot((2026, 8, 20), 100, 1_700_000_000)])
            .await
            .unwrap();
        let summary = store
            .upsert_snapshots(vec![snapshot((2026, 8, 20), 137, 1_700_090_000)])
            .await
            .unwrap();
        assert_eq!(summary.replaced, 1);
        let page = store
            .snapshots_at_or_before(key(), NaiveDate::from_ymd_opt(2026, 8, 20).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.rows[0].battles, 137);
    }

    #[tokio::test]
    async fn new_date_with_new_battles_inserts_alongside_history() {
        let store = MemoryStore::new();
        store
            .upsert_snapshots(vec![snapshot((2026, 8, 17), 100, 1_700_000_000)])
            .await
            .unwrap();
        let summary = store
            .upsert_snapshots(vec![snapshot((2026, 8, 20), 137, 1_700_090_000)])
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);

        // Both dates queryable: baseline selection picks the latest at or
        // before the asked-for date.
        let early = store
            .snapshots_at_or_before(key(), NaiveDate::from_ymd_opt(2026, 8, 18).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(early.rows[0].battles, 100);
        let late = store
            .snapshots_at_or_before(key(), NaiveDate::from_ymd_opt(2026, 8, 25).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.rows[0].battles, 137);
    }
}
