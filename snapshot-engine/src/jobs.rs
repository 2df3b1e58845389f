//! Periodic maintenance over every stored account: clan-tag refresh and
//! the daily snapshot pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use account_store::records::{SnapshotRecord, UpsertSummary};
use account_store::Store;
use chrono::Utc;
use core_types::types::Region;
use log::{info, warn};
use shard_client::fanout::FanOut;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::SnapshotError;

#[derive(Clone)]
pub struct MaintenanceJobs {
    fanout: Arc<FanOut>,
    store: Arc<dyn Store>,
}

impl MaintenanceJobs {
    pub fn new(fanout: Arc<FanOut>, store: Arc<dyn Store>) -> Self {
        Self { fanout, store }
    }

    /// Refresh display names and clan tags from the clan endpoints, one
    /// concurrent lookup per stored account. Accounts whose lookup comes
    /// back empty keep their stored identity; an empty result cannot be
    /// told apart from an exhausted retry budget, so it never clears data.
    pub async fn refresh_clan_tags(
        &self,
        cancel: &CancellationToken,
    ) -> Result<usize, SnapshotError> {
        let accounts = self.store.list_accounts().await?;
        let mut set = JoinSet::new();
        for account in accounts {
            let fanout = Arc::clone(&self.fanout);
            let cancel = cancel.clone();
            set.spawn(async move {
                let clan = fanout.fetch_clan(account.key, &cancel).await;
                (account, clan)
            });
        }

        let mut updated = 0;
        while let Some(joined) = set.join_next().await {
            let Ok((account, clan)) = joined else {
                continue;
            };
            match clan {
                Ok(Some(clan)) => {
                    let changed = self
                        .store
                        .update_account_identity(
                            account.key,
                            &clan.account_name,
                            Some(clan.tag),
                        )
                        .await?;
                    if changed {
                        updated += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("clan refresh for {} failed: {err}", account.key),
            }
        }
        info!("clan refresh updated {updated} account(s)");
        Ok(updated)
    }

    /// Record today's cumulative row for every stored account, batched per
    /// region. Re-running within the same day is a no-op for accounts with
    /// no new battles.
    pub async fn record_daily_snapshots(
        &self,
        cancel: &CancellationToken,
    ) -> Result<UpsertSummary, SnapshotError> {
        let accounts = self.store.list_accounts().await?;
        if accounts.is_empty() {
            return Ok(UpsertSummary::default());
        }

        let mut ids_by_region: BTreeMap<Region, Vec<u64>> = BTreeMap::new();
        for account in &accounts {
            ids_by_region
                .entry(account.key.region)
                .or_default()
                .push(account.key.account_id);
        }

        let players = self.fanout.fetch_all(ids_by_region, cancel).await?;
        let today = Utc::now().date_naive();
        let mut rows = Vec::new();
        for (key, player) in players {
            for ship in &player.ships {
                rows.push(SnapshotRecord::from_totals(key, today, ship));
            }
        }

        let summary = self.store.upsert_snapshots(rows).await?;
        info!(
            "daily snapshot pass: {} inserted, {} replaced, {} refreshed, {} unchanged",
            summary.inserted, summary.replaced, summary.refreshed, summary.unchanged
        );
        Ok(summary)
    }

    pub fn spawn_clan_refresh_loop(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let jobs = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = jobs.refresh_clan_tags(&cancel).await {
                            warn!("clan refresh pass failed: {err}");
                        }
                    }
                }
            }
        })
    }

    pub fn spawn_snapshot_loop(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let jobs = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = jobs.record_daily_snapshots(&cancel).await {
                            warn!("daily snapshot pass failed: {err}");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use account_store::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use core_types::types::{
        AccountInfo, AccountKey, Candidate, ClanDetails, ClanMembership, ShipTotals,
    };
    use core_types::{ApiError, RetryPolicy};
    use shard_client::api::ShardApi;
    use std::collections::HashMap;

    struct JobShard {
        region: Region,
        ships: Vec<ShipTotals>,
        clan: Option<(ClanMembership, ClanDetails)>,
    }

    #[async_trait]
    impl ShardApi for JobShard {
        fn region(&self) -> Region {
            self.region
        }

        async fn search(&self, _keyword: &str, _limit: u32) -> Result<Vec<Candidate>, ApiError> {
            Ok(Vec::new())
        }

        async fn personal_data(&self, ids: &[u64]) -> Result<Vec<AccountInfo>, ApiError> {
            Ok(ids
                .iter()
                .map(|id| AccountInfo {
                    account_id: *id,
                    nickname: format!("player-{id}"),
                    last_battle_at: None,
                })
                .collect())
        }

        async fn statistics(
            &self,
            ids: &[u64],
        ) -> Result<HashMap<u64, Vec<ShipTotals>>, ApiError> {
            Ok(ids.iter().map(|id| (*id, self.ships.clone())).collect())
        }

        async fn clan_membership(
            &self,
            _account_id: u64,
        ) -> Result<Option<ClanMembership>, ApiError> {
            Ok(self.clan.as_ref().map(|(membership, _)| membership.clone()))
        }

        async fn clan_details(&self, _clan_id: u64) -> Result<Option<ClanDetails>, ApiError> {
            Ok(self.clan.as_ref().map(|(_, details)| details.clone()))
        }
    }

    fn jobs_with(shard: JobShard) -> (MaintenanceJobs, Arc<MemoryStore>) {
        let fanout = FanOut::new(
            RetryPolicy::new(1, Duration::from_millis(1)),
            3,
            Duration::from_secs(5),
        )
        .with_client(Arc::new(shard));
        let store = Arc::new(MemoryStore::new());
        (
            MaintenanceJobs::new(Arc::new(fanout), Arc::clone(&store) as Arc<dyn Store>),
            store,
        )
    }

    fn ship(battles: u64) -> ShipTotals {
        ShipTotals {
            ship_id: 7,
            battles,
            wins: battles / 2,
            shots: battles * 10,
            hits: battles * 3,
            damage: battles * 1_000,
            frags: battles,
            survivals: battles / 3,
            xp: battles * 100,
            last_battle_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn daily_pass_records_rows_and_reruns_are_idempotent() {
        let (jobs, store) = jobs_with(JobShard {
            region: Region::Na,
            ships: vec![ship(42)],
            clan: None,
        });
        store
            .get_or_create_account(AccountKey::new(Region::Na, 5001), "alpha", None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let first = jobs.record_daily_snapshots(&cancel).await.unwrap();
        assert_eq!(first.inserted, 1);

        // Same last-battle timestamp on the rerun, so nothing changes.
        let second = jobs.record_daily_snapshots(&cancel).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn daily_pass_with_no_accounts_is_a_no_op() {
        let (jobs, _store) = jobs_with(JobShard {
            region: Region::Na,
            ships: vec![ship(1)],
            clan: None,
        });
        let cancel = CancellationToken::new();
        let summary = jobs.record_daily_snapshots(&cancel).await.unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn clan_refresh_updates_tag_and_name() {
        let (jobs, store) = jobs_with(JobShard {
            region: Region::Na,
            ships: Vec::new(),
            clan: Some((
                ClanMembership {
                    clan_id: 99,
                    account_name: "alpha_renamed".to_string(),
                },
                ClanDetails {
                    clan_id: 99,
                    tag: "TAG".to_string(),
                    name: "Some Clan".to_string(),
                },
            )),
        });
        let key = AccountKey::new(Region::Na, 5001);
        store
            .get_or_create_account(key, "alpha", None)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let updated = jobs.refresh_clan_tags(&cancel).await.unwrap();
        assert_eq!(updated, 1);
        let accounts = store.list_accounts().await.unwrap();
        assert_eq!(accounts[0].display_name, "alpha_renamed");
        assert_eq!(accounts[0].clan_tag.as_deref(), Some("TAG"));

        // A second pass sees no change.
        assert_eq!(jobs.refresh_clan_tags(&cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clanless_lookup_keeps_stored_identity() {
        let (jobs, store) = jobs_with(JobShard {
            region: Region::Na,
            ships: Vec::new(),
            clan: None,
        });
        let key = AccountKey::new(Region::Na, 5001);
        store
            .get_or_create_account(key, "alpha", Some("OLD".to_string()))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        assert_eq!(jobs.refresh_clan_tags(&cancel).await.unwrap(), 0);
        let accounts = store.list_accounts().await.unwrap();
        assert_eq!(accounts[0].clan_tag.as_deref(), Some("OLD"));
    }
}
