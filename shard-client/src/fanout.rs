use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use core_types::types::{AccountKey, CandidateSet, PlayerData, Region};
use core_types::{ApiError, RetryPolicy};
use log::warn;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::api::ShardApi;

#[derive(Debug, Error)]
pub enum FanOutError {
    #[error("no shard client configured for {0}")]
    UnknownRegion(Region),
    #[error("shard {region} failed: {source}")]
    ShardFailed { region: Region, source: ApiError },
    #[error("every shard failed: {0}")]
    AllShardsFailed(ApiError),
    #[error("fan-out cancelled")]
    Cancelled,
    #[error("fan-out exceeded its time budget")]
    Timeout,
}

/// Clan affiliation resolved through the membership + details endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClan {
    pub tag: String,
    pub account_name: String,
}

/// Issues one logical query against every configured shard concurrently.
///
/// Each shard task runs its call through the retry executor with its own
/// credential draw; a failing shard never cancels its siblings. The whole
/// fan-out is bounded by `total_timeout` and by the caller's cancellation
/// token, either of which aborts all outstanding tasks and discards partial
/// results.
pub struct FanOut {
    clients: BTreeMap<Region, Arc<dyn ShardApi>>,
    policy: RetryPolicy,
    search_limit: u32,
    total_timeout: Duration,
}

impl FanOut {
    pub fn new(policy: RetryPolicy, search_limit: u32, total_timeout: Duration) -> Self {
        Self {
            clients: BTreeMap::new(),
            policy,
            search_limit,
            total_timeout,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ShardApi>) -> Self {
        self.clients.insert(client.region(), client);
        self
    }

    pub fn regions(&self) -> Vec<Region> {
        self.clients.keys().copied().collect()
    }

    /// Search every shard for `keyword`. Within one shard the remote's order
    /// is preserved; across shards the interleave follows task completion.
    /// Shards whose retry budget is exhausted contribute nothing; the call
    /// only fails as a whole when every shard failed fatally (or on
    /// cancellation/timeout).
    pub async fn search_all(
        &self,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> Result<CandidateSet, FanOutError> {
        let mut set = JoinSet::new();
        for client in self.clients.values() {
            let client = Arc::clone(client);
            let policy = self.policy.clone();
            let keyword = keyword.to_string();
            let limit = self.search_limit;
            set.spawn(async move {
                let region = client.region();
                let result = policy
                    .execute("account search", || client.search(&keyword, limit))
                    .await;
                (region, result)
            });
        }
        let shard_count = set.len();
        let results = self.join_shards(set, cancel).await?;

        let mut merged = CandidateSet::default();
        let mut fatal = Vec::new();
        for (region, result) in results {
            match result {
                Ok(Some(mut found)) => merged.candidates.append(&mut found),
                Ok(None) => {}
                Err(err) => {
                    warn!("search on {region} failed fatally: {err}");
                    fatal.push(err);
                }
            }
        }
        if fatal.len() == shard_count && shard_count > 0 {
            return Err(FanOutError::AllShardsFailed(fatal.remove(0)));
        }
        Ok(merged)
    }

    /// Fetch personal data and per-ship statistics for a batch of accounts,
    /// one task per region, merged into a map keyed by account identity.
    /// Account ids are only unique within a shard, so the key carries the
    /// region.
    pub async fn fetch_all(
        &self,
        ids_by_region: BTreeMap<Region, Vec<u64>>,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<AccountKey, PlayerData>, FanOutError> {
        let mut set = JoinSet::new();
        for (region, ids) in ids_by_region {
            let Some(client) = self.clients.get(&region) else {
                warn!("no shard client for {region}; skipping {} account(s)", ids.len());
                continue;
            };
            let client = Arc::clone(client);
            let policy = self.policy.clone();
            set.spawn(async move {
                let details = policy
                    .execute("personal data", || client.personal_data(&ids))
                    .await;
                let stats = policy
                    .execute("ship statistics", || client.statistics(&ids))
                    .await;
                (region, details, stats)
            });
        }
        let shard_count = set.len();
        let results = self.join_shards(set, cancel).await?;

        let mut merged: BTreeMap<AccountKey, PlayerData> = BTreeMap::new();
        let mut fatal = Vec::new();
        for (region, details, stats) in results {
            let mut region_fatal = None;
            match details {
                Ok(Some(infos)) => {
                    for info in infos {
                        let key = AccountKey::new(region, info.account_id);
                        merged.entry(key).or_default().info = Some(info);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("personal data fetch on {region} failed fatally: {err}");
                    region_fatal = Some(err);
                }
            }
            match stats {
                Ok(Some(by_account)) => {
                    for (account_id, ships) in by_account {
                        let key = AccountKey::new(region, account_id);
                        merged.entry(key).or_default().ships = ships;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("statistics fetch on {region} failed fatally: {err}");
                    region_fatal.get_or_insert(err);
                }
            }
            if let Some(err) = region_fatal {
                fatal.push(err);
            }
        }
        if fatal.len() == shard_count && shard_count > 0 {
            return Err(FanOutError::AllShardsFailed(fatal.remove(0)));
        }
        Ok(merged)
    }

    /// Fetch one account's live data from its home shard. `Ok(None)` means
    /// the retry budget was exhausted without data.
    pub async fn fetch_account(
        &self,
        key: AccountKey,
        cancel: &CancellationToken,
    ) -> Result<Option<PlayerData>, FanOutError> {
        let client = self.client_for(key.region)?;
        let policy = self.policy.clone();
        let work = async move {
            let ids = [key.account_id];
            let info = policy
                .execute("personal data", || client.personal_data(&ids))
                .await
                .map_err(|source| FanOutError::ShardFailed {
                    region: key.region,
                    source,
                })?;
            let stats = policy
                .execute("ship statistics", || client.statistics(&ids))
                .await
                .map_err(|source| FanOutError::ShardFailed {
                    region: key.region,
                    source,
                })?;
            let Some(mut stats) = stats else {
                return Ok(None);
            };
            let ships = stats.remove(&key.account_id).unwrap_or_default();
            let info = info
                .into_iter()
                .flatten()
                .find(|row| row.account_id == key.account_id);
            Ok(Some(PlayerData { info, ships }))
        };
        self.bounded(work, cancel).await?
    }

    /// Resolve an account's clan tag, best-effort: exhausted retries and
    /// clanless accounts both come back as `Ok(None)`.
    pub async fn fetch_clan(
        &self,
        key: AccountKey,
        cancel: &CancellationToken,
    ) -> Result<Option<ResolvedClan>, FanOutError> {
        let client = self.client_for(key.region)?;
        let policy = self.policy.clone();
        let work = async move {
            let membership = policy
                .execute("clan membership", || client.clan_membership(key.account_id))
                .await
                .map_err(|source| FanOutError::ShardFailed {
                    region: key.region,
                    source,
                })?;
            let Some(Some(membership)) = membership else {
                return Ok(None);
            };
            let details = policy
                .execute("clan details", || client.clan_details(membership.clan_id))
                .await
                .map_err(|source| FanOutError::ShardFailed {
                    region: key.region,
                    source,
                })?;
            Ok(details.flatten().map(|details| ResolvedClan {
                tag: details.tag,
                account_name: membership.account_name,
            }))
        };
        self.bounded(work, cancel).await?
    }

    fn client_for(&self, region: Region) -> Result<Arc<dyn ShardApi>, FanOutError> {
        self.clients
            .get(&region)
            .cloned()
            .ok_or(FanOutError::UnknownRegion(region))
    }

    async fn bounded<T>(
        &self,
        work: impl Future<Output = T>,
        cancel: &CancellationToken,
    ) -> Result<T, FanOutError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FanOutError::Cancelled),
            result = timeout(self.total_timeout, work) => {
                result.map_err(|_| FanOutError::Timeout)
            }
        }
    }

    /// Structured join: all shard tasks complete before the caller proceeds,
    /// unless the whole fan-out is cancelled or runs past its time budget.
    async fn join_shards<T: Send + 'static>(
        &self,
        mut set: JoinSet<T>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, FanOutError> {
        let mut results = Vec::with_capacity(set.len());
        let deadline = tokio::time::sleep(self.total_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    return Err(FanOutError::Cancelled);
                }
                _ = &mut deadline => {
                    set.abort_all();
                    return Err(FanOutError::Timeout);
                }
                joined = set.join_next() => match joined {
                    None => return Ok(results),
                    Some(Ok(item)) => results.push(item),
                    Some(Err(err)) if err.is_cancelled() => {}
                    Some(Err(err)) => warn!("fan-out task failed to join: {err}"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use core_types::types::{
        AccountInfo, Candidate, ClanDetails, ClanMembership, ShipTotals,
    };
    use std::collections::HashMap;

    enum SearchScript {
        Found(Vec<&'static str>),
        Fail(ApiError),
        Hang,
    }

    struct StubShard {
        region: Region,
        search: SearchScript,
        ships: HashMap<u64, Vec<ShipTotals>>,
        infos: Vec<AccountInfo>,
    }

    impl StubShard {
        fn found(region: Region, names: Vec<&'static str>) -> Self {
            Self {
                region,
                search: SearchScript::Found(names),
                ships: HashMap::new(),
                infos: Vec::new(),
            }
        }

        fn failing(region: Region, err: ApiError) -> Self {
            Self {
                region,
                search: SearchScript::Fail(err),
                ships: HashMap::new(),
                infos: Vec::new(),
            }
        }

        fn hanging(region: Region) -> Self {
            Self {
                region,
                search: SearchScript::Hang,
                ships: HashMap::new(),
                infos: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ShardApi for StubShard {
        fn region(&self) -> Region {
            self.region
        }

        async fn search(&self, _keyword: &str, _limit: u32) -> Result<Vec<Candidate>, ApiError> {
            match &self.search {
                SearchScript::Found(names) => Ok(names
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| Candidate {
                        display_name: name.to_string(),
                        account_id: 1000 + idx as u64,
                        region: self.region,
                    })
                    .collect()),
                SearchScript::Fail(err) => Err(err.clone()),
                SearchScript::Hang => std::future::pending().await,
            }
        }

        async fn personal_data(&self, _ids: &[u64]) -> Result<Vec<AccountInfo>, ApiError> {
            Ok(self.infos.clone())
        }

        async fn statistics(
            &self,
            _ids: &[u64],
        ) -> Result<HashMap<u64, Vec<ShipTotals>>, ApiError> {
            Ok(self.ships.clone())
        }

        async fn clan_membership(
            &self,
            _account_id: u64,
        ) -> Result<Option<ClanMembership>, ApiError> {
            Ok(None)
        }

        async fn clan_details(&self, _clan_id: u64) -> Result<Option<ClanDetails>, ApiError> {
            Ok(None)
        }
    }

    fn fanout_with(clients: Vec<StubShard>) -> FanOut {
        let mut fanout = FanOut::new(
            RetryPolicy::new(1, Duration::from_millis(1)),
            3,
            Duration::from_secs(5),
        );
        for client in clients {
            fanout = fanout.with_client(Arc::new(client));
        }
        fanout
    }

    #[tokio::test]
    async fn partial_shard_failure_keeps_surviving_candidates() {
        let fanout = fanout_with(vec![
            StubShard::found(Region::Asia, vec!["alpha", "beta"]),
            StubShard::failing(
                Region::Eu,
                ApiError::Auth {
                    message: "INVALID_APPLICATION_ID".to_string(),
                },
            ),
            StubShard::failing(Region::Na, ApiError::Network("reset".to_string())),
        ]);
        let cancel = CancellationToken::new();
        let set = fanout.search_all("alp", &cancel).await.unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.candidates.iter().all(|c| c.region == Region::Asia));
        // Order within the shard is the remote's returned order.
        assert_eq!(set.candidates[0].display_name, "alpha");
        assert_eq!(set.candidates[1].display_name, "beta");
    }

    #[tokio::test]
    async fn all_shards_failing_fatally_surfaces_the_error() {
        let fanout = fanout_with(vec![
            StubShard::failing(
                Region::Asia,
                ApiError::Auth {
                    message: "INVALID_APPLICATION_ID".to_string(),
                },
            ),
            StubShard::failing(
                Region::Eu,
                ApiError::Remote {
                    code: 404,
                    message: "METHOD_NOT_FOUND".to_string(),
                },
            ),
        ]);
        let cancel = CancellationToken::new();
        let err = fanout.search_all("x", &cancel).await.unwrap_err();
        assert!(matches!(err, FanOutError::AllShardsFailed(_)));
    }

    #[tokio::test]
    async fn exhausted_shards_merge_as_empty_not_error() {
        let fanout = fanout_with(vec![StubShard::failing(
            Region::Asia,
            ApiError::Network("reset".to_string()),
        )]);
        let cancel = CancellationToken::new();
        let set = fanout.search_all("x", &cancel).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_outstanding_shards() {
        let fanout = fanout_with(vec![StubShard::hanging(Region::Asia)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fanout.search_all("x", &cancel).await.unwrap_err();
        assert!(matches!(err, FanOutError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_shard_hits_the_time_budget() {
        let mut fanout = FanOut::new(
            RetryPolicy::new(1, Duration::from_millis(1)),
            3,
            Duration::from_millis(50),
        );
        fanout = fanout.with_client(Arc::new(StubShard::hanging(Region::Asia)));
        let cancel = CancellationToken::new();
        let err = fanout.search_all("x", &cancel).await.unwrap_err();
        assert!(matches!(err, FanOutError::Timeout));
    }

    #[tokio::test]
    async fn fetch_all_merges_details_and_statistics_per_account() {
        let now = Utc::now();
        let ship = ShipTotals {
            ship_id: 7,
            battles: 10,
            wins: 6,
            shots: 100,
            hits: 30,
            damage: 50_000,
            frags: 9,
            survivals: 4,
            xp: 12_000,
            last_battle_at: now,
        };
        let mut shard = StubShard::found(Region::Asia, vec![]);
        shard.infos = vec![AccountInfo {
            account_id: 1000,
            nickname: "alpha".to_string(),
            last_battle_at: Some(now),
        }];
        shard.ships = HashMap::from([(1000, vec![ship])]);
        let fanout = fanout_with(vec![shard]);
        let cancel = CancellationToken::new();
        let merged = fanout
            .fetch_all(
                BTreeMap::from([(Region::Asia, vec![1000])]),
                &cancel,
            )
            .await
            .unwrap();
        let player = merged.get(&AccountKey::new(Region::Asia, 1000)).unwrap();
        assert_eq!(player.info.as_ref().unwrap().nickname, "alpha");
        assert_eq!(player.ships.len(), 1);
        assert_eq!(player.ships[0].battles, 10);
    }

    #[tokio::test]
    async fn same_account_id_on_two_shards_stays_two_accounts() {
        let now = Utc::now();
        let mut asia = StubShard::found(Region::Asia, vec![]);
        asia.infos = vec![AccountInfo {
            account_id: 1000,
            nickname: "asia_player".to_string(),
            last_battle_at: Some(now),
        }];
        let mut eu = StubShard::found(Region::Eu, vec![]);
        eu.infos = vec![AccountInfo {
            account_id: 1000,
            nickname: "eu_player".to_string(),
            last_battle_at: Some(now),
        }];
        let fanout = fanout_with(vec![asia, eu]);
        let cancel = CancellationToken::new();
        let merged = fanout
            .fetch_all(
                BTreeMap::from([
                    (Region::Asia, vec![1000]),
                    (Region::Eu, vec![1000]),
                ]),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(merged.len(), 2);
        let asia_player = merged.get(&AccountKey::new(Region::Asia, 1000)).unwrap();
        assert_eq!(asia_player.info.as_ref().unwrap().nickname, "asia_player");
        let eu_player = merged.get(&AccountKey::new(Region::Eu, 1000)).unwrap();
        assert_eq!(eu_player.info.as_ref().unwrap().nickname, "eu_player");
    }
}
