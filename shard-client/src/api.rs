use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use core_types::types::{
    AccountInfo, Candidate, ClanDetails, ClanMembership, Region, ShipTotals,
};
use core_types::ApiError;
use log::warn;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::rotator::CredentialRotator;

/// One regional game-stats API. Every call may fail transiently (network,
/// rate limit) or fatally (credential rejection, malformed request).
#[async_trait]
pub trait ShardApi: Send + Sync {
    fn region(&self) -> Region;

    /// Prefix search for accounts by display name, in the remote's order.
    async fn search(&self, keyword: &str, limit: u32) -> Result<Vec<Candidate>, ApiError>;

    async fn personal_data(&self, account_ids: &[u64]) -> Result<Vec<AccountInfo>, ApiError>;

    /// Cumulative per-ship statistics, keyed by account id.
    async fn statistics(
        &self,
        account_ids: &[u64],
    ) -> Result<HashMap<u64, Vec<ShipTotals>>, ApiError>;

    async fn clan_membership(&self, account_id: u64) -> Result<Option<ClanMembership>, ApiError>;

    async fn clan_details(&self, clan_id: u64) -> Result<Option<ClanDetails>, ApiError>;
}

/// HTTP client for one shard. Draws a fresh credential from the rotator on
/// every request.
pub struct WgShardClient {
    region: Region,
    client: Client,
    rotator: Arc<CredentialRotator>,
    base_url: String,
}

impl WgShardClient {
    pub fn new(region: Region, client: Client, rotator: Arc<CredentialRotator>) -> Self {
        Self {
            region,
            client,
            rotator,
            base_url: region.api_base_url().to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| ApiError::Decode(format!("invalid base url: {err}")))?;
        url.set_path(path);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("application_id", self.rotator.next());
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ApiError::Network(err.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            // Remote overload; worth another attempt.
            return Err(ApiError::Network(format!("http status {status}")));
        }
        if !status.is_success() {
            return Err(ApiError::Remote {
                code: status.as_u16(),
                message: format!("unexpected http status {status}"),
            });
        }
        let envelope: Envelope<T> = response.json().await.map_err(|err| {
            if err.is_decode() {
                ApiError::Decode(err.to_string())
            } else {
                ApiError::Network(err.to_string())
            }
        })?;
        envelope.into_data()
    }
}

#[async_trait]
impl ShardApi for WgShardClient {
    fn region(&self) -> Region {
        self.region
    }

    async fn search(&self, keyword: &str, limit: u32) -> Result<Vec<Candidate>, ApiError> {
        let rows: Vec<SearchRow> = self
            .get(
                "/wows/account/list/",
                &[
                    ("search", keyword.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Candidate {
                display_name: row.nickname,
                account_id: row.account_id,
                region: self.region,
            })
            .collect())
    }

    async fn personal_data(&self, account_ids: &[u64]) -> Result<Vec<AccountInfo>, ApiError> {
        let data: HashMap<String, Option<PersonalRow>> = self
            .get(
                "/wows/account/info/",
                &[("account_id", join_ids(account_ids))],
            )
            .await?;
        Ok(data
            .into_values()
            .flatten()
            .map(|row| AccountInfo {
                account_id: row.account_id,
                nickname: row.nickname,
                last_battle_at: row
                    .last_battle_time
                    .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            })
            .collect())
    }

    async fn statistics(
        &self,
        account_ids: &[u64],
    ) -> Result<HashMap<u64, Vec<ShipTotals>>, ApiError> {
        let data: HashMap<String, Option<Vec<ShipRow>>> = self
            .get(
                "/wows/ships/stats/",
                &[("account_id", join_ids(account_ids))],
            )
            .await?;
        let mut by_account = HashMap::new();
        for (account_id, rows) in data {
            let account_id: u64 = account_id
                .parse()
                .map_err(|_| ApiError::Decode(format!("non-numeric account key {account_id}")))?;
            let ships = rows
                .unwrap_or_default()
                .into_iter()
                .filter_map(|row| {
                    let ship_id = row.ship_id;
                    let totals = row.into_totals();
                    if totals.is_none() {
                        warn!(
                            "[{}] dropping ship {} with unparseable last battle time",
                            self.region, ship_id
                        );
                    }
                    totals
                })
                .collect();
            by_account.insert(account_id, ships);
        }
        Ok(by_account)
    }

    async fn clan_membership(&self, account_id: u64) -> Result<Option<ClanMembership>, ApiError> {
        let data: HashMap<String, Option<ClanMemberRow>> = self
            .get(
                "/wows/clans/accountinfo/",
                &[("account_id", account_id.to_string())],
            )
            .await?;
        Ok(data.into_values().flatten().next().and_then(|row| {
            row.clan_id.map(|clan_id| ClanMembership {
                clan_id,
                account_name: row.account_name,
            })
        }))
    }

    async fn clan_details(&self, clan_id: u64) -> Result<Option<ClanDetails>, ApiError> {
        let data: HashMap<String, Option<ClanRow>> = self
            .get("/wows/clans/info/", &[("clan_id", clan_id.to_string())])
            .await?;
        Ok(data.into_values().flatten().next().and_then(|row| {
            row.tag.map(|tag| ClanDetails {
                clan_id,
                tag,
                name: row.name.unwrap_or_default(),
            })
        }))
    }
}

fn join_ids(account_ids: &[u64]) -> String {
    account_ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Response envelope shared by every endpoint of the remote service.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    error: Option<RemoteErrorBody>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    code: u16,
    message: String,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ApiError> {
        if self.status == "ok" {
            return self
                .data
                .ok_or_else(|| ApiError::Decode("ok status without data field".to_string()));
        }
        let body = self
            .error
            .ok_or_else(|| ApiError::Decode("error status without error body".to_string()))?;
        Err(ApiError::from_remote(body.code, body.message))
    }
}

#[derive(Debug, Deserialize)]
struct SearchRow {
    nickname: String,
    account_id: u64,
}

#[derive(Debug, Deserialize)]
struct PersonalRow {
    account_id: u64,
    nickname: String,
    #[serde(default)]
    last_battle_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ShipRow {
    ship_id: u64,
    last_battle_time: i64,
    #[serde(default)]
    pvp: Option<PvpRow>,
}

impl ShipRow {
    fn into_totals(self) -> Option<ShipTotals> {
        let last_battle_at = DateTime::from_timestamp(self.last_battle_time, 0)?;
        let pvp = self.pvp.unwrap_or_default();
        Some(ShipTotals {
            ship_id: self.ship_id,
            battles: pvp.battles,
            wins: pvp.wins,
            shots: pvp.main_battery.shots,
            hits: pvp.main_battery.hits,
            damage: pvp.damage_dealt,
            frags: pvp.frags,
            survivals: pvp.survived_battles,
            xp: pvp.xp,
            last_battle_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PvpRow {
    battles: u64,
    wins: u64,
    frags: u64,
    xp: u64,
    survived_battles: u64,
    damage_dealt: u64,
    main_battery: BatteryRow,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatteryRow {
    shots: u64,
    hits: u64,
}

#[derive(Debug, Deserialize)]
struct ClanMemberRow {
    #[serde(default)]
    clan_id: Option<u64>,
    account_name: String,
}

#[derive(Debug, Deserialize)]
struct ClanRow {
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    name: Option<String>,
}
