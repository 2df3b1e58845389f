//! Interactive disambiguation: narrows a fan-out's candidate list to one
//! account through a bounded multi-turn conversation, then binds it to the
//! requester.

pub mod transport;

use std::fmt::Write as _;
use std::sync::Arc;

use account_store::{AccountRecord, Store, StoreError, UnbindOutcome};
use core_types::config::ResolverConfig;
use core_types::types::{Candidate, CandidateSet};
use log::warn;
use shard_client::{FanOut, FanOutError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use transport::{ChatTransport, ConversationContext, TransportError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("fan-out failed: {0}")]
    FanOut(#[from] FanOutError),
    #[error("store failed: {0}")]
    Store(#[from] StoreError),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Result of one interactive selection, before any persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Selected(Candidate),
    NoMatch,
    /// Retry budget exhausted, per-turn deadlines elapsed, or the requester
    /// cancelled.
    Abandoned,
}

/// Terminal outcome of a bind session. These are user-facing conditions,
/// not system errors; each maps to a stable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Bound {
        account: AccountRecord,
        created: bool,
    },
    NoMatch,
    Abandoned,
    AlreadyBound,
}

impl ResolveOutcome {
    /// Stable human-readable report; raw remote payloads never appear here.
    pub fn user_message(&self) -> String {
        match self {
            ResolveOutcome::Bound { account, .. } => match &account.clan_tag {
                Some(tag) => format!(
                    "Bound to [{tag}] {} on {}.",
                    account.display_name, account.key.region
                ),
                None => format!(
                    "Bound to {} on {}.",
                    account.display_name, account.key.region
                ),
            },
            ResolveOutcome::NoMatch => {
                "No account matched that name. Check the spelling and try again.".to_string()
            }
            ResolveOutcome::Abandoned => {
                "Gave up waiting for a valid choice. Start over when you are ready.".to_string()
            }
            ResolveOutcome::AlreadyBound => {
                "This handle is already bound to an account. Unbind it first to rebind."
                    .to_string()
            }
        }
    }
}

pub struct Resolver {
    fanout: Arc<FanOut>,
    store: Arc<dyn Store>,
    transport: Arc<dyn ChatTransport>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        fanout: Arc<FanOut>,
        store: Arc<dyn Store>,
        transport: Arc<dyn ChatTransport>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            fanout,
            store,
            transport,
            config,
        }
    }

    /// Search all shards and interactively narrow to one candidate. No
    /// persistence happens here.
    pub async fn resolve(
        &self,
        keyword: &str,
        ctx: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let candidates = self.fanout.search_all(keyword, cancel).await?;
        self.choose(ctx, candidates).await
    }

    /// Full bind session: resolve, fetch clan affiliation best-effort,
    /// persist the account, create the binding. A binding that already
    /// exists for this requester surfaces as `AlreadyBound`, never as an
    /// overwrite; the store's uniqueness constraint decides races between
    /// concurrent sessions.
    pub async fn bind(
        &self,
        requester: &str,
        keyword: &str,
        ctx: &ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<ResolveOutcome, ResolveError> {
        if self.store.binding_for(requester).await?.is_some() {
            return Ok(ResolveOutcome::AlreadyBound);
        }
        let candidate = match self.resolve(keyword, ctx, cancel).await? {
            Resolution::NoMatch => return Ok(ResolveOutcome::NoMatch),
            Resolution::Abandoned => return Ok(ResolveOutcome::Abandoned),
            Resolution::Selected(candidate) => candidate,
        };

        let clan = match self.fanout.fetch_clan(candidate.key(), cancel).await {
            Ok(clan) => clan,
            Err(err) => {
                warn!("clan lookup failed for {}: {err}", candidate.key());
                None
            }
        };
        let clan_tag = clan.as_ref().map(|clan| clan.tag.clone());
        let display_name = clan
            .as_ref()
            .map(|clan| clan.account_name.clone())
            .unwrap_or_else(|| candidate.display_name.clone());

        let (_, created) = self
            .store
            .get_or_create_account(candidate.key(), &display_name, clan_tag.clone())
            .await?;
        if !created {
            self.store
                .update_account_identity(candidate.key(), &display_name, clan_tag.clone())
                .await?;
        }
        match self.store.create_binding(requester, candidate.key()).await {
            Ok(()) => Ok(ResolveOutcome::Bound {
                account: AccountRecord {
                    key: candidate.key(),
                    display_name,
                    clan_tag,
                },
                created,
            }),
            Err(StoreError::BindingConflict { .. }) => Ok(ResolveOutcome::AlreadyBound),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn unbind(&self, requester: &str) -> Result<UnbindOutcome, ResolveError> {
        Ok(self.store.remove_binding(requester).await?)
    }

    pub async fn bound_account(
        &self,
        requester: &str,
    ) -> Result<Option<AccountRecord>, ResolveError> {
        Ok(self.store.binding_for(requester).await?)
    }

    /// The selection loop. Zero candidates and exactly one candidate are
    /// terminal without any prompt; two or more drive the bounded
    /// prompt/reply protocol. Malformed input and per-turn timeouts both
    /// cost one unit of budget.
    async fn choose(
        &self,
        ctx: &ConversationContext,
        candidates: CandidateSet,
    ) -> Result<Resolution, ResolveError> {
        if candidates.is_empty() {
            return Ok(Resolution::NoMatch);
        }
        if candidates.len() == 1 {
            if let Some(only) = candidates.candidates.into_iter().next() {
                return Ok(Resolution::Selected(only));
            }
            return Ok(Resolution::NoMatch);
        }

        self.transport
            .send(ctx, &enumeration_prompt(&candidates))
            .await?;
        let mut budget = self.config.prompt_budget.max(1);
        loop {
            let reply = self
                .transport
                .next_reply(ctx, self.config.turn_timeout())
                .await?;
            match reply {
                None => {
                    budget -= 1;
                    if budget == 0 {
                        return Ok(Resolution::Abandoned);
                    }
                    self.transport.send(ctx, &retry_prompt(budget)).await?;
                }
                Some(text) => {
                    let text = text.trim();
                    if text.eq_ignore_ascii_case("cancel") {
                        return Ok(Resolution::Abandoned);
                    }
                    match text.parse::<usize>() {
                        Ok(index) if index < candidates.len() => {
                            return Ok(Resolution::Selected(
                                candidates.candidates[index].clone(),
                            ));
                        }
                        _ => {
                            budget -= 1;
                            if budget == 0 {
                                return Ok(Resolution::Abandoned);
                            }
                            self.transport.send(ctx, &retry_prompt(budget)).await?;
                        }
                    }
                }
            }
        }
    }
}

fn enumeration_prompt(candidates: &CandidateSet) -> String {
    let mut message = String::from("Found these accounts:\n");
    for (index, candidate) in candidates.candidates.iter().enumerate() {
        let _ = writeln!(
            message,
            "[{index}] {} ({}, {})",
            candidate.display_name, candidate.account_id, candidate.region
        );
    }
    message.push_str("Reply with a number to pick one, or \"cancel\".");
    message
}

fn retry_prompt(remaining: u32) -> String {
    format!("Not a valid choice. Reply with one of the listed numbers ({remaining} attempt(s) left).")
}
