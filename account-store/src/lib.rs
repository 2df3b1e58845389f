//! Persistent-store collaborator boundary: record types, the `Store` trait,
//! and an in-process implementation.

pub mod memory;
pub mod records;

use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::types::AccountKey;
use thiserror::Error;

pub use memory::MemoryStore;
pub use records::{AccountRecord, SnapshotPage, SnapshotRecord, UnbindOutcome, UpsertSummary};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A binding already exists for this requester handle. Never an
    /// overwrite.
    #[error("requester {requester} is already bound")]
    BindingConflict { requester: String },
    #[error("account {0} does not exist")]
    AccountMissing(AccountKey),
}

/// Storage capability the core needs: get-or-create by unique key,
/// conditional update, and batch upsert with conflict resolution. The engine
/// behind it is out of scope.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the account and whether it was created by this call.
    async fn get_or_create_account(
        &self,
        key: AccountKey,
        display_name: &str,
        clan_tag: Option<String>,
    ) -> Result<(AccountRecord, bool)>;

    /// Refreshes mutable identity fields; returns true when anything
    /// changed.
    async fn update_account_identity(
        &self,
        key: AccountKey,
        display_name: &str,
        clan_tag: Option<String>,
    ) -> Result<bool>;

    async fn list_accounts(&self) -> Result<Vec<AccountRecord>>;

    /// At most one binding per requester; a second create is a
    /// `BindingConflict`.
    async fn create_binding(&self, requester: &str, key: AccountKey) -> Result<()>;

    async fn binding_for(&self, requester: &str) -> Result<Option<AccountRecord>>;

    /// Removes the requester's binding, deleting the account as well when no
    /// other binding references it.
    async fn remove_binding(&self, requester: &str) -> Result<UnbindOutcome>;

    /// Batch upsert with the snapshot merge rule: an existing
    /// (account, ship, date) row with an unchanged last-battle timestamp is
    /// left alone; an earlier row with an unchanged timestamp only has its
    /// date marker moved forward; anything else inserts or replaces values.
    async fn upsert_snapshots(&self, rows: Vec<SnapshotRecord>) -> Result<UpsertSummary>;

    async fn latest_snapshot_date(&self, key: AccountKey) -> Result<Option<NaiveDate>>;

    /// The latest stored snapshot page with date at or before `date`.
    async fn snapshots_at_or_before(
        &self,
        key: AccountKey,
        date: NaiveDate,
    ) -> Result<Option<SnapshotPage>>;
}
