//! Per-shard game-stats API client, credential rotation, and the fan-out
//! orchestrator that queries every shard concurrently.

pub mod api;
pub mod fanout;
pub mod rotator;

pub use api::{ShardApi, WgShardClient};
pub use fanout::{FanOut, FanOutError, ResolvedClan};
pub use rotator::CredentialRotator;
