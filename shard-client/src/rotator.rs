use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("credential list must not be empty")]
pub struct EmptyCredentialList;

/// Hands out API credentials round-robin. The cursor is a monotonically
/// advancing atomic index taken modulo the list length, which keeps every
/// credential in rotation under concurrent fan-out use. No fairness beyond
/// round-robin is guaranteed.
pub struct CredentialRotator {
    credentials: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialRotator {
    pub fn new(credentials: Vec<String>) -> Result<Self, EmptyCredentialList> {
        if credentials.is_empty() {
            return Err(EmptyCredentialList);
        }
        Ok(Self {
            credentials,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn next(&self) -> &str {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        &self.credentials[idx % self.credentials.len()]
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }
}
