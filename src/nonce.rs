//! Nonce replay defence

use crate::BoxError;
use std::{collections::HashSet, future::Future, sync::Mutex};

/// Storage remembering which nonces have been seen
pub trait NonceStorage: Send + Sync {
    /// Whether the nonce has been seen before
    ///
    /// Implementations MUST atomically mark the nonce as seen before
    /// returning `false`; anything else opens a replay window. An error
    /// means the storage itself failed (e.g. a database connection
    /// problem) and fails verification.
    fn seen(&self, nonce: &str) -> impl Future<Output = Result<bool, BoxError>> + Send;
}

/// Nonce storage keeping seen nonces in memory
///
/// The set grows without bound and does not survive restarts, so this is
/// only suitable for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryNonceStorage {
    seen: Mutex<HashSet<String>>,
}

impl InMemoryNonceStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStorage for InMemoryNonceStorage {
    async fn seen(&self, nonce: &str) -> Result<bool, BoxError> {
        let mut guard = self.seen.lock().unwrap();
        Ok(!guard.insert(nonce.to_owned()))
    }
}
