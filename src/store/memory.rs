//! In-memory secret store for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use super::SecretStore;
use crate::error::{Error, Result};

/// In-memory [`SecretStore`].
///
/// Carries two switches used by tests: `fail_writes` makes every `set`
/// fail with a storage error, and `deny_consent` makes `request_consent`
/// report a denial.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
    deny_consent: AtomicBool,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent consent request report a denial.
    pub fn deny_consent(&self, deny: bool) {
        self.deny_consent.store(deny, Ordering::SeqCst);
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").is_empty()
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let guard = self.inner.read().expect("lock poisoned");
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!(
                "simulated write failure for \"{key}\""
            )));
        }
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn request_consent(&self, reason: &str) -> Result<()> {
        if self.deny_consent.load(Ordering::SeqCst) {
            return Err(Error::ConsentDenied(
                "authentication failed or cancelled".into(),
            ));
        }
        debug!(reason, "consent granted (memory store)");
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
