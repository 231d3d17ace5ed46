//! Secure credential cache.
//!
//! Provides the [`SecretStore`] capability trait and several backends:
//! - [`KeyringStore`] - system keychain (requires `system-keyring` feature)
//! - [`FileStore`] - JSON files with 0600 permissions
//! - [`MemoryStore`] - in-memory, for tests
//!
//! On top of the raw byte-blob contract, [`CredentialCache`] stores the
//! three credential record types as JSON documents under composite
//! `{record-type}:{name}` keys. A missing record is `Ok(None)`, never an
//! error, so callers can distinguish "nothing cached yet" from "store
//! unavailable".

mod file;
mod memory;

#[cfg(feature = "system-keyring")]
mod keychain;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use file::FileStore;
pub use memory::MemoryStore;

#[cfg(feature = "system-keyring")]
pub use keychain::KeyringStore;

use crate::error::{Error, Result};
use crate::sso::{BearerTokens, ClientCredentials, RoleCredentials};

/// Record type for OAuth client registrations.
const CLIENT_CREDENTIALS: &str = "oauth-client";

/// Record type for SSO bearer tokens.
const AUTH_TOKENS: &str = "auth-tokens";

/// Record type for short-lived role credentials.
const ROLE_CREDENTIALS: &str = "role-credentials";

// =============================================================================
// SecretStore trait
// =============================================================================

/// Capability interface over the platform secure store.
///
/// Implementations must be thread-safe (`Send + Sync`). `get` returns
/// `Ok(None)` when nothing is stored under the key; only a store that is
/// actually unavailable produces an error.
pub trait SecretStore: Send + Sync {
    /// Load the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Ask the user to approve a sensitive credential release. The reason
    /// names what is being released and to whom.
    fn request_consent(&self, reason: &str) -> Result<()>;

    /// Name of this store backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
    fn request_consent(&self, reason: &str) -> Result<()> {
        (**self).request_consent(reason)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// =============================================================================
// CredentialCache
// =============================================================================

/// Typed JSON layer over a [`SecretStore`].
///
/// Keys are `{record-type}:{name}`; role credentials are named
/// `{account_id}:{role_name}`.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn SecretStore>,
}

impl CredentialCache {
    /// Create a cache over the given store.
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// The underlying secret store.
    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Cached client registration for an SSO session, if any.
    pub fn client_credentials(&self, session: &str) -> Result<Option<ClientCredentials>> {
        self.get_json(CLIENT_CREDENTIALS, session)
    }

    /// Persist a client registration for an SSO session.
    pub fn set_client_credentials(
        &self,
        session: &str,
        credentials: &ClientCredentials,
    ) -> Result<()> {
        self.set_json(CLIENT_CREDENTIALS, session, credentials)
    }

    /// Cached bearer tokens for an SSO session, if any.
    pub fn tokens(&self, session: &str) -> Result<Option<BearerTokens>> {
        self.get_json(AUTH_TOKENS, session)
    }

    /// Persist bearer tokens for an SSO session.
    pub fn set_tokens(&self, session: &str, tokens: &BearerTokens) -> Result<()> {
        self.set_json(AUTH_TOKENS, session, tokens)
    }

    /// Cached role credentials for one (account, role) pair, if any.
    pub fn role_credentials(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<Option<RoleCredentials>> {
        self.get_json(ROLE_CREDENTIALS, &format!("{account_id}:{role_name}"))
    }

    /// Persist role credentials for one (account, role) pair.
    pub fn set_role_credentials(
        &self,
        account_id: &str,
        role_name: &str,
        credentials: &RoleCredentials,
    ) -> Result<()> {
        self.set_json(
            ROLE_CREDENTIALS,
            &format!("{account_id}:{role_name}"),
            credentials,
        )
    }

    fn get_json<T: DeserializeOwned>(&self, record_type: &str, name: &str) -> Result<Option<T>> {
        let key = format!("{record_type}:{name}");
        let Some(value) = self.store.get(&key)? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&value)
            .map_err(|e| Error::StorageSerialization(format!("record \"{key}\": {e}")))?;
        Ok(Some(record))
    }

    fn set_json<T: Serialize>(&self, record_type: &str, name: &str, record: &T) -> Result<()> {
        let key = format!("{record_type}:{name}");
        let value = serde_json::to_string(record)
            .map_err(|e| Error::StorageSerialization(format!("record \"{key}\": {e}")))?;
        self.store.set(&key, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> CredentialCache {
        CredentialCache::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_empty_cache_is_none_not_error() {
        let cache = cache();
        assert!(cache.client_credentials("corp").unwrap().is_none());
        assert!(cache.tokens("corp").unwrap().is_none());
        assert!(cache
            .role_credentials("111122223333", "Admin")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_client_credentials_round_trip() {
        let cache = cache();
        let creds = ClientCredentials {
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            expires_at: 1_900_000_000,
        };
        cache.set_client_credentials("corp", &creds).unwrap();
        let loaded = cache.client_credentials("corp").unwrap().unwrap();
        assert_eq!(loaded, creds);
    }

    #[test]
    fn test_tokens_round_trip() {
        let cache = cache();
        let tokens = BearerTokens {
            access_token: "at".into(),
            client_id: "client-1".into(),
            refresh_token: Some("rt".into()),
            expires_at: 1_900_000_000,
        };
        cache.set_tokens("corp", &tokens).unwrap();
        assert_eq!(cache.tokens("corp").unwrap().unwrap(), tokens);

        // refresh token is optional
        let bare = BearerTokens {
            refresh_token: None,
            ..tokens
        };
        cache.set_tokens("corp", &bare).unwrap();
        assert_eq!(cache.tokens("corp").unwrap().unwrap(), bare);
    }

    #[test]
    fn test_role_credentials_round_trip() {
        let cache = cache();
        let creds = RoleCredentials {
            access_key_id: "AKIA".into(),
            secret_access_key: "shhh".into(),
            session_token: "tok".into(),
            expiration: 1_900_000_000,
            account_id: "111122223333".into(),
        };
        cache
            .set_role_credentials("111122223333", "Admin", &creds)
            .unwrap();
        let loaded = cache
            .role_credentials("111122223333", "Admin")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, creds);

        // other (account, role) pairs are unaffected
        assert!(cache
            .role_credentials("111122223333", "ReadOnly")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_corrupt_record_is_a_storage_error() {
        let store = Arc::new(MemoryStore::new());
        store.set("auth-tokens:corp", "not json").unwrap();
        let cache = CredentialCache::new(store);
        let err = cache.tokens("corp").unwrap_err();
        assert!(err.is_storage());
    }
}
