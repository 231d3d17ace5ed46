//! System keychain secret store.

use tracing::debug;

use super::SecretStore;
use crate::error::{Error, Result};

/// Keychain-backed [`SecretStore`] using the system's native credential
/// store. Record keys map to keyring entries under one service name.
///
/// User presence is delegated to the platform store: wherever the OS
/// gates keychain reads behind an unlock or biometric prompt, that prompt
/// is the consent step.
///
/// Feature-gated behind `system-keyring`.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    /// Service name for keyring entries.
    const SERVICE_NAME: &str = "io.rolekey.credentials";

    /// Create a store with the default service name.
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
        }
    }

    /// Create a store with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Check whether the system keyring is usable at all.
    pub fn is_available() -> bool {
        match keyring::Entry::new(Self::SERVICE_NAME, "availability-check") {
            Ok(entry) => match entry.get_password() {
                Ok(_) => true,
                Err(keyring::Error::NoEntry) => true,
                Err(keyring::Error::NoStorageAccess(_)) => false,
                Err(keyring::Error::PlatformFailure(_)) => false,
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key)
            .map_err(|e| Error::Keyring(format!("entry \"{key}\": {e}")))
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Keyring(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = self.entry(key)?;
        entry
            .set_password(value)
            .map_err(|e| Error::Keyring(e.to_string()))
    }

    fn request_consent(&self, reason: &str) -> Result<()> {
        // The platform keychain prompts on access where the OS supports
        // it; there is no separate programmatic consent call in the
        // keyring API.
        debug!(reason, "consent delegated to platform keychain");
        Ok(())
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
