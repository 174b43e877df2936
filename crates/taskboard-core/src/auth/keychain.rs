use anyhow::{Context, Result};
use keyring::Entry;

use super::{Credential, TokenPersistence};

const SERVICE_NAME: &str = "taskboard";

/// Keychain account under which the JSON-encoded credential is stored
const ENTRY_NAME: &str = "credentials";

/// Stores the credential pair in the OS keychain.
pub struct KeyringTokenPersistence {
    service: String,
    entry_name: String,
}

impl Default for KeyringTokenPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringTokenPersistence {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            entry_name: ENTRY_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry_name).context("Failed to create keyring entry")
    }
}

impl TokenPersistence for KeyringTokenPersistence {
    fn load(&self) -> Result<Credential> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                serde_json::from_str(&secret).context("Failed to parse credentials from keychain")
            }
            Err(keyring::Error::NoEntry) => Ok(Credential::default()),
            Err(e) => Err(e).context("Failed to retrieve credentials from keychain"),
        }
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        let secret = serde_json::to_string(credential)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store credentials in keychain")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        }
    }
}
