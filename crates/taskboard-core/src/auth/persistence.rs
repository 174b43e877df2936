use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::Credential;

/// Credentials file name in the cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

const TEMP_FILE: &str = "credentials.json.tmp";

/// Storage port behind `CredentialStore`. Implementations hold exactly one
/// named entry.
pub trait TokenPersistence: Send + Sync {
    /// Read the stored credential. A missing entry is an empty credential,
    /// not an error.
    fn load(&self) -> Result<Credential>;

    fn save(&self, credential: &Credential) -> Result<()>;

    /// Remove the stored entry. Removing a missing entry succeeds.
    fn clear(&self) -> Result<()>;
}

/// JSON file in the per-user cache directory.
pub struct FileTokenPersistence {
    cache_dir: PathBuf,
}

impl FileTokenPersistence {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn credentials_path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIALS_FILE)
    }
}

impl TokenPersistence for FileTokenPersistence {
    fn load(&self) -> Result<Credential> {
        let path = self.credentials_path();
        if !path.exists() {
            return Ok(Credential::default());
        }
        let contents =
            std::fs::read_to_string(&path).context("Failed to read credentials file")?;
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    /// Writes a private temp file next to the entry and renames it over the
    /// entry, so readers see either the old or the new credential.
    fn save(&self, credential: &Credential) -> Result<()> {
        let path = self.credentials_path();
        std::fs::create_dir_all(&self.cache_dir)?;
        let contents = serde_json::to_string_pretty(credential)?;

        let temp_path = self.cache_dir.join(TEMP_FILE);
        // A leftover temp file may carry wider permissions; never reuse it.
        match std::fs::remove_file(&temp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Failed to remove stale credentials temp file"),
        }
        write_private(&temp_path, contents.as_bytes())
            .context("Failed to write credentials file")?;
        std::fs::rename(&temp_path, &path).context("Failed to replace credentials file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.credentials_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove credentials file")?;
        }
        Ok(())
    }
}

/// Create `path` readable by the owner only (0600 on unix) from the start.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.create_new(true).write(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }

    let mut file = opts.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Keeps the entry in memory only. Nothing survives the process.
#[derive(Default)]
pub struct MemoryTokenPersistence {
    entry: Mutex<Option<Credential>>,
}

impl MemoryTokenPersistence {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            entry: Mutex::new(Some(credential)),
        }
    }

    /// The stored entry, `None` when nothing is stored.
    pub fn stored(&self) -> Option<Credential> {
        self.entry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TokenPersistence for MemoryTokenPersistence {
    fn load(&self) -> Result<Credential> {
        Ok(self.stored().unwrap_or_default())
    }

    fn save(&self, credential: &Credential) -> Result<()> {
        *self
            .entry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileTokenPersistence::new(dir.path().join("nested"));

        assert!(persistence.load().unwrap().is_empty());

        persistence.save(&Credential::new("A1", "R1")).unwrap();
        let loaded = persistence.load().unwrap();
        assert_eq!(loaded, Credential::new("A1", "R1"));

        persistence.clear().unwrap();
        assert!(!dir.path().join("nested").join(CREDENTIALS_FILE).exists());
        assert!(persistence.load().unwrap().is_empty());

        // Clearing again is fine
        persistence.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only_and_replaced_whole() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let persistence = FileTokenPersistence::new(dir.path().to_path_buf());

        // A stale temp file with loose permissions must not be reused
        let temp_path = dir.path().join(TEMP_FILE);
        std::fs::write(&temp_path, "stale").unwrap();
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        persistence.save(&Credential::new("A1", "R1")).unwrap();
        persistence.save(&Credential::new("A2", "R2")).unwrap();

        let path = dir.path().join(CREDENTIALS_FILE);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!temp_path.exists());
        assert_eq!(persistence.load().unwrap(), Credential::new("A2", "R2"));
    }

    #[test]
    fn test_file_corrupt_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CREDENTIALS_FILE), "{not json").unwrap();
        let persistence = FileTokenPersistence::new(dir.path().to_path_buf());
        assert!(persistence.load().is_err());
    }

    #[test]
    fn test_memory_persistence() {
        let persistence = MemoryTokenPersistence::default();
        assert!(persistence.stored().is_none());
        persistence.save(&Credential::new("a", "r")).unwrap();
        assert_eq!(persistence.load().unwrap(), Credential::new("a", "r"));
        persistence.clear().unwrap();
        assert!(persistence.stored().is_none());
    }
}
