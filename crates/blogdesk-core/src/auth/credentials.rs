//! Credential stores.
//!
//! Every backend holds the same three entries (`token`, `refresh_token`,
//! `user`) and never reports an error to its caller: a storage failure is
//! logged and the value is treated as absent.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

use super::session::{Session, SessionPatch};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "blogdesk";

/// Key/value persistence for the current session.
pub trait CredentialStore: Send + Sync {
    /// Current session; missing or unreadable entries come back as `None`.
    fn load(&self) -> Session;

    /// Overwrite only the fields present in `patch`.
    fn save(&self, patch: SessionPatch);

    /// Swap the whole session in a single write.
    fn replace(&self, session: Session);

    /// Remove all three entries at once. Clearing an empty store is a no-op.
    fn clear(&self);
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    session: RwLock<Session>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn save(&self, patch: SessionPatch) {
        self.session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .apply(patch);
    }

    fn replace(&self, session: Session) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = session;
    }

    fn clear(&self) {
        *self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Session::default();
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Session persisted as one JSON document in the cache directory.
///
/// Writes land in a temp file that is renamed over the real one, so a reader
/// sees either the old document or the new one.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    /// A missing or corrupt file reads as an empty session; any other I/O
    /// failure is an error.
    fn read(&self) -> Result<Session> {
        let path = self.session_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Session::default()),
            Err(e) => return Err(e).context("Failed to read session file"),
        };
        Ok(serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(error = %e, "Session file corrupt, treating as empty");
            Session::default()
        }))
    }

    fn write(&self, session: &Session) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        let path = self.session_path();
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(session)?;
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp, &path).context("Failed to replace session file")?;
        Ok(())
    }

    fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove session file"),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Session {
        self.read().unwrap_or_else(|e| {
            warn!(error = %e, "Session file unusable, treating as empty");
            Session::default()
        })
    }

    fn save(&self, patch: SessionPatch) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut session = match self.read() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Session file unreadable, not saving");
                return;
            }
        };
        session.apply(patch);
        if let Err(e) = self.write(&session) {
            warn!(error = %e, "Failed to save session");
        }
    }

    fn replace(&self, session: Session) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = self.write(&session) {
            warn!(error = %e, "Failed to save session");
        }
    }

    fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        match Self::remove(&self.session_path()) {
            Ok(()) => debug!("Session file cleared"),
            Err(e) => warn!(error = %e, "Failed to clear session"),
        }
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Session persisted as a single OS keychain entry, so clearing it is one
/// delete.
pub struct KeyringCredentialStore {
    account: String,
    write_lock: Mutex<()>,
}

impl KeyringCredentialStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }

    fn read(&self) -> Result<Session> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(serde_json::from_str(&secret).unwrap_or_else(|e| {
                warn!(error = %e, "Keychain session corrupt, treating as empty");
                Session::default()
            })),
            Err(keyring::Error::NoEntry) => Ok(Session::default()),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn write(&self, session: &Session) -> Result<()> {
        let secret = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store session in keychain")
    }

    fn remove(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Session {
        self.read().unwrap_or_else(|e| {
            warn!(error = %e, "Keychain session unusable, treating as empty");
            Session::default()
        })
    }

    fn save(&self, patch: SessionPatch) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut session = match self.read() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Keychain session unreadable, not saving");
                return;
            }
        };
        session.apply(patch);
        if let Err(e) = self.write(&session) {
            warn!(error = %e, "Failed to save session to keychain");
        }
    }

    fn replace(&self, session: Session) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = self.write(&session) {
            warn!(error = %e, "Failed to save session to keychain");
        }
    }

    fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = self.remove() {
            warn!(error = %e, "Failed to clear keychain session");
        }
    }
}
