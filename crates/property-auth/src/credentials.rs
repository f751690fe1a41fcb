//! Credential storage for the signed-in session
//!
//! The store holds at most one credential pair plus the user object returned
//! at sign-in. Reads are served from an in-memory copy; every write goes
//! straight to the backing medium so a restarted process picks up the same
//! session.
//!
//! Writers are limited to sign-in/OTP verification, the refresh completion
//! path and sign-out. Ordinary requests only read.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Access/refresh token pair. Replaced wholesale, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    access: Secret<String>,
    refresh: Secret<String>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Secret::new(access.into()),
            refresh: Secret::new(refresh.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access.expose()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh.expose()
    }

    /// Build the successor pair after a refresh. The refresh token is kept
    /// unless the server rotated it.
    pub fn refreshed(&self, access: String, rotated_refresh: Option<String>) -> Self {
        Self {
            access: Secret::new(access),
            refresh: rotated_refresh
                .map(Secret::new)
                .unwrap_or_else(|| self.refresh.clone()),
        }
    }
}

/// Persisted session shape. `user` is the opaque user object from sign-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default)]
    credentials: Option<CredentialPair>,
    #[serde(default)]
    user: Option<serde_json::Value>,
}

impl StoredSession {
    fn is_empty(&self) -> bool {
        self.credentials.is_none() && self.user.is_none()
    }
}

/// Holder of the current session credentials.
///
/// Implementations must be cheap to read from many tasks at once. `clear()`
/// must succeed, without side effects, when the store is already empty.
///
/// Writes take effect in memory even when persisting them fails; the error
/// only reports that the change will not survive a restart.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Option<CredentialPair>;

    fn set(&self, pair: CredentialPair) -> Result<()>;

    /// Drop the credential pair and the user identity.
    fn clear(&self) -> Result<()>;

    fn user(&self) -> Option<serde_json::Value>;

    fn set_user(&self, user: serde_json::Value) -> Result<()>;
}

fn lock(state: &Mutex<StoredSession>) -> MutexGuard<'_, StoredSession> {
    // A panic while holding the guard cannot leave the session half-written:
    // every mutation is a single field assignment.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<StoredSession>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a credential pair.
    pub fn with_credentials(pair: CredentialPair) -> Self {
        Self {
            state: Mutex::new(StoredSession {
                credentials: Some(pair),
                user: None,
            }),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        lock(&self.state).credentials.clone()
    }

    fn set(&self, pair: CredentialPair) -> Result<()> {
        lock(&self.state).credentials = Some(pair);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *lock(&self.state) = StoredSession::default();
        Ok(())
    }

    fn user(&self) -> Option<serde_json::Value> {
        lock(&self.state).user.clone()
    }

    fn set_user(&self, user: serde_json::Value) -> Result<()> {
        lock(&self.state).user = Some(user);
        Ok(())
    }
}

/// JSON-file-backed store.
///
/// All writes use atomic temp-file + rename so a crash mid-write leaves the
/// previous session intact. The lock is held across the write so concurrent
/// writers are serialized.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<StoredSession>,
}

impl FileCredentialStore {
    /// Open the credential file at `path`.
    ///
    /// A missing file is a cold start: the parent directory and an empty
    /// session file are created so later opens take the normal path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let session: StoredSession = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %path.display(),
                signed_in = session.credentials.is_some(),
                "loaded credentials"
            );
            session
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;
            }
            let session = StoredSession::default();
            write_atomic(&path, &session)?;
            session
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<CredentialPair> {
        lock(&self.state).credentials.clone()
    }

    fn set(&self, pair: CredentialPair) -> Result<()> {
        let mut state = lock(&self.state);
        state.credentials = Some(pair);
        debug!("stored credential pair");
        write_atomic(&self.path, &state)
    }

    fn clear(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.is_empty() {
            return Ok(());
        }
        *state = StoredSession::default();
        debug!("cleared credentials");
        write_atomic(&self.path, &state)
    }

    fn user(&self) -> Option<serde_json::Value> {
        lock(&self.state).user.clone()
    }

    fn set_user(&self, user: serde_json::Value) -> Result<()> {
        let mut state = lock(&self.state);
        state.user = Some(user);
        write_atomic(&self.path, &state)
    }
}

/// Write the session file atomically with 0600 permissions on unix.
fn write_atomic(path: &Path, session: &StoredSession) -> Result<()> {
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
