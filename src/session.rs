use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to access session file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode session file {path}: {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Everything the client persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub client_id: Option<String>,
}

pub trait SessionStore: Send + Sync {
    fn get(&self) -> Result<Session, SessionError>;
    fn set(&self, session: &Session) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<Session>,
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Result<Session, SessionError> {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }

    fn set(&self, session: &Session) -> Result<(), SessionError> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.set(&Session::default())
    }
}

/// JSON file backed store; a missing file reads as an empty session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Result<Session, SessionError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Session::default())
            }
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.display(),
                    source,
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(Session::default());
        }
        serde_json::from_str(&text).map_err(|source| SessionError::Decode {
            path: self.display(),
            source,
        })
    }

    fn set(&self, session: &Session) -> Result<(), SessionError> {
        let text = serde_json::to_string_pretty(session).map_err(|source| {
            SessionError::Decode {
                path: self.display(),
                source,
            }
        })?;
        fs::write(&self.path, text).map_err(|source| SessionError::Io {
            path: self.display(),
            source,
        })
    }

    fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Io {
                path: self.display(),
                source,
            }),
        }
    }
}

/// Returns the stored presence id, generating and persisting one on first use.
pub fn ensure_client_id(store: &dyn SessionStore) -> Result<String, SessionError> {
    let mut session = store.get()?;
    if let Some(id) = session.client_id.as_ref().filter(|v| !v.trim().is_empty()) {
        return Ok(id.clone());
    }
    let id = Uuid::new_v4().to_string();
    session.client_id = Some(id.clone());
    store.set(&session)?;
    Ok(id)
}

/// Credentials and identity used for API calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthContext {
    pub token: Option<String>,
    pub user: Option<UserInfo>,
}

impl AuthContext {
    pub fn from_session(session: &Session) -> Self {
        Self {
            token: session.token.clone().filter(|t| !t.trim().is_empty()),
            user: session.user.clone(),
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn role(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.role.as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some("admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> UserInfo {
        UserInfo {
            id: 1,
            username: "root".to_string(),
            email: None,
            role: "admin".to_string(),
            is_active: Some(true),
        }
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.get().unwrap(), Session::default());

        let session = Session {
            token: Some("abc".to_string()),
            user: Some(admin()),
            client_id: None,
        };
        store.set(&session).unwrap();
        assert_eq!(store.get().unwrap(), session);

        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), Session::default());
        store.clear().unwrap();
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileSessionStore::new(&path).get().unwrap_err();
        assert!(matches!(err, SessionError::Decode { .. }));
    }

    #[test]
    fn client_id_is_generated_once() {
        let store = MemorySessionStore::default();
        let first = ensure_client_id(&store).unwrap();
        let second = ensure_client_id(&store).unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn auth_context_roles() {
        let session = Session {
            token: Some("  ".to_string()),
            user: Some(admin()),
            client_id: None,
        };
        let ctx = AuthContext::from_session(&session);
        assert!(!ctx.is_authenticated());
        assert!(ctx.is_admin());
        assert_eq!(ctx.role(), Some("admin"));

        let ctx = AuthContext::with_token("t");
        assert!(ctx.is_authenticated());
        assert!(!ctx.is_admin());
    }
}
