use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use log::{info, warn, error};

use crate::config::Country;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Cookie/auth state carried between runs. Holds no job data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub cookies: Vec<StoredCookie>,
    pub current_url: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(cookies: Vec<StoredCookie>, current_url: Option<String>) -> Self {
        SessionState {
            cookies,
            current_url,
            saved_at: Utc::now(),
        }
    }

    /// Worth restoring: has cookies and is not older than `max_age_hours`.
    pub fn is_usable(&self, max_age_hours: i64) -> bool {
        !self.cookies.is_empty() && Utc::now() - self.saved_at <= Duration::hours(max_age_hours)
    }
}

/// One session file per (country, optional account label).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub country: Country,
    pub profile: Option<String>,
}

impl SessionKey {
    pub fn new(country: Country, profile: Option<String>) -> Self {
        SessionKey { country, profile }
    }

    pub fn file_name(&self) -> String {
        let country = self.country.code().to_lowercase();
        match self.profile.as_deref().map(sanitize_profile).filter(|p| !p.is_empty()) {
            Some(profile) => format!("indeed_session_{}_{}.json", country, profile),
            None => format!("indeed_session_{}.json", country),
        }
    }
}

fn sanitize_profile(profile: &str) -> String {
    profile
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

pub trait SessionStore {
    /// Missing or unreadable state is `None`, never an error.
    fn load(&self, key: &SessionKey) -> Option<SessionState>;
    fn save(&self, key: &SessionKey, state: &SessionState) -> Result<()>;
}

/// Stores each session as pretty JSON under `dir`.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        FileSessionStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(key.file_name())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, key: &SessionKey) -> Option<SessionState> {
        let path = self.path_for(key);
        if !path.exists() {
            info!("No session file at {:?}. Starting fresh.", path);
            return None;
        }

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open session file {:?}: {}", path, e);
                return None;
            }
        };
        let mut content = String::new();
        if let Err(e) = file.read_to_string(&mut content) {
            error!("Failed to read session file {:?}: {}", path, e);
            return None;
        }

        match serde_json::from_str::<SessionState>(&content) {
            Ok(state) => {
                info!("Loaded session with {} cookies (saved {}).", state.cookies.len(), state.saved_at);
                Some(state)
            }
            Err(e) => {
                warn!("Session file {:?} is corrupt: {}. Ignoring it.", path, e);
                None
            }
        }
    }

    fn save(&self, key: &SessionKey, state: &SessionState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(state)?;

        // Write to a temp file, then rename over the old one.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        info!("Session saved to {:?}", path);
        Ok(())
    }
}

/// In-process store, handy for tests and embedding.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<Mutex<HashMap<SessionKey, SessionState>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.lock().ok()?.get(key).cloned()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, key: &SessionKey) -> Option<SessionState> {
        self.get(key)
    }

    fn save(&self, key: &SessionKey, state: &SessionState) -> Result<()> {
        match self.sessions.lock() {
            Ok(mut guard) => {
                guard.insert(key.clone(), state.clone());
                Ok(())
            }
            Err(_) => Err(std::io::Error::new(std::io::ErrorKind::Other, "session map poisoned").into()),
        }
    }
}

/// Used when `save_session` is off: never loads, never writes.
pub struct NoSessionStore;

impl SessionStore for NoSessionStore {
    fn load(&self, _key: &SessionKey) -> Option<SessionState> {
        None
    }

    fn save(&self, _key: &SessionKey, _state: &SessionState) -> Result<()> {
        Ok(())
    }
}
