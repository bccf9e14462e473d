use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const PINNED_SESSIONS_FILE: &str = "pinned_sessions.json";
const SESSION_NAMES_FILE: &str = "session_names.json";

#[derive(Debug, Error)]
pub enum ResolveConfigDirError {
    #[error("home directory not found")]
    HomeDirNotFound,
}

pub fn resolve_config_dir() -> Result<PathBuf, ResolveConfigDirError> {
    if let Some(override_dir) = std::env::var_os("AGENTDASH_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let Some(home) = dirs::home_dir() else {
        return Err(ResolveConfigDirError::HomeDirNotFound);
    };

    Ok(home.join(".agentdash"))
}

#[derive(Debug, Error)]
pub enum SaveOverridesError {
    #[error("failed to encode overrides: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write overrides: {0}")]
    Write(#[from] io::Error),
}

#[derive(Debug, Default)]
struct OverrideState {
    pinned: BTreeSet<String>,
    names: BTreeMap<String, String>,
}

/// User overrides shared by every source monitor: the pinned-session set and
/// the custom-name map, each persisted as its own small JSON document.
///
/// Writes are read-modify-write over the whole document. Last writer wins;
/// writes are user-triggered and rare enough that locking is not worth it.
#[derive(Debug)]
pub struct OverrideStore {
    config_dir: PathBuf,
    state: Mutex<OverrideState>,
}

impl OverrideStore {
    pub fn open(config_dir: PathBuf) -> Self {
        let store = Self {
            config_dir,
            state: Mutex::new(OverrideState::default()),
        };
        store.reload();
        store
    }

    /// Re-reads both documents from disk, replacing the in-memory state.
    pub fn reload(&self) {
        let pinned: Vec<String> = load_json_document(&self.pinned_path(), "pinned sessions");
        let names: BTreeMap<String, String> =
            load_json_document(&self.names_path(), "session names");

        let mut state = self.lock();
        state.pinned = pinned.into_iter().collect();
        state.names = names;
    }

    pub fn is_pinned(&self, session_id: &str) -> bool {
        self.lock().pinned.contains(session_id)
    }

    /// Empty string means "no override".
    pub fn custom_name(&self, session_id: &str) -> String {
        self.lock().names.get(session_id).cloned().unwrap_or_default()
    }

    pub fn pinned_sessions(&self) -> BTreeSet<String> {
        self.lock().pinned.clone()
    }

    pub fn set_pinned(&self, session_id: &str, pinned: bool) -> Result<(), SaveOverridesError> {
        let mut state = self.lock();
        state.pinned = load_json_document::<Vec<String>>(&self.pinned_path(), "pinned sessions")
            .into_iter()
            .collect();
        if pinned {
            state.pinned.insert(session_id.to_string());
        } else {
            state.pinned.remove(session_id);
        }
        let snapshot: Vec<&String> = state.pinned.iter().collect();
        write_json_document(&self.config_dir, &self.pinned_path(), &snapshot)
    }

    /// An empty (or whitespace) name clears the override.
    pub fn set_custom_name(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<(), SaveOverridesError> {
        let mut state = self.lock();
        state.names =
            load_json_document::<BTreeMap<String, String>>(&self.names_path(), "session names");
        let name = name.trim();
        if name.is_empty() {
            state.names.remove(session_id);
        } else {
            state
                .names
                .insert(session_id.to_string(), name.to_string());
        }
        write_json_document(&self.config_dir, &self.names_path(), &state.names)
    }

    fn pinned_path(&self) -> PathBuf {
        self.config_dir.join(PINNED_SESSIONS_FILE)
    }

    fn names_path(&self) -> PathBuf {
        self.config_dir.join(SESSION_NAMES_FILE)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OverrideState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Missing files are empty collections; corrupt files are empty collections
/// plus an error log. The next successful write repairs the file.
fn load_json_document<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(error) => {
            tracing::error!(path = %path.display(), %error, "failed to read {what} file");
            return T::default();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(error) => {
            tracing::error!(path = %path.display(), %error, "corrupt {what} file, treating as empty");
            T::default()
        }
    }
}

fn write_json_document<T: Serialize>(
    config_dir: &Path,
    path: &Path,
    value: &T,
) -> Result<(), SaveOverridesError> {
    fs::create_dir_all(config_dir)?;
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, text)?;
    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pin_survives_reopening_the_store() {
        let dir = tempdir().expect("tempdir");
        let store = OverrideStore::open(dir.path().to_path_buf());
        store.set_pinned("s1", true).expect("pin");

        let reopened = OverrideStore::open(dir.path().to_path_buf());
        assert!(reopened.is_pinned("s1"));

        reopened.set_pinned("s1", false).expect("unpin");
        let third = OverrideStore::open(dir.path().to_path_buf());
        assert!(!third.is_pinned("s1"));
        assert!(third.pinned_sessions().is_empty());
    }

    #[test]
    fn pinned_file_is_a_plain_string_array() {
        let dir = tempdir().expect("tempdir");
        let store = OverrideStore::open(dir.path().to_path_buf());
        store.set_pinned("s1", true).expect("pin");
        store.set_pinned("s2", true).expect("pin");

        let raw = fs::read_to_string(dir.path().join(PINNED_SESSIONS_FILE)).expect("read");
        let parsed: Vec<String> = serde_json::from_str(&raw).expect("array of strings");
        assert_eq!(parsed, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn rename_round_trips_and_empty_clears() {
        let dir = tempdir().expect("tempdir");
        let store = OverrideStore::open(dir.path().to_path_buf());
        store.set_custom_name("s1", "  my refactor  ").expect("set");
        assert_eq!(store.custom_name("s1"), "my refactor");

        store.set_custom_name("s1", "").expect("clear");
        assert_eq!(store.custom_name("s1"), "");

        let raw = fs::read_to_string(dir.path().join(SESSION_NAMES_FILE)).expect("read");
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).expect("object");
        assert!(parsed.is_empty());
    }

    #[test]
    fn corrupt_documents_load_as_empty_and_write_repairs() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join(PINNED_SESSIONS_FILE), "{not json").expect("write");
        fs::write(dir.path().join(SESSION_NAMES_FILE), "[\"wrong shape\"]").expect("write");

        let store = OverrideStore::open(dir.path().to_path_buf());
        assert!(store.pinned_sessions().is_empty());
        assert_eq!(store.custom_name("s1"), "");

        store.set_pinned("s1", true).expect("repairing write");
        let raw = fs::read_to_string(dir.path().join(PINNED_SESSIONS_FILE)).expect("read");
        let parsed: Vec<String> = serde_json::from_str(&raw).expect("valid again");
        assert_eq!(parsed, vec!["s1".to_string()]);
    }

    #[test]
    fn missing_files_are_empty_collections() {
        let dir = tempdir().expect("tempdir");
        let store = OverrideStore::open(dir.path().join("never-written"));
        assert!(!store.is_pinned("s1"));
        assert!(store.pinned_sessions().is_empty());
    }
}
