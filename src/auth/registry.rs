use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::error::StoreError;

pub const ACTIVE_USERNAME_KEY: &str = "active-username";
pub const KNOWN_USERNAMES_KEY: &str = "known-usernames";

const SETTINGS_FILE_VERSION: u32 = 1;

/// Non-secret key/value settings that survive restarts.
///
/// Reads never fail: a missing or unreadable value reads as absent/empty.
/// Implementations log persistence failures instead of returning them.
pub trait SettingsStore: Send + Sync {
    fn string(&self, key: &str) -> Option<String>;
    fn set_string(&self, key: &str, value: Option<&str>);
    fn string_list(&self, key: &str) -> Vec<String>;
    fn set_string_list(&self, key: &str, values: &[String]);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum SettingValue {
    Text(String),
    List(Vec<String>),
}

type SettingsMap = BTreeMap<String, SettingValue>;

fn text_of(values: &SettingsMap, key: &str) -> Option<String> {
    match values.get(key) {
        Some(SettingValue::Text(value)) => Some(value.clone()),
        _ => None,
    }
}

fn list_of(values: &SettingsMap, key: &str) -> Vec<String> {
    match values.get(key) {
        Some(SettingValue::List(values)) => values.clone(),
        _ => Vec::new(),
    }
}

fn apply_text(values: &mut SettingsMap, key: &str, value: Option<&str>) {
    match value {
        Some(value) => {
            values.insert(key.to_string(), SettingValue::Text(value.to_string()));
        }
        None => {
            values.remove(key);
        }
    }
}

/// Settings held in memory only.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<SettingsMap>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn string(&self, key: &str) -> Option<String> {
        text_of(&self.values.lock().unwrap_or_else(PoisonError::into_inner), key)
    }

    fn set_string(&self, key: &str, value: Option<&str>) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        apply_text(&mut values, key, value);
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        list_of(&self.values.lock().unwrap_or_else(PoisonError::into_inner), key)
    }

    fn set_string_list(&self, key: &str, values: &[String]) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), SettingValue::List(values.to_vec()));
    }
}

/// Settings persisted as a TOML document, rewritten atomically on every change.
///
/// A file that cannot be read or carries another version is left untouched;
/// an unparsable one is moved aside before the next write.
///
/// # Example
/// ```no_run
/// use devicelink::auth::{FileSettings, SettingsStore};
///
/// let settings = FileSettings::new("/tmp/devicelink/settings.toml");
/// settings.set_string("active-username", Some("octocat"));
/// assert_eq!(settings.string("active-username").as_deref(), Some("octocat"));
/// ```
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    version: u32,
    #[serde(default)]
    values: SettingsMap,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_values(&self) -> Result<SettingsMap, Unusable> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(SettingsMap::new()),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read settings"
                );
                return Err(Unusable::Foreign);
            }
        };
        match toml::from_str::<SettingsFile>(&raw) {
            Ok(file) if file.version == SETTINGS_FILE_VERSION => Ok(file.values),
            Ok(file) => {
                tracing::warn!(
                    path = %self.path.display(),
                    version = file.version,
                    "unsupported settings file version"
                );
                Err(Unusable::Foreign)
            }
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to parse settings"
                );
                Err(Unusable::Corrupt)
            }
        }
    }

    fn load(&self) -> SettingsMap {
        self.read_values().unwrap_or_default()
    }

    fn update(&self, change: impl FnOnce(&mut SettingsMap)) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = match self.read_values() {
            Ok(values) => values,
            Err(Unusable::Corrupt) => {
                self.set_aside();
                SettingsMap::new()
            }
            Err(Unusable::Foreign) => {
                tracing::warn!(path = %self.path.display(), "leaving settings file untouched");
                return;
            }
        };
        change(&mut values);
        if let Err(err) = self.persist(values) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to persist settings");
        }
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".corrupt");
        PathBuf::from(name)
    }

    /// Moves an unparsable file out of the way so it can be inspected later.
    fn set_aside(&self) {
        let backup = self.backup_path();
        match fs::rename(&self.path, &backup) {
            Ok(()) => tracing::warn!(backup = %backup.display(), "moved unparsable settings aside"),
            Err(err) => tracing::warn!(error = %err, "failed to move unparsable settings aside"),
        }
    }

    /// Stages the document next to the target and renames it into place.
    /// `NamedTempFile` creates the staging file owner-only.
    fn persist(&self, values: SettingsMap) -> Result<(), StoreError> {
        let document = toml::to_string(&SettingsFile {
            version: SETTINGS_FILE_VERSION,
            values,
        })
        .map_err(|err| StoreError::Backend(format!("Failed to encode settings: {err}")))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(document.as_bytes())?;
        staged.as_file().sync_all()?;
        staged.persist(&self.path).map_err(|err| StoreError::from(err.error))?;
        Ok(())
    }
}

/// A settings file that cannot be used as-is.
enum Unusable {
    /// Not valid TOML; replaced on the next write after a backup is kept.
    Corrupt,
    /// Unreadable or written with another version; never overwritten.
    Foreign,
}

impl SettingsStore for FileSettings {
    fn string(&self, key: &str) -> Option<String> {
        text_of(&self.load(), key)
    }

    fn set_string(&self, key: &str, value: Option<&str>) {
        self.update(|values| apply_text(values, key, value));
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        list_of(&self.load(), key)
    }

    fn set_string_list(&self, key: &str, list: &[String]) {
        self.update(|values| {
            values.insert(key.to_string(), SettingValue::List(list.to_vec()));
        });
    }
}

/// Index of known accounts and the active-account pointer.
///
/// Holds usernames only; credentials live in the
/// [`CredentialStore`](crate::auth::CredentialStore).
#[derive(Clone)]
pub struct AccountRegistry {
    settings: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountRegistry")
            .field("active", &self.active())
            .field("known", &self.known())
            .finish()
    }
}

impl AccountRegistry {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySettings::new()))
    }

    pub fn active(&self) -> Option<String> {
        self.settings
            .string(ACTIVE_USERNAME_KEY)
            .filter(|username| !username.is_empty())
    }

    pub fn set_active(&self, username: Option<&str>) {
        self.settings.set_string(ACTIVE_USERNAME_KEY, username);
    }

    /// Known usernames in first-seen order.
    pub fn known(&self) -> Vec<String> {
        let mut known: Vec<String> = Vec::new();
        for username in self.settings.string_list(KNOWN_USERNAMES_KEY) {
            if !known.contains(&username) {
                known.push(username);
            }
        }
        known
    }

    pub fn is_known(&self, username: &str) -> bool {
        self.known().iter().any(|known| known == username)
    }

    pub fn add_known(&self, username: &str) {
        let mut known = self.known();
        if known.iter().any(|existing| existing == username) {
            return;
        }
        known.push(username.to_string());
        self.settings.set_string_list(KNOWN_USERNAMES_KEY, &known);
    }

    pub fn remove_known(&self, username: &str) {
        let mut known = self.settings.string_list(KNOWN_USERNAMES_KEY);
        let before = known.len();
        known.retain(|existing| existing != username);
        if known.len() != before {
            self.settings.set_string_list(KNOWN_USERNAMES_KEY, &known);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn add_known_preserves_first_seen_order() {
        let registry = AccountRegistry::in_memory();
        registry.add_known("alice");
        registry.add_known("bob");
        registry.add_known("alice");
        registry.add_known("carol");
        assert_eq!(registry.known(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn remove_known_drops_every_occurrence() {
        let settings = Arc::new(MemorySettings::new());
        settings.set_string_list(
            KNOWN_USERNAMES_KEY,
            &["alice".to_string(), "bob".to_string(), "alice".to_string()],
        );
        let registry = AccountRegistry::new(settings.clone());
        registry.remove_known("alice");
        assert_eq!(settings.string_list(KNOWN_USERNAMES_KEY), vec!["bob"]);
    }

    #[test]
    fn remove_unknown_username_is_a_no_op() {
        let registry = AccountRegistry::in_memory();
        registry.add_known("alice");
        registry.remove_known("mallory");
        assert_eq!(registry.known(), vec!["alice"]);
    }

    #[test]
    fn active_pointer_can_be_cleared() {
        let registry = AccountRegistry::in_memory();
        assert_eq!(registry.active(), None);
        registry.set_active(Some("alice"));
        assert_eq!(registry.active().as_deref(), Some("alice"));
        registry.set_active(None);
        assert_eq!(registry.active(), None);
    }

    #[test]
    fn file_settings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        {
            let registry = AccountRegistry::new(Arc::new(FileSettings::new(&path)));
            registry.add_known("alice");
            registry.add_known("bob");
            registry.set_active(Some("bob"));
        }
        let reopened = AccountRegistry::new(Arc::new(FileSettings::new(&path)));
        assert_eq!(reopened.known(), vec!["alice", "bob"]);
        assert_eq!(reopened.active().as_deref(), Some("bob"));
    }

    #[test]
    fn corrupt_settings_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        let registry = AccountRegistry::new(Arc::new(FileSettings::new(&path)));
        assert_eq!(registry.active(), None);
        assert!(registry.known().is_empty());

        registry.add_known("alice");
        assert_eq!(registry.known(), vec!["alice"]);

        let mut backup = path.clone().into_os_string();
        backup.push(".corrupt");
        assert_eq!(fs::read_to_string(backup).unwrap(), "this is = = not toml");
    }

    #[test]
    fn unsupported_version_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let newer = "version = 2\n\n[values]\nactive-username = \"alice\"\n";
        fs::write(&path, newer).unwrap();
        let registry = AccountRegistry::new(Arc::new(FileSettings::new(&path)));

        assert_eq!(registry.active(), None);
        registry.set_active(Some("bob"));
        registry.add_known("bob");

        assert_eq!(fs::read_to_string(&path).unwrap(), newer);
    }

    #[test]
    fn mismatched_value_type_reads_as_absent() {
        let settings = MemorySettings::new();
        settings.set_string(KNOWN_USERNAMES_KEY, Some("alice"));
        assert!(settings.string_list(KNOWN_USERNAMES_KEY).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn settings_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        FileSettings::new(&path).set_string(ACTIVE_USERNAME_KEY, Some("alice"));
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
