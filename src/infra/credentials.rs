//! Local persistence for provider API keys.
//!
//! Keys live in a small TOML table keyed by provider name. A key is written
//! whenever a non-blank value is supplied and the entry is removed otherwise;
//! nothing else is persisted.

use std::{
    collections::BTreeMap,
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::domain::{Credential, Provider};

use super::error::InfraError;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, provider: Provider) -> Result<Option<Credential>, InfraError> {
        let entries = self.read()?;
        Ok(entries
            .get(provider.as_str())
            .and_then(|value| Credential::new(value.as_str())))
    }

    /// Store `value` for `provider`, or remove the entry when `value` is blank.
    pub fn set(&self, provider: Provider, value: &str) -> Result<(), InfraError> {
        let mut entries = self.read()?;
        match Credential::new(value) {
            Some(credential) => {
                entries.insert(
                    provider.as_str().to_string(),
                    credential.expose().to_string(),
                );
                info!(
                    target = "infra::credentials",
                    provider = %provider,
                    "Stored API key"
                );
            }
            None => {
                entries.remove(provider.as_str());
                info!(
                    target = "infra::credentials",
                    provider = %provider,
                    "Removed API key"
                );
            }
        }
        self.write(&entries)
    }

    pub fn clear(&self, provider: Provider) -> Result<(), InfraError> {
        self.set(provider, "")
    }

    /// Providers paired with whether a key is currently stored for them.
    pub fn status(&self) -> Result<Vec<(Provider, bool)>, InfraError> {
        let entries = self.read()?;
        Ok(Provider::ALL
            .iter()
            .map(|provider| {
                let present = entries
                    .get(provider.as_str())
                    .is_some_and(|value| !value.trim().is_empty());
                (*provider, present)
            })
            .collect())
    }

    fn read(&self) -> Result<BTreeMap<String, String>, InfraError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(
                    target = "infra::credentials",
                    path = %self.path.display(),
                    "Credential store not created yet"
                );
                return Ok(BTreeMap::new());
            }
            Err(err) => return Err(InfraError::Io(err)),
        };

        toml::from_str(&contents)
            .map_err(|err| InfraError::credentials(&self.path, format!("invalid TOML: {err}")))
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<(), InfraError> {
        let serialized = toml::to_string(entries)
            .map_err(|err| InfraError::credentials(&self.path, err.to_string()))?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let mut file = NamedTempFile::new_in(&parent)?;
        file.write_all(serialized.as_bytes())?;
        file.flush()?;
        file.persist(&self.path)
            .map_err(|err| InfraError::Io(err.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> CredentialStore {
        CredentialStore::new(dir.path().join("nested").join("credentials.toml"))
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);
        assert!(store.get(Provider::Gemini).expect("read").is_none());
    }

    #[test]
    fn set_persists_non_empty_key() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);
        store.set(Provider::OpenRouter, " sk-or-1 ").expect("set");

        let reopened = CredentialStore::new(store.path());
        let credential = reopened
            .get(Provider::OpenRouter)
            .expect("read")
            .expect("stored key");
        assert_eq!(credential.expose(), "sk-or-1");
        assert!(reopened.get(Provider::Gemini).expect("read").is_none());
    }

    #[test]
    fn blank_value_removes_entry() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);
        store.set(Provider::Gemini, "g-key").expect("set");
        store.set(Provider::OpenRouter, "or-key").expect("set");

        store.set(Provider::Gemini, "   ").expect("clear via blank");
        assert!(store.get(Provider::Gemini).expect("read").is_none());
        assert!(store.get(Provider::OpenRouter).expect("read").is_some());

        let raw = fs::read_to_string(store.path()).expect("file");
        assert!(!raw.contains("gemini"), "entry should be gone: {raw}");
    }

    #[test]
    fn status_reports_each_provider() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_in(&dir);
        store.set(Provider::Gemini, "g-key").expect("set");

        let status = store.status().expect("status");
        assert_eq!(
            status,
            vec![(Provider::Gemini, true), (Provider::OpenRouter, false)]
        );
    }

    #[test]
    fn corrupt_file_surfaces_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("credentials.toml");
        fs::write(&path, "gemini = [").expect("write");

        let err = CredentialStore::new(&path)
            .get(Provider::Gemini)
            .expect_err("invalid toml");
        assert!(matches!(err, InfraError::Credentials { .. }));
    }
}
