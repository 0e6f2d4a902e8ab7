//
//  bitbucket-cli
//  auth/store.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Credential Storage Module
//!
//! Persists the single active [`Credential`] behind the [`CredentialStore`]
//! trait. Two backends are provided:
//!
//! - [`FileCredentialStore`]: a JSON file in the user's config directory,
//!   written atomically with owner-only permissions.
//! - [`KeyringCredentialStore`]: the platform keyring (Keychain, Secret
//!   Service, Windows Credential Manager).
//!
//! The backend is chosen from configuration by [`open_store`]. A missing or
//! unreadable credential is reported as [`ErrorKind::NotFound`], which
//! callers treat as "not authenticated".
//!
//! ## Example
//!
//! ```rust,no_run
//! use bitbucket_client::auth::{Credential, CredentialStore, FileCredentialStore};
//!
//! let store = FileCredentialStore::new("/tmp/bb/credentials.json");
//! store.save(&Credential::access_token("token"))?;
//! let loaded = store.load()?;
//! store.delete()?;
//! # Ok::<(), bitbucket_client::api::BitbucketError>(())
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keyring::Entry;

use crate::api::{BitbucketError, ErrorKind, Result};
use crate::config::{remove_if_exists, write_atomic, Config, StoreBackend};

use super::Credential;

/// The service name used to identify this application in the system keyring.
const SERVICE_NAME: &str = "bitbucket-cli";

/// Keyring entry holding the active credential.
const ENTRY_NAME: &str = "active-credential";

/// File name of the credential file inside the config directory.
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Persistence for the single active credential set.
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Replaces the stored credential.
    fn save(&self, credential: &Credential) -> Result<()>;

    /// Returns the stored credential.
    ///
    /// Fails with [`ErrorKind::NotFound`] when nothing is stored or the
    /// stored data cannot be read back.
    fn load(&self) -> Result<Credential>;

    /// Removes the stored credential. Succeeds when nothing is stored.
    fn delete(&self) -> Result<()>;
}

/// Opens the backend selected in `config`.
pub fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    match config.auth.store {
        StoreBackend::File => {
            let path = Config::config_dir()
                .map_err(|e| BitbucketError::new(ErrorKind::Unknown, e.to_string()))?
                .join(CREDENTIALS_FILE);
            Ok(Arc::new(FileCredentialStore::new(path)))
        }
        StoreBackend::Keyring => Ok(Arc::new(KeyringCredentialStore::new())),
    }
}

/// Credential file with atomic writes and owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        let content = serde_json::to_string_pretty(credential).map_err(|e| {
            BitbucketError::new(ErrorKind::Unknown, "failed to encode credential").with_source(e)
        })?;

        write_atomic(&self.path, &content, Some(0o600)).map_err(|e| {
            BitbucketError::new(
                ErrorKind::Unknown,
                format!("failed to write {}", self.path.display()),
            )
            .with_source(e)
        })?;

        tracing::debug!(path = %self.path.display(), method = %credential.method(), "Saved credential");
        Ok(())
    }

    fn load(&self) -> Result<Credential> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BitbucketError::not_found("no stored credential"));
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable credential file");
                return Err(BitbucketError::not_found("stored credential is unreadable").with_source(e));
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Corrupt credential file");
            BitbucketError::not_found("stored credential is corrupt").with_source(e)
        })
    }

    fn delete(&self) -> Result<()> {
        remove_if_exists(&self.path).map_err(|e| {
            BitbucketError::new(
                ErrorKind::Unknown,
                format!("failed to remove {}", self.path.display()),
            )
            .with_source(e)
        })
    }
}

/// Credential stored as JSON in the system keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    entry: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            entry: ENTRY_NAME.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry).map_err(keyring_error)
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, credential: &Credential) -> Result<()> {
        let content = serde_json::to_string(credential).map_err(|e| {
            BitbucketError::new(ErrorKind::Unknown, "failed to encode credential").with_source(e)
        })?;
        self.entry()?.set_password(&content).map_err(keyring_error)
    }

    fn load(&self) -> Result<Credential> {
        let content = match self.entry()?.get_password() {
            Ok(content) => content,
            Err(keyring::Error::NoEntry) => {
                return Err(BitbucketError::not_found("no stored credential"));
            }
            Err(e) => return Err(keyring_error(e)),
        };

        serde_json::from_str(&content).map_err(|e| {
            tracing::warn!(error = %e, "Corrupt keyring credential");
            BitbucketError::not_found("stored credential is corrupt").with_source(e)
        })
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(keyring_error(e)),
        }
    }
}

fn keyring_error(e: keyring::Error) -> BitbucketError {
    BitbucketError::new(ErrorKind::Unknown, format!("keyring error: {e}")).with_source(e)
}
