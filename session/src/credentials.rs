//! File-backed credential storage.
//!
//! Stands in for browser storage: one file holding the bearer token. Writes
//! go through a temp file + rename so a crash never leaves a half-written
//! token behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use tally_types::Credential;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Owner read/write only.
#[cfg(unix)]
const CREDENTIAL_FILE_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credential at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write credential at {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove credential at {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or blank file means no credential.
    pub fn load(&self) -> Result<Option<Credential>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Credential::new(content).ok()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CredentialError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        self.write(credential.as_str().as_bytes())
            .map_err(|source| CredentialError::Write {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(path = %self.path.display(), "Credential saved");
        Ok(())
    }

    /// Already-absent is fine.
    pub fn clear(&self) -> Result<(), CredentialError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Credential cleared");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                tmp.path(),
                std::fs::Permissions::from_mode(CREDENTIAL_FILE_MODE),
            )?;
        }

        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        // Windows refuses to rename over an existing file.
        if let Err(err) = tmp.persist(&self.path) {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
                err.file.persist(&self.path).map_err(|e| e.error)?;
            } else {
                return Err(err.error);
            }
        }
        Ok(())
    }
}
