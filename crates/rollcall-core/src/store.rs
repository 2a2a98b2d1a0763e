//! Known-identity store.
//!
//! A single JSON document holding every trained identity. Training replaces
//! it wholesale: the new document is written to a sibling temp file, synced
//! and renamed over the old one, so a crash mid-write leaves the previous
//! store intact.

use crate::types::KnownIdentity;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity store not found at {} (run `rollcall train` first)", .0.display())]
    NotFound(PathBuf),
    #[error("identity store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported identity store version {found} (expected {})", STORE_VERSION)]
    Version { found: u32 },
    #[error("identity {label:?}: {reason}")]
    Invalid { label: String, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    identities: Vec<KnownIdentity>,
}

/// On-disk location of the identity store.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read and validate every identity. A missing file is an error.
    pub fn load(&self) -> Result<Vec<KnownIdentity>, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(source) => return Err(StoreError::Io { path: self.path.clone(), source }),
        };

        let file: StoreFile = serde_json::from_slice(&bytes)?;
        if file.version != STORE_VERSION {
            return Err(StoreError::Version { found: file.version });
        }
        validate(&file.identities)?;

        tracing::info!(
            path = %self.path.display(),
            identities = file.identities.len(),
            embeddings = file.identities.iter().map(|i| i.embeddings.len()).sum::<usize>(),
            "identity store loaded"
        );
        Ok(file.identities)
    }

    /// Replace the store with `identities`.
    pub fn save(&self, identities: &[KnownIdentity]) -> Result<(), StoreError> {
        validate(identities)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| StoreError::Io { path: parent.to_path_buf(), source })?;
        }

        let doc = StoreFile { version: STORE_VERSION, identities: identities.to_vec() };
        let json = serde_json::to_vec_pretty(&doc)?;

        let tmp = self.temp_path();
        let write_tmp = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()
        };
        if let Err(source) = write_tmp() {
            let _ = std::fs::remove_file(&tmp);
            return Err(StoreError::Io { path: tmp, source });
        }
        std::fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::Io { path: self.path.clone(), source }
        })?;

        tracing::info!(
            path = %self.path.display(),
            identities = identities.len(),
            "identity store written"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "identities.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Every embedding must be non-empty, finite, and share one dimension.
fn validate(identities: &[KnownIdentity]) -> Result<(), StoreError> {
    let mut dim: Option<usize> = None;
    for identity in identities {
        let invalid = |reason: String| StoreError::Invalid { label: identity.label(), reason };

        if identity.id.trim().is_empty() || identity.name.trim().is_empty() {
            return Err(invalid("id and name must be non-empty".into()));
        }
        for embedding in &identity.embeddings {
            if embedding.dim() == 0 {
                return Err(invalid("empty embedding".into()));
            }
            if embedding.values.iter().any(|v| !v.is_finite()) {
                return Err(invalid("embedding contains NaN/Inf".into()));
            }
            match dim {
                None => dim = Some(embedding.dim()),
                Some(d) if d != embedding.dim() => {
                    return Err(invalid(format!(
                        "embedding dimension {} differs from store dimension {d}",
                        embedding.dim()
                    )));
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}
