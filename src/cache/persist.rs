//! Durable cache documents.
//!
//! One MessagePack document per category, written atomically via a temp
//! file and rename. Only cache contents survive restarts; search results
//! and any in-flight flags always start empty. Persistence failures are
//! absorbed: the store falls back to whatever is in memory.

use super::store::CacheStore;
use crate::core::{DeckError, PackageCategory, PackageSet, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    data: Option<PackageSet>,
    last_fetch: Option<DateTime<Utc>>,
}

fn document_path(dir: &Path, category: PackageCategory) -> std::path::PathBuf {
    dir.join(format!("cache_{category}.bin"))
}

fn write_document(dir: &Path, category: PackageCategory, doc: &CacheDocument) -> Result<()> {
    let bytes =
        rmp_serde::to_vec_named(doc).map_err(|e| DeckError::Serialization(e.to_string()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(document_path(dir, category))
        .map_err(|e| DeckError::Persistence(e.to_string()))?;
    Ok(())
}

fn read_document(dir: &Path, category: PackageCategory) -> Result<Option<CacheDocument>> {
    let path = document_path(dir, category);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let doc = rmp_serde::from_slice(&bytes).map_err(|e| DeckError::Serialization(e.to_string()))?;
    Ok(Some(doc))
}

impl CacheStore {
    /// Persist both category documents. Individual failures are logged and
    /// swallowed; a half-written document is never left behind.
    pub async fn save(&self, dir: &Path) {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Could not create cache directory {:?}: {}", dir, e);
            return;
        }

        for category in PackageCategory::ALL {
            let (data, last_fetch) = self.export(category).await;
            let doc = CacheDocument { data, last_fetch };
            match write_document(dir, category, &doc) {
                Ok(()) => debug!("Persisted cache document for {}", category),
                Err(e) => warn!("Failed to persist cache for {}: {}", category, e),
            }
        }
    }

    /// Restore category documents written by a previous run. Unreadable or
    /// missing documents leave the entry empty.
    pub async fn load(&self, dir: &Path) {
        for category in PackageCategory::ALL {
            match read_document(dir, category) {
                Ok(Some(doc)) => {
                    debug!("Restored cache document for {}", category);
                    self.restore(category, doc.data, doc.last_fetch).await;
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load cache for {}: {}", category, e),
            }
        }
    }
}
