use crate::catalog::{BucketKey, CatalogTree, Entry};
use crate::error::{CatalogError, Result};
use chrono::Local;
use log::{error, info, warn};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct StoredCatalogRef<'a> {
    schema_version: u32,
    updated_at: String,
    catalog: &'a CatalogTree,
}

#[derive(Deserialize)]
struct StoredCatalog {
    schema_version: u32,
    #[serde(default)]
    catalog: CatalogTree,
}

/// Handle to the single JSON document holding the whole catalog.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    /// Makes sure the store location is usable. Failing here is the one
    /// error that should stop a run before it starts.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.is_dir() {
            return Err(CatalogError::StoreRead {
                path: path.clone(),
                source: io::Error::new(io::ErrorKind::Other, "store path is a directory"),
            });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CatalogError::StoreWriteFailure {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(CatalogStore { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<CatalogTree> {
        if !self.path.exists() {
            info!("No catalog found at {:?}. Starting fresh.", self.path);
            return Ok(CatalogTree::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| CatalogError::StoreRead {
            path: self.path.clone(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(CatalogTree::new());
        }

        let value: Value = serde_json::from_str(&content).map_err(|source| self.corrupt(source))?;
        let version = value.get("schema_version").cloned();
        let mut tree = match version {
            Some(version) => self.decode_versioned(&version, value)?,
            None => {
                info!("Catalog {:?} has no schema version, migrating legacy layout.", self.path);
                self.migrate_legacy(value)?
            }
        };

        let dropped = tree.dedupe();
        if dropped > 0 {
            warn!("Dropped {} entries with missing or repeated identifiers while loading {:?}", dropped, self.path);
        }
        for (bucket, id) in tree.cross_overlaps() {
            warn!(
                "Stored entry {} in {} is also a cross reference of an earlier entry; kept as loaded",
                id, bucket
            );
        }
        info!(
            "Loaded catalog {:?}: {} buckets, {} entries.",
            self.path,
            tree.bucket_count(),
            tree.entry_count()
        );
        Ok(tree)
    }

    /// Like [`load`](Self::load), but an unparsable store is copied aside and
    /// replaced by an empty tree instead of failing the run.
    pub fn load_or_recover(&self) -> Result<CatalogTree> {
        match self.load() {
            Err(CatalogError::StoreCorrupt { path, source }) => {
                error!("Catalog {:?} is corrupt ({}). Starting fresh.", path, source);
                match self.quarantine() {
                    Ok(copy) => warn!("Corrupt catalog preserved at {:?}", copy),
                    Err(e) => error!("Failed to preserve corrupt catalog: {}", e),
                }
                Ok(CatalogTree::new())
            }
            other => other,
        }
    }

    /// Writes the whole tree to a temporary file next to the store and renames
    /// it over the previous document.
    pub fn save(&self, tree: &CatalogTree) -> Result<()> {
        self.save_with_hook(tree, |_| Ok(()))
    }

    fn save_with_hook<F>(&self, tree: &CatalogTree, pre_rename_hook: F) -> Result<()>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let document = StoredCatalogRef {
            schema_version: SCHEMA_VERSION,
            updated_at: Local::now().to_rfc3339(),
            catalog: tree,
        };
        let mut json = serde_json::to_string_pretty(&document)?;
        json.push('\n');

        atomic_write(&self.path, json.as_bytes(), pre_rename_hook)
            .map_err(|source| CatalogError::StoreWriteFailure {
                path: self.path.clone(),
                source,
            })
    }

    fn quarantine(&self) -> io::Result<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog.json".to_string());
        let copy = self.path.with_file_name(format!(
            "{}.corrupt-{}",
            file_name,
            Local::now().format("%Y%m%d%H%M%S")
        ));
        fs::copy(&self.path, &copy)?;
        Ok(copy)
    }

    fn corrupt(&self, source: serde_json::Error) -> CatalogError {
        CatalogError::StoreCorrupt {
            path: self.path.clone(),
            source,
        }
    }

    fn decode_versioned(&self, version: &Value, value: Value) -> Result<CatalogTree> {
        let found = version
            .as_u64()
            .ok_or_else(|| self.corrupt(serde_json::Error::custom("schema_version is not a number")))?;
        if found > u64::from(SCHEMA_VERSION) {
            return Err(CatalogError::UnsupportedSchema {
                path: self.path.clone(),
                found: u32::try_from(found).unwrap_or(u32::MAX),
                supported: SCHEMA_VERSION,
            });
        }
        let stored: StoredCatalog = serde_json::from_value(value).map_err(|source| self.corrupt(source))?;
        if stored.schema_version != SCHEMA_VERSION {
            info!("Upgrading catalog from schema {} to {}", stored.schema_version, SCHEMA_VERSION);
        }
        Ok(stored.catalog)
    }

    /// Reads catalogs written by the old scripts: brand → [listings],
    /// part → [entries] or brand → model → part → [entries].
    fn migrate_legacy(&self, value: Value) -> Result<CatalogTree> {
        let Value::Object(top) = value else {
            return Err(self.corrupt(serde_json::Error::custom("top level is not a JSON object")));
        };

        let mut tree = CatalogTree::new();
        for (domain, level1) in top {
            match level1 {
                Value::Array(items) => fill_bucket(&mut tree, BucketKey::flat(domain.as_str()), items),
                Value::Object(models) => {
                    for (subdomain, level2) in models {
                        match level2 {
                            Value::Array(items) => {
                                fill_bucket(&mut tree, BucketKey::new(domain.as_str(), subdomain, ""), items)
                            }
                            Value::Object(parts) => {
                                for (category, level3) in parts {
                                    match level3 {
                                        Value::Array(items) => fill_bucket(
                                            &mut tree,
                                            BucketKey::new(domain.as_str(), subdomain.as_str(), category),
                                            items,
                                        ),
                                        _ => warn!("Ignoring legacy key {}/{}/{}: not a list", domain, subdomain, category),
                                    }
                                }
                            }
                            _ => warn!("Ignoring legacy key {}/{}: not a list or mapping", domain, subdomain),
                        }
                    }
                }
                _ => warn!("Ignoring legacy key {}: not a list or mapping", domain),
            }
        }
        Ok(tree)
    }
}

/// Replaces `path` with `contents` through a synced temporary file in the
/// same directory, so readers only ever see the old or the new document.
pub fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    atomic_write(path, contents, |_| Ok(()))
}

fn atomic_write<F>(path: &Path, contents: &[u8], pre_rename_hook: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.as_file_mut().sync_all()?;
    let temp_path = temp.into_temp_path();
    pre_rename_hook(temp_path.as_ref())?;
    temp_path.persist(path).map_err(|e| e.error)
}

fn fill_bucket(tree: &mut CatalogTree, bucket: BucketKey, items: Vec<Value>) {
    let entries = tree.upsert(&bucket);
    for item in items {
        match legacy_entry(item) {
            Some(entry) => entries.push(entry),
            None => warn!("Dropping legacy entry without identifier in {}", bucket),
        }
    }
}

fn legacy_entry(value: Value) -> Option<Entry> {
    let Value::Object(mut fields) = value else {
        return None;
    };

    let mut identifier = None;
    for key in ["identifier", "oem_main", "id"] {
        if let Some(found) = fields.remove(key).and_then(identifier_string) {
            identifier.get_or_insert(found);
        }
    }

    let mut cross_identifiers = std::collections::BTreeSet::new();
    for key in ["cross_identifiers", "oem_cross_refs"] {
        if let Some(Value::Array(refs)) = fields.remove(key) {
            cross_identifiers.extend(refs.into_iter().filter_map(identifier_string));
        }
    }

    let identifier = identifier?;
    cross_identifiers.remove(&identifier);
    Some(Entry {
        identifier,
        cross_identifiers,
        payload: fields,
    })
}

fn identifier_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
