//! Schema catalog - databases loaded from a schemas directory

use super::load_schema_file;
use crate::{CostError, Result, Schema};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A named set of collection schemas (one schema design)
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    collections: BTreeMap<String, Schema>,
}

impl Database {
    /// Create a database from already parsed schemas
    pub fn new(name: impl Into<String>, schemas: Vec<Schema>) -> Self {
        Self {
            name: name.into(),
            collections: schemas.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Load every `*.json` file in `dir` as a collection schema
    pub fn load(name: &str, dir: &Path) -> Result<Self> {
        let mut schemas = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                schemas.push(load_schema_file(&path)?);
            }
        }
        Ok(Self::new(name, schemas))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a collection schema by name
    pub fn collection(&self, name: &str) -> Result<&Schema> {
        self.collections
            .get(name)
            .ok_or_else(|| CostError::CollectionNotFound {
                database: self.name.clone(),
                collection: name.to_string(),
            })
    }

    /// Collection names in sorted order
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Iterate over collection schemas in name order
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.collections.values()
    }
}

/// All databases found under a schemas directory
pub struct Catalog {
    root: Option<PathBuf>,
    databases: RwLock<BTreeMap<String, Arc<Database>>>,
}

impl Catalog {
    /// Open a catalog; every sub-directory of `root` is one database
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let catalog = Self {
            root: Some(root.into()),
            databases: RwLock::new(BTreeMap::new()),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    /// In-memory catalog, not backed by a directory
    pub fn from_databases(databases: Vec<Database>) -> Self {
        Self {
            root: None,
            databases: RwLock::new(
                databases
                    .into_iter()
                    .map(|db| (db.name.clone(), Arc::new(db)))
                    .collect(),
            ),
        }
    }

    /// Re-read the schemas directory, replacing the loaded databases.
    /// Returns the number of databases loaded.
    pub fn reload(&self) -> Result<usize> {
        let Some(root) = &self.root else {
            return Ok(self.databases.read().len());
        };

        let mut loaded = BTreeMap::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden directories
            if name.starts_with('.') {
                continue;
            }

            match Database::load(&name, &entry.path()) {
                Ok(db) => {
                    info!("Loaded database {} ({} collections)", name, db.collections.len());
                    loaded.insert(name, Arc::new(db));
                }
                Err(e) => {
                    warn!("Failed to load database {}: {}", name, e);
                }
            }
        }

        let count = loaded.len();
        *self.databases.write() = loaded;
        Ok(count)
    }

    /// Get a database by name
    pub fn get_database(&self, name: &str) -> Result<Arc<Database>> {
        self.databases
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CostError::DatabaseNotFound(name.to_string()))
    }

    /// List all database names
    pub fn list_databases(&self) -> Vec<String> {
        self.databases.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_catalog_loads_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db1 = temp_dir.path().join("db1");
        std::fs::create_dir(&db1).unwrap();
        write(&db1, "Warehouse.json", r#"{"properties": {"IDW": {"type": "integer"}}}"#);
        write(&db1, "notes.txt", "ignored");

        let broken = temp_dir.path().join("broken");
        std::fs::create_dir(&broken).unwrap();
        write(&broken, "Bad.json", "{not json");

        std::fs::create_dir(temp_dir.path().join(".hidden")).unwrap();

        let catalog = Catalog::open(temp_dir.path()).unwrap();
        assert_eq!(catalog.list_databases(), vec!["db1".to_string()]);

        let db = catalog.get_database("db1").unwrap();
        assert_eq!(db.collection_names(), vec!["Warehouse".to_string()]);
        assert!(db.collection("Warehouse").unwrap().has_property("IDW"));
        assert!(matches!(
            db.collection("Stock"),
            Err(CostError::CollectionNotFound { .. })
        ));
        assert!(matches!(
            catalog.get_database("db9"),
            Err(CostError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn test_reload_picks_up_new_database() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open(temp_dir.path()).unwrap();
        assert!(catalog.list_databases().is_empty());

        let db2 = temp_dir.path().join("db2");
        std::fs::create_dir(&db2).unwrap();
        write(&db2, "Client.json", r#"{"properties": {"IDC": {"type": "integer"}}}"#);

        assert_eq!(catalog.reload().unwrap(), 1);
        assert!(catalog.get_database("db2").is_ok());
    }
}
