use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{info, warn};
use crate::core::config::Config;
use crate::core::database::{Database, DEFAULT_DATABASE};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::record::Record;
use crate::migration::{self, MigrationReport};
use crate::query::predicate::Predicate;

#[derive(Default)]
struct Registry {
    databases: BTreeMap<String, Arc<Database>>,
    default: Option<String>,
}

/// Named databases plus a default one.
///
/// The first connection becomes the default. Records are routed by
/// `Record::DATABASE`, falling back to the default when it is `None`.
#[derive(Default)]
pub struct DatabaseManager {
    registry: RwLock<Registry>,
}

impl DatabaseManager {
    pub fn new() -> Self {
        DatabaseManager::default()
    }

    /// Open and register a database; an empty name means `"main"`
    pub fn connect(&self, name: &str, config: Config) -> Result<Arc<Database>> {
        let name = if name.is_empty() { DEFAULT_DATABASE } else { name };

        let mut registry = self.registry.write();
        if registry.databases.contains_key(name) {
            return Err(Error::new(
                ErrorKind::DatabaseExists,
                format!("database '{}' is already connected", name),
            ));
        }

        let location = config
            .storage_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "memory".to_string());
        let db = Arc::new(Database::open_named(name, config)?);
        registry.databases.insert(name.to_string(), db.clone());
        if registry.default.is_none() {
            registry.default = Some(name.to_string());
        }

        info!(database = name, location = %location, "database connected");
        Ok(db)
    }

    pub fn connect_default(&self, path: impl Into<PathBuf>) -> Result<Arc<Database>> {
        self.connect(DEFAULT_DATABASE, Config::with_path(path))
    }

    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        if !registry.databases.contains_key(name) {
            return Err(database_not_found(name));
        }
        registry.default = Some(name.to_string());
        info!(database = name, "default database set");
        Ok(())
    }

    pub fn default_name(&self) -> Option<String> {
        self.registry.read().default.clone()
    }

    /// The default database
    pub fn get(&self) -> Result<Arc<Database>> {
        self.get_named("")
    }

    /// An empty name resolves to the default database
    pub fn get_named(&self, name: &str) -> Result<Arc<Database>> {
        let registry = self.registry.read();
        let name = resolve(&registry, name)?;
        registry
            .databases
            .get(&name)
            .cloned()
            .ok_or_else(|| database_not_found(&name))
    }

    pub fn all(&self) -> BTreeMap<String, Arc<Database>> {
        self.registry.read().databases.clone()
    }

    pub fn list_databases(&self) -> Vec<String> {
        self.registry.read().databases.keys().cloned().collect()
    }

    /// Close and unregister; closing the default promotes another database
    pub fn close(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write();
        let name = resolve(&registry, name)?;
        let db = registry
            .databases
            .get(&name)
            .cloned()
            .ok_or_else(|| database_not_found(&name))?;

        db.close()?;
        registry.databases.remove(&name);

        if registry.default.as_deref() == Some(name.as_str()) {
            registry.default = registry.databases.keys().next().cloned();
        }
        info!(database = %name, "database closed");
        Ok(())
    }

    /// Close everything; errors are collected, not short-circuited
    pub fn close_all(&self) -> Result<()> {
        let mut registry = self.registry.write();
        let mut failures = Vec::new();
        for (name, db) in &registry.databases {
            if let Err(e) = db.close() {
                warn!(database = %name, error = %e, "close failed");
                failures.push(format!("'{}': {}", name, e));
            }
        }
        registry.databases.clear();
        registry.default = None;

        if !failures.is_empty() {
            return Err(Error::new(
                ErrorKind::Storage,
                format!("errors closing databases: {}", failures.join("; ")),
            ));
        }
        info!("all database connections closed");
        Ok(())
    }

    /// Move `bucket` between two connected databases by name
    pub fn migrate_bucket(&self, source: &str, target: &str, bucket: &str, delete_source: bool) -> Result<MigrationReport> {
        if target.is_empty() {
            return Err(Error::invalid_input("target database name cannot be empty"));
        }
        let source = self.get_named(source)?;
        let target = self.get_named(target)?;
        migration::migrate_bucket(&source, &target, bucket, delete_source)
    }

    pub fn migrate_bucket_with_transform<F>(
        &self,
        source: &str,
        target: &str,
        bucket: &str,
        transform: F,
        delete_source: bool,
    ) -> Result<MigrationReport>
    where
        F: Fn(&str, &[u8]) -> Result<Option<(String, Vec<u8>)>> + Sync,
    {
        if target.is_empty() {
            return Err(Error::invalid_input("target database name cannot be empty"));
        }
        let source = self.get_named(source)?;
        let target = self.get_named(target)?;
        migration::migrate_bucket_with_transform(&source, &target, bucket, transform, delete_source)
    }

    pub fn migrate_between(
        &self,
        source_db: &str,
        source_bucket: &str,
        target_db: &str,
        target_bucket: &str,
        delete_source: bool,
    ) -> Result<MigrationReport> {
        if source_db.is_empty() || target_db.is_empty() {
            return Err(Error::invalid_input("database names cannot be empty"));
        }
        let source = self.get_named(source_db)?;
        let target = self.get_named(target_db)?;
        migration::migrate_between(&source, source_bucket, &target, target_bucket, delete_source)
    }

    fn route<R: Record>(&self) -> Result<Arc<Database>> {
        self.get_named(R::DATABASE.unwrap_or(""))
    }

    pub fn create<R: Record>(&self, record: &mut R) -> Result<String> {
        self.route::<R>()?.create(record)
    }

    pub fn save<R: Record>(&self, record: &mut R) -> Result<()> {
        self.route::<R>()?.save(record)
    }

    pub fn delete<R: Record>(&self, record: &R) -> Result<()> {
        self.route::<R>()?.delete(record)
    }

    pub fn soft_delete<R: Record>(&self, record: &mut R) -> Result<()> {
        self.route::<R>()?.soft_delete(record)
    }

    pub fn find<R: Record>(&self, key: &str) -> Result<R> {
        self.route::<R>()?.find(key)
    }

    pub fn find_where<R: Record>(&self, predicate: &Predicate) -> Result<Vec<R>> {
        self.route::<R>()?.find_where(predicate)
    }

    pub fn find_all<R: Record>(&self) -> Result<Vec<R>> {
        self.route::<R>()?.find_all()
    }
}

fn resolve(registry: &Registry, name: &str) -> Result<String> {
    if !name.is_empty() {
        return Ok(name.to_string());
    }
    registry.default.clone().ok_or_else(|| {
        Error::new(ErrorKind::NoDefaultDatabase, "no default database connected".to_string())
    })
}

fn database_not_found(name: &str) -> Error {
    Error::new(ErrorKind::DatabaseNotFound, format!("database '{}' not found", name))
}
