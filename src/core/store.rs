//! Instance store - Durable catalog of instances with an in-memory cache
//!
//! The SQLite catalog is the source of truth. Each instance also owns a
//! directory under the instances directory carrying an `instance.json`
//! manifest, which lets [`InstanceStore::load_all`] adopt directories whose
//! catalog row was lost. The cache is only written by this type.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, error, info, warn};

use super::error::{LauncherError, LauncherResult};
use super::instance::{self, Instance, InstanceManifest, MANIFEST_FILE};
use crate::persistence::{Database, InstanceEvent, InstanceRow};

pub struct InstanceStore {
    database: Arc<Database>,
    instances_dir: PathBuf,
    /// Read-optimized projection of the catalog, ordered by name
    cache: RwLock<BTreeMap<String, Instance>>,
    /// Shared by create/remove, exclusive for a full reload
    reconcile: AsyncRwLock<()>,
}

impl InstanceStore {
    pub fn new(database: Arc<Database>, instances_dir: PathBuf) -> Self {
        Self {
            database,
            instances_dir,
            cache: RwLock::new(BTreeMap::new()),
            reconcile: AsyncRwLock::new(()),
        }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Directory backing the named instance
    pub fn dir_for(&self, name: &str) -> PathBuf {
        self.instances_dir.join(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cache
            .read()
            .map(|c| c.contains_key(name))
            .unwrap_or(false)
    }

    /// Look up a cached instance
    pub fn get(&self, name: &str) -> LauncherResult<Instance> {
        self.cache
            .read()
            .map_err(|e| LauncherError::Persistence(format!("Instance cache poisoned: {}", e)))?
            .get(name)
            .cloned()
            .ok_or_else(|| LauncherError::NotFound(name.to_string()))
    }

    /// Create a new instance with its backing directory and catalog row
    pub async fn create(
        &self,
        name: &str,
        version: &str,
        mod_loader: Option<String>,
    ) -> LauncherResult<Instance> {
        let instance = Instance::new(name, version, mod_loader)?;
        let _gate = self.reconcile.read().await;

        if self.contains(name) {
            return Err(LauncherError::DuplicateName(name.to_string()));
        }

        let database = Arc::clone(&self.database);
        let dir = instance.dir_path(&self.instances_dir);
        let record = instance.clone();
        tokio::task::spawn_blocking(move || create_on_disk(&database, &dir, &record)).await??;

        self.cache_write()?.insert(instance.name.clone(), instance.clone());

        info!(
            "Created instance '{}' ({} {})",
            instance.name, instance.version_type, instance.version
        );
        Ok(instance)
    }

    /// All instances with a backing directory, ordered by name
    pub async fn list(&self) -> Vec<Instance> {
        let snapshot: Vec<Instance> = match self.cache.read() {
            Ok(cache) => cache.values().cloned().collect(),
            Err(e) => {
                error!("Instance cache poisoned: {}", e);
                return Vec::new();
            }
        };

        let instances_dir = self.instances_dir.clone();
        let listed = tokio::task::spawn_blocking(move || {
            snapshot
                .into_iter()
                .filter(|instance| {
                    let present = instance.dir_path(&instances_dir).is_dir();
                    if !present {
                        warn!(
                            "Instance '{}' has no directory, excluding it from the listing",
                            instance.name
                        );
                    }
                    present
                })
                .collect()
        })
        .await;

        listed.unwrap_or_else(|e| {
            error!("Listing instances failed: {}", e);
            Vec::new()
        })
    }

    /// Remove an instance's directory and catalog row
    ///
    /// Callers must ensure no launch session is active for `name`.
    pub async fn remove(&self, name: &str) -> LauncherResult<()> {
        let _gate = self.reconcile.read().await;

        if !self.contains(name) {
            return Err(LauncherError::NotFound(name.to_string()));
        }

        let database = Arc::clone(&self.database);
        let dir = self.dir_for(name);
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || remove_from_disk(&database, &dir, &owned)).await??;

        self.cache_write()?.remove(name);

        info!("Removed instance '{}'", name);
        Ok(())
    }

    /// Rebuild the cache from the catalog, adopting orphaned instance directories
    pub async fn load_all(&self) -> LauncherResult<()> {
        let _gate = self.reconcile.write().await;

        let database = Arc::clone(&self.database);
        let instances_dir = self.instances_dir.clone();
        let loaded =
            tokio::task::spawn_blocking(move || load_from_disk(&database, &instances_dir))
                .await??;

        let count = loaded.len();
        *self.cache_write()? = loaded;

        info!("Loaded {} instances", count);
        Ok(())
    }

    /// Record that an instance was just launched
    pub async fn touch_last_played(&self, name: &str) -> LauncherResult<()> {
        let now = Utc::now();
        let database = Arc::clone(&self.database);
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || database.update_last_played(&owned, now)).await??;

        if let Some(instance) = self.cache_write()?.get_mut(name) {
            instance.last_played = Some(now);
        }
        Ok(())
    }

    pub async fn history(&self, name: &str) -> LauncherResult<Vec<InstanceEvent>> {
        let database = Arc::clone(&self.database);
        let owned = name.to_string();
        let history =
            tokio::task::spawn_blocking(move || database.get_instance_history(&owned)).await??;
        Ok(history)
    }

    /// Append to an instance's history; failures are only logged
    pub async fn record_event(&self, name: &str, event_type: &str, details: Option<String>) {
        let database = Arc::clone(&self.database);
        let owned = name.to_string();
        let event = event_type.to_string();
        let result = tokio::task::spawn_blocking(move || {
            database.record_instance_event(&owned, &event, details.as_deref())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to record '{}' event for '{}': {:#}", event_type, name, e),
            Err(e) => warn!("Failed to record '{}' event for '{}': {}", event_type, name, e),
        }
    }

    fn cache_write(
        &self,
    ) -> LauncherResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Instance>>> {
        self.cache
            .write()
            .map_err(|e| LauncherError::Persistence(format!("Instance cache poisoned: {}", e)))
    }
}

fn write_manifest(dir: &Path, manifest: &InstanceManifest) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    fs::write(dir.join(MANIFEST_FILE), json)?;
    Ok(())
}

fn read_manifest(path: &Path) -> anyhow::Result<InstanceManifest> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn create_on_disk(database: &Database, dir: &Path, instance: &Instance) -> LauncherResult<()> {
    // A directory without a catalog row still belongs to someone
    if dir.exists() {
        return Err(LauncherError::DuplicateName(instance.name.clone()));
    }

    fs::create_dir_all(dir).map_err(|e| {
        LauncherError::Persistence(format!("Failed to create {}: {}", dir.display(), e))
    })?;

    let result = write_manifest(dir, &instance.manifest())
        .map_err(LauncherError::from)
        .and_then(|_| match database.insert_instance(instance) {
            Ok(true) => Ok(()),
            Ok(false) => Err(LauncherError::DuplicateName(instance.name.clone())),
            Err(e) => Err(e.into()),
        });

    if let Err(err) = result {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!("Failed to roll back {}: {}", dir.display(), e);
        }
        return Err(err);
    }

    if let Err(e) = database.record_instance_event(&instance.name, "created", Some(&instance.version)) {
        warn!("Failed to record creation of '{}': {:#}", instance.name, e);
    }
    Ok(())
}

fn remove_from_disk(database: &Database, dir: &Path, name: &str) -> LauncherResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Directory of '{}' was already gone", name);
        }
        Err(e) => {
            return Err(LauncherError::Persistence(format!(
                "Failed to delete {}: {}",
                dir.display(),
                e
            )))
        }
    }

    database.delete_instance(name)?;

    if let Err(e) = database.record_instance_event(name, "removed", None) {
        warn!("Failed to record removal of '{}': {:#}", name, e);
    }
    Ok(())
}

fn instance_from_row(row: InstanceRow) -> LauncherResult<Instance> {
    let version_type = instance::classify(&row.version)?;
    Ok(Instance {
        name: row.name,
        version: row.version,
        version_type,
        mod_loader: row.mod_loader,
        icon: row.icon,
        created_at: row.created_at,
        last_played: row.last_played,
    })
}

fn load_from_disk(
    database: &Database,
    instances_dir: &Path,
) -> LauncherResult<BTreeMap<String, Instance>> {
    let mut loaded = BTreeMap::new();

    for row in database.load_all_instances()? {
        let name = row.name.clone();
        match instance_from_row(row) {
            Ok(instance) => {
                loaded.insert(name, instance);
            }
            Err(e) => warn!("Skipping catalog entry '{}': {}", name, e),
        }
    }

    if !instances_dir.is_dir() {
        debug!("Instances directory {} does not exist yet", instances_dir.display());
        return Ok(loaded);
    }

    let entries = fs::read_dir(instances_dir).map_err(|e| {
        LauncherError::Persistence(format!("Failed to read {}: {}", instances_dir.display(), e))
    })?;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|f| f.to_str()).map(str::to_string) else {
            continue;
        };
        if loaded.contains_key(&name) {
            continue;
        }

        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            debug!("Ignoring {} without {}", path.display(), MANIFEST_FILE);
            continue;
        }

        let instance = match read_manifest(&manifest_path)
            .map_err(LauncherError::from)
            .and_then(|mut manifest| {
                // The directory name is authoritative
                manifest.name = name.clone();
                Instance::from_manifest(manifest)
            }) {
            Ok(instance) => instance,
            Err(e) => {
                warn!("Skipping instance directory {}: {}", path.display(), e);
                continue;
            }
        };

        if database.insert_instance(&instance)? {
            info!("Adopted instance '{}' from {}", name, path.display());
            if let Err(e) = database.record_instance_event(&name, "adopted", None) {
                warn!("Failed to record adoption of '{}': {:#}", name, e);
            }
        }
        loaded.insert(name, instance);
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::version::VersionType;

    fn new_store() -> (tempfile::TempDir, InstanceStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("craftline.db")).unwrap();
        db.initialize().unwrap();
        let store = InstanceStore::new(Arc::new(db), dir.path().join("instances"));
        (dir, store)
    }

    #[tokio::test]
    async fn create_then_list() {
        let (_dir, store) = new_store();
        let created = store.create("Survival", "1.21.5", None).await.unwrap();
        assert_eq!(created.version_type, VersionType::Release);
        assert!(store.dir_for("Survival").join(MANIFEST_FILE).is_file());

        let listed = store.list().await;
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn duplicate_create_leaves_store_unchanged() {
        let (_dir, store) = new_store();
        let first = store.create("Survival", "1.21.5", None).await.unwrap();

        let err = store.create("Survival", "1.8.9", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);

        assert_eq!(store.list().await, vec![first]);
        store.load_all().await.unwrap();
        assert_eq!(store.get("Survival").unwrap().version, "1.21.5");
    }

    #[tokio::test]
    async fn invalid_version_creates_nothing() {
        let (_dir, store) = new_store();
        let err = store.create("Broken", "banana", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
        assert!(!store.dir_for("Broken").exists());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn missing_directory_is_excluded_but_removable() {
        let (_dir, store) = new_store();
        store.create("Survival", "1.21.5", None).await.unwrap();
        store.create("Creative", "1.20.1", None).await.unwrap();
        fs::remove_dir_all(store.dir_for("Survival")).unwrap();

        let names: Vec<String> = store.list().await.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["Creative".to_string()]);

        store.remove("Survival").await.unwrap();
        assert!(!store.contains("Survival"));
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let (_dir, store) = new_store();
        let err = store.remove("Ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn load_all_adopts_orphaned_directories_once() {
        let (_dir, store) = new_store();
        let orphan = store.dir_for("Orphan");
        fs::create_dir_all(&orphan).unwrap();
        fs::write(
            orphan.join(MANIFEST_FILE),
            r#"{"name": "Orphan", "version": "a1.2.6"}"#,
        )
        .unwrap();
        fs::create_dir_all(store.dir_for("NoManifest")).unwrap();

        store.load_all().await.unwrap();
        let first = store.list().await;
        store.load_all().await.unwrap();
        let second = store.list().await;

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].version_type, VersionType::OldAlpha);
        assert_eq!(store.history("Orphan").await.unwrap()[0].event_type, "adopted");
    }

    #[tokio::test]
    async fn touch_updates_cache_and_catalog() {
        let (_dir, store) = new_store();
        store.create("Survival", "1.21.5", None).await.unwrap();
        store.touch_last_played("Survival").await.unwrap();
        let played = store.get("Survival").unwrap().last_played;
        assert!(played.is_some());

        store.load_all().await.unwrap();
        assert_eq!(
            store.get("Survival").unwrap().last_played.map(|t| t.timestamp()),
            played.map(|t| t.timestamp())
        );
    }
}
