//! Application state - Central owner of the launcher's services

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use super::error::{LauncherError, LauncherResult};
use super::identity::IdentityManager;
use super::instance::Instance;
use super::locks::NameLocks;
use super::process::{LaunchHandle, LaunchSupervisor, SessionInfo};
use super::settings::Settings;
use super::store::InstanceStore;
use crate::persistence::{Database, InstanceEvent};

/// Central application state
///
/// Operations targeting one instance name take that name's lock for their
/// whole duration, so create, remove, launch and terminate of the same name
/// never interleave.
pub struct AppState {
    /// Settings in effect for this run
    pub settings: Arc<Settings>,
    store: Arc<InstanceStore>,
    supervisor: LaunchSupervisor,
    identity: IdentityManager,
    locks: NameLocks,
}

impl AppState {
    /// Create the application state from the settings stored in `database`
    pub async fn new(database: Database) -> Result<Self> {
        let settings = match database.load_settings()? {
            Some(settings) => settings,
            None => {
                // First run; store the defaults so they can be edited
                let settings = Settings::default();
                database.save_settings(&settings)?;
                settings
            }
        };
        Self::with_settings(Arc::new(database), settings).await
    }

    /// Create the application state with explicit settings
    pub async fn with_settings(database: Arc<Database>, settings: Settings) -> Result<Self> {
        let data_dir = settings.get_data_directory();
        let instances_dir = settings.get_instances_directory();
        tokio::fs::create_dir_all(&instances_dir)
            .await
            .with_context(|| format!("Failed to create {:?}", instances_dir))?;

        let retention = settings.history_retention_days;
        let db = Arc::clone(&database);
        match tokio::task::spawn_blocking(move || db.cleanup_history(retention)).await? {
            Ok(0) => {}
            Ok(count) => info!("Pruned {} history entries", count),
            Err(e) => warn!("Failed to prune history: {:#}", e),
        }

        let settings = Arc::new(settings);
        let store = Arc::new(InstanceStore::new(Arc::clone(&database), instances_dir));
        store
            .load_all()
            .await
            .context("Failed to load instances")?;

        let identity = IdentityManager::load(Arc::clone(&database))
            .await
            .context("Failed to load username")?;
        let supervisor = LaunchSupervisor::new(Arc::clone(&store), Arc::clone(&settings));

        info!("Launcher state ready in {:?}", data_dir);
        Ok(Self {
            settings,
            store,
            supervisor,
            identity,
            locks: NameLocks::new(),
        })
    }

    // === Instances ===

    pub async fn create_instance(
        &self,
        name: &str,
        version: &str,
        mod_loader: Option<String>,
    ) -> LauncherResult<Instance> {
        let _guard = self.locks.lock(name).await;
        self.store.create(name, version, mod_loader).await
    }

    pub async fn list_instances(&self) -> Vec<Instance> {
        self.store.list().await
    }

    pub fn get_instance(&self, name: &str) -> LauncherResult<Instance> {
        self.store.get(name)
    }

    /// Remove an instance that has no active session
    pub async fn remove_instance(&self, name: &str) -> LauncherResult<()> {
        let _guard = self.locks.lock(name).await;

        if !self.store.contains(name) {
            return Err(LauncherError::NotFound(name.to_string()));
        }
        if self.supervisor.is_active(name) {
            return Err(LauncherError::InUse(name.to_string()));
        }

        self.store.remove(name).await?;
        self.supervisor.forget(name);
        Ok(())
    }

    pub async fn load_all_instances(&self) -> LauncherResult<()> {
        self.store.load_all().await
    }

    pub async fn instance_history(&self, name: &str) -> LauncherResult<Vec<InstanceEvent>> {
        self.store.history(name).await
    }

    // === Sessions ===

    pub async fn launch_instance(&self, name: &str) -> LauncherResult<LaunchHandle> {
        let _guard = self.locks.lock(name).await;
        let username = self.identity.get();
        self.supervisor.launch(name, &username).await
    }

    pub async fn terminate_instance(&self, name: &str, force: bool) -> LauncherResult<()> {
        let _guard = self.locks.lock(name).await;
        if force {
            self.supervisor.kill(name).await
        } else {
            self.supervisor.terminate(name, false).await
        }
    }

    pub fn launch_status(&self, name: &str) -> Option<SessionInfo> {
        self.supervisor.status(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.supervisor.is_active(name)
    }

    // === Identity ===

    pub fn get_username(&self) -> String {
        self.identity.get()
    }

    pub async fn edit_username(&self, username: &str) -> LauncherResult<()> {
        self.identity.edit(username).await
    }

    /// Flush state and stop sessions if configured to
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.supervisor.shutdown().await;
        if let Err(e) = self.identity.flush().await {
            error!("Failed to flush username: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    async fn new_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("craftline.db")).unwrap();
        db.initialize().unwrap();
        let settings = Settings {
            data_directory: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let state = AppState::with_settings(Arc::new(db), settings).await.unwrap();
        (dir, state)
    }

    #[tokio::test]
    async fn startup_creates_instances_directory() {
        let (dir, state) = new_state().await;
        assert!(dir.path().join("instances").is_dir());
        assert!(state.list_instances().await.is_empty());
        assert_eq!(state.get_username(), "");
    }

    #[tokio::test]
    async fn remove_reports_missing_before_anything_else() {
        let (_dir, state) = new_state().await;
        let err = state.remove_instance("Ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn created_instances_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_directory: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let db_path = dir.path().join("craftline.db");

        {
            let db = Database::open(&db_path).unwrap();
            db.initialize().unwrap();
            let state = AppState::with_settings(Arc::new(db), settings.clone())
                .await
                .unwrap();
            state.create_instance("Survival", "1.21.5", None).await.unwrap();
            state.edit_username("Alice").await.unwrap();
            state.shutdown().await;
        }

        let db = Database::open(&db_path).unwrap();
        db.initialize().unwrap();
        let state = AppState::with_settings(Arc::new(db), settings).await.unwrap();
        assert_eq!(state.get_instance("Survival").unwrap().version, "1.21.5");
        assert_eq!(state.get_username(), "Alice");
    }
}
