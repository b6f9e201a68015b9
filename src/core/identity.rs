//! Player identity - The offline username passed to launched games

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::error::{LauncherError, LauncherResult};
use crate::persistence::Database;

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 16;

/// Check a username against the accepted character set and length
pub fn validate_username(username: &str) -> LauncherResult<()> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(LauncherError::InvalidUsername(format!(
            "'{}' must be {} to {} characters long",
            username, MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(LauncherError::InvalidUsername(format!(
            "'{}' contains '{}'; only letters, digits and '_' are allowed",
            username, c
        )));
    }
    Ok(())
}

/// Holds the current username and keeps it in sync with the settings table
pub struct IdentityManager {
    database: Arc<Database>,
    username: RwLock<String>,
}

impl IdentityManager {
    /// Load the persisted username, empty when none was ever set
    pub async fn load(database: Arc<Database>) -> LauncherResult<Self> {
        let db = Arc::clone(&database);
        let username = tokio::task::spawn_blocking(move || db.load_username())
            .await??
            .unwrap_or_default();
        debug!("Loaded username '{}'", username);

        Ok(Self {
            database,
            username: RwLock::new(username),
        })
    }

    pub fn get(&self) -> String {
        self.username
            .read()
            .map(|u| u.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Validate and persist a new username; memory is only updated once stored
    pub async fn edit(&self, username: &str) -> LauncherResult<()> {
        validate_username(username)?;

        let database = Arc::clone(&self.database);
        let owned = username.to_string();
        tokio::task::spawn_blocking(move || database.save_username(&owned)).await??;

        *self
            .username
            .write()
            .unwrap_or_else(|e| e.into_inner()) = username.to_string();
        info!("Username set to '{}'", username);
        Ok(())
    }

    /// Write the in-memory username back to the database
    pub async fn flush(&self) -> LauncherResult<()> {
        let username = self.get();
        if username.is_empty() {
            return Ok(());
        }
        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || database.save_username(&username)).await??;
        Ok(())
    }
}
