//! SQLite database implementation for persistent storage

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::core::settings::default_home;
use crate::core::{Instance, Settings};

/// Settings key holding the player name
const USERNAME_KEY: &str = "auth_player_name";

/// Settings key holding the serialized launcher settings
const SETTINGS_KEY: &str = "app_settings";

/// Raw catalog row; the version is reclassified by the store on load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRow {
    pub name: String,
    pub version: String,
    pub mod_loader: Option<String>,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_played: Option<DateTime<Utc>>,
}

/// One entry of an instance's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceEvent {
    pub event_type: String,
    pub event_time: String,
    pub details: Option<String>,
}

/// Database wrapper for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Open the database at the default location
    pub fn new() -> Result<Self> {
        Self::open(&Self::get_database_path())
    }

    /// Open (or create) a database file at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let conn = Connection::open(db_path)
            .context(format!("Failed to open database at {:?}", db_path))?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        info!("Database opened at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path.to_path_buf(),
        })
    }

    /// Get the database file path
    fn get_database_path() -> PathBuf {
        default_home().join("craftline.db")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Initialize database schema
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            -- Settings and identity
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Instance catalog
            CREATE TABLE IF NOT EXISTS instances (
                name TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                mod_loader TEXT,
                icon TEXT,
                created_at TEXT NOT NULL,
                last_played TEXT
            );

            -- Instance history
            CREATE TABLE IF NOT EXISTS instance_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_name TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_time TEXT NOT NULL,
                details TEXT
            );
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }

    // === Settings ===

    /// Load settings from database
    pub fn load_settings(&self) -> Result<Option<Settings>> {
        match self.get_value(SETTINGS_KEY)? {
            Some(json) => {
                let mut settings: Settings =
                    serde_json::from_str(&json).context("Failed to deserialize settings")?;
                settings.validate();
                Ok(Some(settings))
            }
            None => Ok(None),
        }
    }

    /// Save settings to database
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.set_value(SETTINGS_KEY, &json)?;
        debug!("Settings saved");
        Ok(())
    }

    // === Identity ===

    pub fn load_username(&self) -> Result<Option<String>> {
        self.get_value(USERNAME_KEY)
    }

    pub fn save_username(&self, username: &str) -> Result<()> {
        self.set_value(USERNAME_KEY, username)
            .context("Failed to save username")?;
        debug!("Username saved");
        Ok(())
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        let value = stmt.query_row(params![key], |row| row.get(0)).optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // === Instances ===

    /// Insert a new catalog row; returns false if the name is already taken
    pub fn insert_instance(&self, instance: &Instance) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                r#"
                INSERT OR IGNORE INTO instances
                (name, version, mod_loader, icon, created_at, last_played)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    instance.name,
                    instance.version,
                    instance.mod_loader,
                    instance.icon,
                    instance.created_at.to_rfc3339(),
                    instance.last_played.map(|t| t.to_rfc3339()),
                ],
            )
            .with_context(|| format!("Failed to save instance '{}'", instance.name))?;

        debug!("Instance '{}' inserted: {}", instance.name, inserted == 1);
        Ok(inserted == 1)
    }

    /// Record the last launch time of an instance
    pub fn update_last_played(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE instances SET last_played = ?1 WHERE name = ?2",
            params![at.to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Load all catalog rows ordered by name
    pub fn load_all_instances(&self) -> Result<Vec<InstanceRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, version, mod_loader, icon, created_at, last_played FROM instances ORDER BY name",
        )?;

        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let version: String = row.get(1)?;
            let mod_loader: Option<String> = row.get(2)?;
            let icon: Option<String> = row.get(3)?;
            let created_at_str: String = row.get(4)?;
            let last_played_str: Option<String> = row.get(5)?;

            Ok((name, version, mod_loader, icon, created_at_str, last_played_str))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (name, version, mod_loader, icon, created_at_str, last_played_str) = row?;

            result.push(InstanceRow {
                name,
                version,
                mod_loader,
                icon,
                created_at: parse_time(&created_at_str).unwrap_or_else(Utc::now),
                last_played: last_played_str.as_deref().and_then(parse_time),
            });
        }

        Ok(result)
    }

    /// Delete a catalog row; returns false if it did not exist
    pub fn delete_instance(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM instances WHERE name = ?1", params![name])
            .with_context(|| format!("Failed to delete instance '{}'", name))?;
        debug!("Instance '{}' deleted", name);
        Ok(deleted > 0)
    }

    // === History ===

    /// Record an instance event
    pub fn record_instance_event(
        &self,
        instance_name: &str,
        event_type: &str,
        details: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO instance_history (instance_name, event_type, event_time, details)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![instance_name, event_type, Utc::now().to_rfc3339(), details],
        )?;
        Ok(())
    }

    /// Get instance history, newest first
    pub fn get_instance_history(&self, instance_name: &str) -> Result<Vec<InstanceEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_type, event_time, details FROM instance_history WHERE instance_name = ?1 ORDER BY id DESC",
        )?;

        let history = stmt.query_map(params![instance_name], |row| {
            Ok(InstanceEvent {
                event_type: row.get(0)?,
                event_time: row.get(1)?,
                details: row.get(2)?,
            })
        })?;

        let mut result = Vec::new();
        for event in history {
            result.push(event?);
        }

        Ok(result)
    }

    /// Clean up old history entries
    pub fn cleanup_history(&self, retention_days: u32) -> Result<usize> {
        if retention_days == 0 {
            return Ok(0); // Keep forever
        }

        let conn = self.conn()?;
        let cutoff = Utc::now()
            - chrono::TimeDelta::try_days(retention_days as i64)
                .unwrap_or_else(|| chrono::TimeDelta::days(30));
        let count = conn.execute(
            "DELETE FROM instance_history WHERE event_time < ?1",
            params![cutoff.to_rfc3339()],
        )?;

        debug!("Cleaned up {} old history entries", count);
        Ok(count)
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
