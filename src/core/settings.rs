//! Launcher settings management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the launcher home directory
pub const HOME_ENV: &str = "CRAFTLINE_HOME";

/// Launcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Storage
    /// Custom data directory
    pub data_directory: Option<PathBuf>,

    // Launching
    /// Java executable used when a profile does not name its own program
    pub java_path: String,
    /// Initial heap size in MB
    pub min_ram_mb: u32,
    /// Maximum heap size in MB
    pub max_ram_mb: u32,
    /// Extra JVM arguments appended to every launch
    pub extra_jvm_args: Vec<String>,
    /// Seconds to wait for a launched process to report readiness
    pub launch_timeout_secs: u64,
    /// Seconds to wait for a terminated process to exit
    pub terminate_timeout_secs: u64,
    /// Terminate running games when the launcher shuts down
    pub stop_instances_on_exit: bool,

    // Advanced
    /// Keep instance history for N days (0 = forever)
    pub history_retention_days: u32,
    /// Enable debug logging
    pub debug_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_directory: None,

            java_path: "java".to_string(),
            min_ram_mb: 1024,
            max_ram_mb: 2048,
            extra_jvm_args: Vec::new(),
            launch_timeout_secs: 60,
            terminate_timeout_secs: 10,
            stop_instances_on_exit: false,

            history_retention_days: 30,
            debug_logging: false,
        }
    }
}

impl Settings {
    /// Get the data directory, using default if not set
    pub fn get_data_directory(&self) -> PathBuf {
        self.data_directory.clone().unwrap_or_else(default_home)
    }

    /// Get the instances data directory
    pub fn get_instances_directory(&self) -> PathBuf {
        self.get_data_directory().join("instances")
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_secs(self.terminate_timeout_secs)
    }

    /// Validate settings and fix any invalid values
    pub fn validate(&mut self) {
        self.min_ram_mb = self.min_ram_mb.max(128);
        self.max_ram_mb = self.max_ram_mb.max(self.min_ram_mb);
        self.launch_timeout_secs = self.launch_timeout_secs.clamp(1, 600);
        self.terminate_timeout_secs = self.terminate_timeout_secs.clamp(1, 120);
        if self.java_path.trim().is_empty() {
            self.java_path = "java".to_string();
        }
    }
}

/// Launcher home: `$CRAFTLINE_HOME`, else the platform data directory
pub fn default_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|h| !h.is_empty()) {
        return PathBuf::from(home);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("craftline")
}
