//! Instance records - A named, versioned game configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{LauncherError, LauncherResult};
use super::version::{self, VersionType};

/// Longest accepted instance name
pub const MAX_NAME_LEN: usize = 64;

/// File inside each instance directory describing the instance
pub const MANIFEST_FILE: &str = "instance.json";

/// A managed game instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Unique, case-sensitive name
    pub name: String,
    /// Runtime version identifier, e.g. "1.21.5"
    pub version: String,
    /// Category derived from `version`
    pub version_type: VersionType,
    /// Mod loader the instance was created with
    pub mod_loader: Option<String>,
    /// Icon reference
    pub icon: Option<String>,
    /// When the instance was created
    pub created_at: DateTime<Utc>,
    /// When the instance was last launched
    pub last_played: Option<DateTime<Utc>>,
}

impl Instance {
    /// Build a new record, classifying its version
    pub fn new(name: &str, version: &str, mod_loader: Option<String>) -> LauncherResult<Self> {
        validate_name(name)?;
        let version_type = classify(version)?;

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            version_type,
            mod_loader: mod_loader.filter(|m| !m.trim().is_empty()),
            icon: None,
            created_at: Utc::now(),
            last_played: None,
        })
    }

    /// Directory backing this instance
    pub fn dir_path(&self, instances_dir: &Path) -> PathBuf {
        instances_dir.join(&self.name)
    }

    pub fn manifest(&self) -> InstanceManifest {
        InstanceManifest {
            name: self.name.clone(),
            version: self.version.clone(),
            mod_loader: self.mod_loader.clone(),
            icon: self.icon.clone(),
            created_at: self.created_at,
        }
    }

    /// Rebuild a record from a directory manifest
    pub fn from_manifest(manifest: InstanceManifest) -> LauncherResult<Self> {
        validate_name(&manifest.name)?;
        let version_type = classify(&manifest.version)?;

        Ok(Self {
            name: manifest.name,
            version: manifest.version,
            version_type,
            mod_loader: manifest.mod_loader,
            icon: manifest.icon,
            created_at: manifest.created_at,
            last_played: None,
        })
    }
}

/// On-disk description written into the instance directory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub mod_loader: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Classify a version, mapping failures into the launcher taxonomy
pub fn classify(version: &str) -> LauncherResult<VersionType> {
    version::classify(version).map_err(|e| LauncherError::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Names double as directory names, so they must be a single safe path component
pub fn validate_name(name: &str) -> LauncherResult<()> {
    let reason = if name.is_empty() {
        Some("name must not be empty")
    } else if name.chars().count() > MAX_NAME_LEN {
        Some("name is too long")
    } else if name.trim() != name {
        Some("name must not start or end with whitespace")
    } else if name == "." || name == ".." {
        Some("name is reserved")
    } else if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
    {
        Some("name contains characters that are not allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(LauncherError::InvalidRequest(format!(
            "invalid instance name '{}': {}",
            name, reason
        ))),
        None => Ok(()),
    }
}

/// Lifecycle status of a launch session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "code")]
pub enum SessionStatus {
    /// Process spawned, waiting for readiness
    Starting,
    /// Process reported readiness
    Running,
    /// Process terminated; exit code when one was reported
    Exited(Option<i32>),
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Exited(_) => "Exited",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    #[test]
    fn new_instance_derives_version_type() {
        let instance = Instance::new("Survival", "1.21.5", None).unwrap();
        assert_eq!(instance.version_type, VersionType::Release);
        assert!(instance.last_played.is_none());

        let old = Instance::new("OldTest", "b1.7.3", Some("".into())).unwrap();
        assert_eq!(old.version_type, VersionType::OldBeta);
        assert!(old.mod_loader.is_none());
    }

    #[test]
    fn rejects_unsafe_names() {
        let long = "x".repeat(65);
        for name in ["", " padded", "a/b", "..", "a\\b", "tab\there", long.as_str()] {
            let err = validate_name(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "{:?}", name);
        }
        assert!(validate_name("My World (1.8)").is_ok());
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let err = Instance::new("Broken", "not-a-version", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
    }

    #[test]
    fn record_serializes_camel_case() {
        let instance = Instance::new("Survival", "1.21.5", Some("fabric".into())).unwrap();
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["versionType"], "Release");
        assert_eq!(json["modLoader"], "fabric");
    }

    #[test]
    fn manifest_round_trip_reclassifies() {
        let instance = Instance::new("Classic", "c0.30_01c", None).unwrap();
        let rebuilt = Instance::from_manifest(instance.manifest()).unwrap();
        assert_eq!(rebuilt.version_type, VersionType::OldAlpha);
        assert_eq!(rebuilt.created_at, instance.created_at);
    }
}
