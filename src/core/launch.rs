//! Launch profiles - Resolving the command line for an instance

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{LauncherError, LauncherResult};
use super::instance::Instance;
use super::settings::Settings;
use super::version::{GameVersion, Version, VersionType};

/// Optional file inside the instance directory overriding the default profile
pub const PROFILE_FILE: &str = "launch.json";

/// Name used when no player name has been set
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// Last release that still needs the legacy resource proxy
const LAST_PROXIED_RELEASE: Version = Version::new(1, 5, 2);

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(\w+)\}").expect("placeholder pattern is valid"))
}

/// How to start the runtime of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchProfile {
    /// Executable to run; the configured Java path when unset
    pub program: Option<String>,
    /// Arguments placed before the entry point
    #[serde(default)]
    pub jvm_args: Vec<String>,
    /// Main class entry point
    pub main_class: Option<String>,
    /// Jar entry point relative to the instance directory, used without a main class
    pub jar: Option<String>,
    /// Arguments placed after the entry point
    #[serde(default)]
    pub game_args: Vec<String>,
    /// Output line pattern signalling the runtime is up
    pub ready_pattern: Option<String>,
}

impl Default for LaunchProfile {
    fn default() -> Self {
        Self {
            program: None,
            jvm_args: vec![
                "-Xmx${max_ram}M".to_string(),
                "-Xms${min_ram}M".to_string(),
                "-Djava.library.path=${natives_directory}".to_string(),
            ],
            main_class: None,
            jar: Some("client.jar".to_string()),
            game_args: vec![
                "--username".to_string(),
                "${auth_player_name}".to_string(),
                "--version".to_string(),
                "${version_name}".to_string(),
                "--gameDir".to_string(),
                "${game_directory}".to_string(),
                "--versionType".to_string(),
                "${version_type}".to_string(),
            ],
            ready_pattern: None,
        }
    }
}

impl LaunchProfile {
    /// Read `launch.json` from an instance directory, or fall back to the default
    pub fn load(instance_dir: &Path) -> LauncherResult<Self> {
        let path = instance_dir.join(PROFILE_FILE);
        match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| {
                LauncherError::InvalidRequest(format!("Invalid {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(LauncherError::Persistence(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// A fully resolved process invocation
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub ready_pattern: Option<Regex>,
}

/// Values available to `${placeholder}` substitution
pub struct LaunchContext<'a> {
    pub instance: &'a Instance,
    pub instance_dir: &'a Path,
    pub settings: &'a Settings,
    pub username: &'a str,
}

impl LaunchContext<'_> {
    fn variables(&self) -> HashMap<&'static str, String> {
        let dir = self.instance_dir;
        let username = if self.username.is_empty() {
            DEFAULT_PLAYER_NAME
        } else {
            self.username
        };

        HashMap::from([
            ("game_directory", dir.display().to_string()),
            ("natives_directory", dir.join(".natives").display().to_string()),
            ("client_jar", dir.join("client.jar").display().to_string()),
            ("instance_name", self.instance.name.clone()),
            ("version_name", self.instance.version.clone()),
            ("version_type", self.instance.version_type.label().to_string()),
            ("auth_player_name", username.to_string()),
            ("auth_uuid", "0".to_string()),
            ("auth_access_token", "0".to_string()),
            ("max_ram", self.settings.max_ram_mb.to_string()),
            ("min_ram", self.settings.min_ram_mb.to_string()),
            ("launcher_name", "craftline".to_string()),
        ])
    }
}

/// Replace `${name}` placeholders; unknown names become empty
pub fn substitute(arg: &str, vars: &HashMap<&'static str, String>) -> String {
    match placeholder_regex().replace_all(arg, |caps: &regex::Captures| {
        vars.get(&caps[1]).cloned().unwrap_or_default()
    }) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

/// Proxy arguments restoring legacy sound and skin services for old versions
pub fn legacy_arguments(instance: &Instance) -> Vec<String> {
    let mut args = Vec::new();
    let parsed = GameVersion::from_str(&instance.version).ok();

    if instance.version_type.is_legacy() {
        args.push("-Dhttp.proxyHost=betacraft.uk".to_string());

        let port = if instance.version.starts_with("c0.") {
            // Classic
            11701
        } else if instance.version_type == VersionType::OldAlpha {
            // Indev, infdev and alpha
            11702
        } else {
            11705
        };
        args.push(format!("-Dhttp.proxyPort={}", port));

        // Old versions crash with the modern sort implementation
        args.push("-Djava.util.Arrays.useLegacyMergeSort=true".to_string());
    } else if let Some(release) = parsed.as_ref().and_then(GameVersion::release) {
        if *release <= LAST_PROXIED_RELEASE {
            args.push("-Dhttp.proxyHost=betacraft.uk".to_string());
            args.push("-Dhttp.proxyPort=11707".to_string());
        }
    }

    args
}

/// Resolve the process invocation for an instance
pub fn build_command(
    ctx: &LaunchContext<'_>,
    profile: &LaunchProfile,
) -> LauncherResult<LaunchCommand> {
    let vars = ctx.variables();
    let sub = |args: &[String]| -> Vec<String> {
        args.iter().map(|a| substitute(a, &vars)).collect()
    };

    let program = match &profile.program {
        Some(program) => substitute(program, &vars),
        None => ctx.settings.java_path.clone(),
    };

    let mut args = sub(&profile.jvm_args);
    args.extend(legacy_arguments(ctx.instance));
    args.extend(sub(&ctx.settings.extra_jvm_args));

    if let Some(main_class) = &profile.main_class {
        args.push(main_class.clone());
    } else if let Some(jar) = &profile.jar {
        args.push("-jar".to_string());
        args.push(ctx.instance_dir.join(jar).display().to_string());
    }

    args.extend(sub(&profile.game_args));

    let ready_pattern = match &profile.ready_pattern {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
            LauncherError::launch_failed(
                &ctx.instance.name,
                format!("invalid ready pattern: {}", e),
            )
        })?),
        None => None,
    };

    Ok(LaunchCommand {
        program,
        args,
        working_dir: ctx.instance_dir.to_path_buf(),
        ready_pattern,
    })
}
