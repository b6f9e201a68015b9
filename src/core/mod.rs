//! Core module - Instance catalog, version classification, launching and identity

mod app_state;
pub mod error;
pub mod identity;
mod instance;
pub mod launch;
mod locks;
pub mod process;
pub mod settings;
mod store;
pub mod version;

pub use app_state::AppState;
pub use error::{ErrorKind, LauncherError, LauncherResult};
pub use identity::IdentityManager;
pub use instance::{Instance, InstanceManifest, SessionStatus, MANIFEST_FILE, MAX_NAME_LEN};
pub use locks::NameLocks;
pub use process::{LaunchHandle, LaunchSupervisor, SessionInfo};
pub use settings::Settings;
pub use store::InstanceStore;
pub use version::{classify, VersionType};
