//! craftline - Instance registry and launch orchestrator for a local game launcher
//!
//! Keeps a durable catalog of named game instances, classifies their
//! versions, launches and supervises their processes and exposes all of it
//! through a command gateway a UI process can drive over stdio.

pub mod core;
pub mod gateway;
pub mod persistence;
pub mod platform;

/// Application name constant
pub const APP_NAME: &str = "craftline";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
