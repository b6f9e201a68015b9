//! Command dispatch - Maps command names onto application operations

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::protocol::{CreateArgs, ErrorPayload, NameArgs, TerminateArgs, UsernameArgs};
use crate::core::{AppState, LauncherError};

/// Stateless translation between wire commands and [`AppState`]
#[derive(Clone)]
pub struct CommandGateway {
    state: Arc<AppState>,
}

impl CommandGateway {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run one command; arguments are validated before any component is reached
    pub async fn dispatch(&self, command: &str, args: Value) -> Result<Value, ErrorPayload> {
        debug!("Dispatching '{}'", command);
        let state = &self.state;

        match command {
            "create_installation" => {
                let args: CreateArgs = parse_args(command, args)?;
                let instance = state
                    .create_instance(&args.name, &args.version, args.mod_loader)
                    .await?;
                to_value(&instance)
            }
            "get_installations" => to_value(&state.list_instances().await),
            "remove_installation" => {
                let args: NameArgs = parse_args(command, args)?;
                state.remove_instance(&args.name).await?;
                Ok(Value::Null)
            }
            "load_all_installations" => {
                state.load_all_instances().await?;
                Ok(Value::Null)
            }
            "launch" => {
                let args: NameArgs = parse_args(command, args)?;
                state.launch_instance(&args.name).await?;
                Ok(Value::Null)
            }
            "get_username" => Ok(Value::String(state.get_username())),
            "edit_username" => {
                let args: UsernameArgs = parse_args(command, args)?;
                state.edit_username(&args.username).await?;
                Ok(Value::Null)
            }
            "terminate_instance" => {
                let args: TerminateArgs = parse_args(command, args)?;
                state.terminate_instance(&args.name, args.force).await?;
                Ok(Value::Null)
            }
            "get_launch_status" => {
                let args: NameArgs = parse_args(command, args)?;
                to_value(&state.launch_status(&args.name))
            }
            "get_instance_history" => {
                let args: NameArgs = parse_args(command, args)?;
                to_value(&state.instance_history(&args.name).await?)
            }
            other => Err(ErrorPayload::invalid_request(format!(
                "Unknown command '{}'",
                other
            ))),
        }
    }
}

fn parse_args<T: DeserializeOwned>(command: &str, args: Value) -> Result<T, ErrorPayload> {
    serde_json::from_value(args).map_err(|e| {
        ErrorPayload::invalid_request(format!("Invalid arguments for '{}': {}", command, e))
    })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ErrorPayload> {
    serde_json::to_value(value).map_err(|e| {
        LauncherError::Persistence(format!("Failed to encode response: {}", e)).into()
    })
}
