//! Command gateway - The RPC boundary between a UI and the launcher core

mod commands;
pub mod protocol;
pub mod server;

pub use commands::CommandGateway;
pub use protocol::{ErrorPayload, Request, Response};
pub use server::serve;
