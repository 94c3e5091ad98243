//! Managed server supervision
//!
//! - `starter`: how a server is launched and asked to restart
//! - `lifecycle`: the locked `NotRunning`/`Running` state machine

mod lifecycle;
mod starter;

pub use lifecycle::{ServerLifecycle, ServerState, Transition};
pub use starter::{CommandStarter, RestartSignal, ServerHandle, ServerStarter};
