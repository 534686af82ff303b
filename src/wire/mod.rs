//! Wire protocol server plumbing
//!
//! Finds and parses the `.wire` file, binds the socket it describes, and
//! hands the one client that connects to a step engine. The protocol itself
//! is the engine's business.

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod listener;
pub mod server;

pub use config::{find_wire_config, parse_wire_config};
pub use endpoint::WireEndpoint;
pub use engine::{DrainEngine, StepEngine, WireConnection};
pub use server::{listen, AcceptOutcome, ServerHandle, ShutdownMode};
