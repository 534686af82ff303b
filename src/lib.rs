//! Cucumber wire runner - runs cucumber against a wire protocol step server
//!
//! The step server's socket is bound before cucumber is launched, so
//! cucumber's first connection can never race a server that is not yet
//! listening. One client is accepted in the background and handed to a
//! step engine; cucumber itself runs under a timeout with its output captured.

pub mod commands;
pub mod common;
pub mod runner;
pub mod wire;

// Re-export commonly used types
pub use common::{Error, Result};
pub use runner::{execute, RunOutcome, RunParams};
pub use wire::{AcceptOutcome, StepEngine, WireConnection, WireEndpoint};
