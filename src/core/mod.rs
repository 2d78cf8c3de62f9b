//! Core logic behind the CLI: the agent loop and everything it drives.

pub mod agent;

pub use agent::Agent;
