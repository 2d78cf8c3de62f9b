//! ferry - a tool-using coding agent for the terminal.
//!
//! This library provides the pieces behind the `ferry` binary:
//! - CLI command parsing and the interactive chat session
//! - Layered TOML configuration
//! - The agent loop, its tools and the OpenAI-compatible provider
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  ┌─────────────┐
//! │     CLI     │  │   Config    │
//! └──────┬──────┘  └──────┬──────┘
//!        │                │
//!        └───────┬────────┘
//!                │
//!         ┌──────┴──────┐
//!         │    Agent    │──── tools
//!         └──────┬──────┘
//!                │
//!         ┌──────┴──────┐
//!         │  Provider   │
//!         └─────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod core;

pub use config::Config;
pub use crate::core::agent::Agent;
