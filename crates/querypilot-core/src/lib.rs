//! Shared types, configuration, and errors for QueryPilot.
//!
//! QueryPilot is the AI-assistant service of a multi-database studio: it
//! drives a tool-calling conversation with an LLM provider and streams the
//! exchange back to the studio UI. This crate holds the conversation model
//! the other crates agree on, plus the config file format and the
//! workspace-wide error type.

pub mod config;
pub mod error;
pub mod types;

pub use error::{QueryPilotError, Result};
