#![forbid(unsafe_code)]

//! Session lifecycle and reaction engine for fleets of coding agents.

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod plugins;

pub use config::OrchestratorConfig;
pub use errors::{AppError, Result};
