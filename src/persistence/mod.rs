//! Persistence layer modules.

pub mod metadata;
