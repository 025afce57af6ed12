//! Durable event log.
//!
//! Provides the [`EventLogger`] trait. The primary implementation,
//! [`JsonlEventWriter`], appends JSONL records to daily-rotating files in
//! `<data_dir>/events/`.

pub mod writer;

use crate::models::event::OrchestratorEvent;

/// Writes orchestrator events to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait EventLogger: Send + Sync {
    /// Record a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_event(&self, event: &OrchestratorEvent) -> crate::Result<()>;
}

pub use writer::JsonlEventWriter;
