//! Session orchestration modules.
//!
//! Covers session creation and teardown, the lifecycle polling loop, and
//! the reaction and escalation policy applied on status transitions.

pub mod lifecycle;
pub mod reactions;
pub mod session_manager;

use std::future::Future;
use std::time::Duration;

use crate::{AppError, Result};

/// Run a backend call with an upper bound; an elapsed bound becomes
/// `AppError::Timeout`.
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(format!("{what} did not finish within {limit:?}")))?
}
