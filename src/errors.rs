//! Error types shared across the application.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use crate::plugins::PluginSlot;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Session metadata record is malformed or could not be persisted.
    Metadata(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Project identifier is not present in the configuration.
    UnknownProject(String),
    /// No backend is registered under the requested slot and name.
    PluginNotFound {
        /// Capability slot that was looked up.
        slot: PluginSlot,
        /// Plugin name configured for the slot.
        name: String,
    },
    /// Issue tracker reported that the issue does not exist.
    IssueNotFound(String),
    /// Issue tracker failure other than a missing issue (auth, network).
    Tracker(String),
    /// Runtime backend failure.
    Runtime(String),
    /// Agent adapter failure, including activity probe errors.
    Agent(String),
    /// Workspace backend failure.
    Workspace(String),
    /// Source-control host failure.
    Scm(String),
    /// Notifier delivery failure.
    Notifier(String),
    /// A bounded backend call did not complete in time.
    Timeout(String),
    /// Session exists but its current status does not allow a restore.
    SessionNotRestorable {
        /// Session that was asked to restore.
        session_id: String,
        /// Human-readable explanation.
        reason: String,
    },
    /// Neither the workspace nor its branch survive; nothing to restore from.
    WorkspaceMissing {
        /// Session that was asked to restore.
        session_id: String,
        /// Workspace path recorded for the session.
        path: PathBuf,
    },
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Metadata(msg) => write!(f, "metadata: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::UnknownProject(id) => write!(f, "unknown project: {id}"),
            Self::PluginNotFound { slot, name } => {
                write!(f, "plugin: {slot} plugin '{name}' not found")
            }
            Self::IssueNotFound(id) => write!(f, "tracker: issue {id} does not exist in tracker"),
            Self::Tracker(msg) => write!(f, "tracker: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Workspace(msg) => write!(f, "workspace: {msg}"),
            Self::Scm(msg) => write!(f, "scm: {msg}"),
            Self::Notifier(msg) => write!(f, "notifier: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::SessionNotRestorable { session_id, reason } => {
                write!(f, "not restorable: session {session_id} {reason}")
            }
            Self::WorkspaceMissing { session_id, path } => write!(
                f,
                "workspace missing: session {session_id} has no workspace at {} and its branch is gone",
                path.display()
            ),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Metadata(format!("invalid json: {err}"))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
