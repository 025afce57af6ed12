//! JSONL event log, one file per UTC day.
//!
//! An event lands in the file for the day of its own timestamp, so a late
//! write near midnight never ends up in the following day's file. Each
//! record is written with a single `write_all` of the full line, which keeps
//! lines whole when several writers append to the same file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::EventLogger;
use crate::models::event::OrchestratorEvent;
use crate::{AppError, Result};

/// The open file for the most recent day written.
struct DayFile {
    date: NaiveDate,
    file: File,
}

/// Appends events to `<log_dir>/events-YYYY-MM-DD.jsonl`.
pub struct JsonlEventWriter {
    log_dir: PathBuf,
    current: Mutex<Option<DayFile>>,
}

impl JsonlEventWriter {
    /// Writer over `log_dir`, created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|err| {
            AppError::Io(format!(
                "failed to create event log directory {}: {err}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            current: Mutex::new(None),
        })
    }

    /// File holding the events stamped on `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("events-{date}.jsonl"))
    }

    /// Events recorded for `date`, in write order. A day with no file is
    /// empty; lines that do not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the file exists but cannot be read.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<OrchestratorEvent>> {
        let path = self.path_for(date);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to open event log {}: {err}",
                    path.display()
                )))
            }
        };

        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| {
                AppError::Io(format!("failed to read event log {}: {err}", path.display()))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(
                    path = %path.display(),
                    line = index + 1,
                    %err,
                    "skipping malformed event"
                ),
            }
        }
        Ok(events)
    }

    fn open(&self, date: NaiveDate) -> Result<File> {
        let path = self.path_for(date);
        debug!(path = %path.display(), "opening event log");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                AppError::Io(format!("failed to open event log {}: {err}", path.display()))
            })
    }
}

impl EventLogger for JsonlEventWriter {
    fn log_event(&self, event: &OrchestratorEvent) -> Result<()> {
        let date = event.timestamp.date_naive();
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut current = self
            .current
            .lock()
            .map_err(|_| AppError::Io("event log lock poisoned".into()))?;

        if current.as_ref().is_none_or(|day| day.date != date) {
            *current = Some(DayFile {
                date,
                file: self.open(date)?,
            });
        }

        let Some(day) = current.as_mut() else {
            return Err(AppError::Io("event log not open".into()));
        };
        day.file
            .write_all(&line)
            .map_err(|err| AppError::Io(format!("event write failed: {err}")))
    }
}
