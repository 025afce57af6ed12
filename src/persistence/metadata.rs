//! Flat `key=value` session metadata files.
//!
//! One file per session id under a project's sessions directory, plus an
//! `archive/` area holding `<id>_<timestamp>` snapshots of killed sessions.
//! Every write goes through a temporary file that is atomically renamed
//! into place, so a reader never observes a torn record.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::{AppError, Result};

/// Name of the archive sub-directory.
pub const ARCHIVE_DIR: &str = "archive";

/// Raw metadata record.
pub type Metadata = BTreeMap<String, String>;

/// Reject ids that could escape the sessions directory.
///
/// # Errors
///
/// Returns `AppError::Metadata` for empty ids or ids with characters other
/// than ASCII letters, digits, `-`, and `_`.
pub fn validate_session_id(id: &str) -> Result<()> {
    if !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(AppError::Metadata(format!("invalid session id '{id}'")))
    }
}

/// Parse a `key=value` document. Blank lines and `#` comments are skipped.
#[must_use]
pub fn parse_metadata(content: &str) -> Metadata {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_owned(), value.to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Render a record as a `key=value` document.
#[must_use]
pub fn serialize_metadata(metadata: &Metadata) -> String {
    let mut out = String::new();
    for (key, value) in metadata {
        out.push_str(key);
        out.push('=');
        out.push_str(&value.replace(['\r', '\n'], " "));
        out.push('\n');
    }
    out
}

/// Read the active record for `id`.
///
/// Returns `None` when no record exists.
///
/// # Errors
///
/// Returns `AppError::Metadata` for an invalid id and `AppError::Io` if
/// the file exists but cannot be read.
pub fn read_metadata_raw(dir: &Path, id: &str) -> Result<Option<Metadata>> {
    validate_session_id(id)?;
    read_file(&dir.join(id))
}

/// Replace the active record for `id`.
///
/// # Errors
///
/// Returns `AppError::Metadata` for an invalid id and `AppError::Io` if
/// the record cannot be written.
pub fn write_metadata(dir: &Path, id: &str, metadata: &Metadata) -> Result<()> {
    validate_session_id(id)?;
    fs::create_dir_all(dir).map_err(|err| {
        AppError::Io(format!("failed to create {}: {err}", dir.display()))
    })?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(serialize_metadata(metadata).as_bytes())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    let path = dir.join(id);
    tmp.persist(&path).map_err(|err| {
        AppError::Io(format!("failed to persist {}: {err}", path.display()))
    })?;
    Ok(())
}

/// Merge `updates` into the record for `id`, creating it if needed.
/// An empty value removes the key. Returns the merged record.
///
/// # Errors
///
/// Propagates read and write failures.
pub fn update_metadata<K, V>(
    dir: &Path,
    id: &str,
    updates: impl IntoIterator<Item = (K, V)>,
) -> Result<Metadata>
where
    K: Into<String>,
    V: Into<String>,
{
    let mut metadata = read_metadata_raw(dir, id)?.unwrap_or_default();
    for (key, value) in updates {
        let (key, value) = (key.into(), value.into());
        if value.is_empty() {
            metadata.remove(&key);
        } else {
            metadata.insert(key, value);
        }
    }
    write_metadata(dir, id, &metadata)?;
    Ok(metadata)
}

/// Remove the active record for `id`, optionally moving it to the archive.
/// Missing records are ignored.
///
/// # Errors
///
/// Returns `AppError::Io` if the record cannot be moved or removed.
pub fn delete_metadata(dir: &Path, id: &str, archive: bool) -> Result<()> {
    validate_session_id(id)?;
    let path = dir.join(id);
    if !path.is_file() {
        return Ok(());
    }

    if archive {
        let archive_dir = dir.join(ARCHIVE_DIR);
        fs::create_dir_all(&archive_dir).map_err(|err| {
            AppError::Io(format!("failed to create {}: {err}", archive_dir.display()))
        })?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = archive_dir.join(format!("{id}_{stamp}"));
        fs::rename(&path, &target).map_err(|err| {
            AppError::Io(format!("failed to archive {}: {err}", path.display()))
        })?;
        debug!(session_id = id, archive = %target.display(), "metadata archived");
    } else {
        fs::remove_file(&path).map_err(|err| {
            AppError::Io(format!("failed to remove {}: {err}", path.display()))
        })?;
    }
    Ok(())
}

/// Active session ids in `dir`, sorted.
///
/// # Errors
///
/// Returns `AppError::Io` if the directory exists but cannot be read.
pub fn list_metadata(dir: &Path) -> Result<Vec<String>> {
    let mut ids: Vec<String> = entries(dir)?
        .into_iter()
        .filter(|(_, path)| path.is_file())
        .map(|(name, _)| name)
        .filter(|name| validate_session_id(name).is_ok())
        .collect();
    ids.sort();
    Ok(ids)
}

/// Atomically claim `id` by creating an empty record.
///
/// Returns `false` if a record for `id` already exists.
///
/// # Errors
///
/// Returns `AppError::Io` for failures other than the record existing.
pub fn reserve_session_id(dir: &Path, id: &str) -> Result<bool> {
    validate_session_id(id)?;
    fs::create_dir_all(dir).map_err(|err| {
        AppError::Io(format!("failed to create {}: {err}", dir.display()))
    })?;
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dir.join(id))
    {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(AppError::Io(format!("failed to reserve {id}: {err}"))),
    }
}

/// Most recent archived record for `id`.
///
/// # Errors
///
/// Returns `AppError::Io` if the archive cannot be read.
pub fn read_archived_metadata_raw(dir: &Path, id: &str) -> Result<Option<Metadata>> {
    validate_session_id(id)?;
    let prefix = format!("{id}_");
    let latest = entries(&dir.join(ARCHIVE_DIR))?
        .into_iter()
        .filter(|(name, _)| {
            name.strip_prefix(&prefix)
                .is_some_and(|stamp| !stamp.contains('_'))
        })
        .max_by(|(a, _), (b, _)| a.cmp(b));

    match latest {
        Some((_, path)) => read_file(&path),
        None => Ok(None),
    }
}

/// Distinct session ids present in the archive, sorted.
///
/// # Errors
///
/// Returns `AppError::Io` if the archive cannot be read.
pub fn list_archived_ids(dir: &Path) -> Result<Vec<String>> {
    let ids: BTreeSet<String> = entries(&dir.join(ARCHIVE_DIR))?
        .into_iter()
        .filter_map(|(name, _)| name.rsplit_once('_').map(|(id, _)| id.to_owned()))
        .filter(|id| validate_session_id(id).is_ok())
        .collect();
    Ok(ids.into_iter().collect())
}

fn read_file(path: &Path) -> Result<Option<Metadata>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(parse_metadata(&content))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::Io(format!(
            "failed to read {}: {err}",
            path.display()
        ))),
    }
}

/// Visible directory entries as `(file name, path)`; a missing directory is empty.
fn entries(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(AppError::Io(format!(
                "failed to read {}: {err}",
                dir.display()
            )))
        }
    };

    let mut out = Vec::new();
    for entry in read {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        out.push((name, entry.path()));
    }
    Ok(out)
}
