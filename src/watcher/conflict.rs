//! Conflict-free destination naming.
//!
//! When the destination folder already holds a file with the incoming name,
//! the task's [`ConflictPolicy`] decides what happens. Name resolution is
//! deterministic: the same name and the same set of existing files always
//! give the same result. Names are reserved with `create_new`, so arrivals
//! racing into one folder never pick the same path.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::PipelineError;

/// What to do when the destination name is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Append `(1)`, `(2)`, ... before the extension.
    #[default]
    Suffix,
    /// Replace the existing file.
    Overwrite,
    /// Leave the new file where it arrived and upload it from there.
    KeepSource,
}

/// Outcome of resolving a destination name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Move the file to this path.
    MoveTo(PathBuf),
    /// Do not move the file.
    KeepSource,
}

/// `name.ext` -> `name(n).ext`; names without an extension get the suffix
/// appended. Leading-dot names like `.env` are treated as having no extension.
pub fn numbered_name(file_name: &Path, n: u32) -> OsString {
    let stem = file_name.file_stem().unwrap_or(file_name.as_os_str());
    let mut name = OsString::from(stem);
    name.push(format!("({n})"));
    if let Some(ext) = file_name.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}

/// Resolve where `file_name` should land in `dir`.
///
/// `claim` is asked for each candidate in order and returns `Ok(true)` if the
/// name is now reserved for this caller. Two callers sharing a `claim` that
/// reserves atomically never receive the same path. `Overwrite` never claims.
pub fn resolve_with(
    dir: &Path,
    file_name: &Path,
    policy: ConflictPolicy,
    max_attempts: u32,
    mut claim: impl FnMut(&Path) -> io::Result<bool>,
) -> Result<Resolution, PipelineError> {
    let direct = dir.join(file_name);
    let mut try_claim = |candidate: &Path| claim(candidate).map_err(|e| PipelineError::io(candidate, e));

    match policy {
        ConflictPolicy::Overwrite => Ok(Resolution::MoveTo(direct)),
        ConflictPolicy::KeepSource => {
            if try_claim(&direct)? {
                Ok(Resolution::MoveTo(direct))
            } else {
                Ok(Resolution::KeepSource)
            }
        }
        ConflictPolicy::Suffix => {
            if try_claim(&direct)? {
                return Ok(Resolution::MoveTo(direct));
            }
            for n in 1..=max_attempts {
                let candidate = dir.join(numbered_name(file_name, n));
                if try_claim(&candidate)? {
                    return Ok(Resolution::MoveTo(candidate));
                }
            }
            Err(PipelineError::ConflictExhausted {
                path: direct,
                attempts: max_attempts,
            })
        }
    }
}

/// Reserve `path` by creating it empty. Fails with `false` if it exists.
fn claim_on_disk(path: &Path) -> io::Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Resolve against the real filesystem.
///
/// Except under `Overwrite`, the returned `MoveTo` path exists as an empty
/// placeholder owned by the caller, who must move onto it or remove it.
pub fn resolve_destination(
    dir: &Path,
    file_name: &Path,
    policy: ConflictPolicy,
    max_attempts: u32,
) -> Result<Resolution, PipelineError> {
    resolve_with(dir, file_name, policy, max_attempts, claim_on_disk)
}
