//! Local capture files produced by burst cycles.
//!
//! A [`ClipFile`] is written by one cycle, transferred once, and deleted
//! after a confirmed send. A failed transfer leaves the file on disk; it is
//! never queued for a second attempt. [`prune_spool`] bounds how many such
//! leftovers accumulate, and [`discard_partial`] removes the remains of a
//! recording whose cycle failed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use crate::device::Facing;
use crate::error::CamlinkError;
use crate::wire::TransferVariant;

/// Photo or recorded clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipKind {
    Photo,
    Video,
}

impl ClipKind {
    pub fn extension(self) -> &'static str {
        match self {
            ClipKind::Photo => "jpg",
            ClipKind::Video => "mjpeg",
        }
    }

    /// Photos stream until close; clips announce their size.
    pub fn variant(self) -> TransferVariant {
        match self {
            ClipKind::Photo => TransferVariant::UntilClose,
            ClipKind::Video => TransferVariant::Sized,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClipFile {
    pub path: PathBuf,
    pub kind: ClipKind,
    pub facing: Facing,
    pub size: u64,
    /// Start of the recording window.
    pub started_at: DateTime<Local>,
    /// Length of the recording window; zero for photos.
    pub duration: Duration,
}

/// Build the local path for a new capture, e.g.
/// `<dir>/back_20240501_142233_120.mjpeg`.
pub fn clip_path(dir: &Path, facing: Facing, kind: ClipKind, at: DateTime<Local>) -> PathBuf {
    let stamp = at.format("%Y%m%d_%H%M%S_%3f");
    dir.join(format!("{facing}_{stamp}.{}", kind.extension()))
}

impl ClipFile {
    /// Write a captured still to disk.
    pub async fn write_photo(
        dir: &Path,
        facing: Facing,
        payload: &[u8],
    ) -> Result<Self, CamlinkError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CamlinkError::file(dir, e))?;
        let started_at = Local::now();
        let path = clip_path(dir, facing, ClipKind::Photo, started_at);
        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| CamlinkError::file(&path, e))?;
        Ok(Self {
            path,
            kind: ClipKind::Photo,
            facing,
            size: payload.len() as u64,
            started_at,
            duration: Duration::ZERO,
        })
    }

    /// Describe a finished recording.
    pub async fn from_recording(
        path: PathBuf,
        facing: Facing,
        started_at: DateTime<Local>,
        duration: Duration,
    ) -> Result<Self, CamlinkError> {
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| CamlinkError::file(&path, e))?
            .len();
        Ok(Self {
            path,
            kind: ClipKind::Video,
            facing,
            size,
            started_at,
            duration,
        })
    }

    /// Name sent in the transfer header.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", self.facing, self.kind.extension()))
    }

    pub fn variant(&self) -> TransferVariant {
        self.kind.variant()
    }

    /// Delete the file after a confirmed send. Failure is logged only.
    pub async fn remove(self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = ?self.path, "sent capture removed"),
            Err(e) => warn!(path = ?self.path, error = %e, "could not remove sent capture"),
        }
    }
}

/// Remove a recording left behind by a failed cycle. A file that was
/// never created is not an error.
pub async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(?path, "partial recording removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(?path, error = %e, "could not remove partial recording"),
    }
}

/// Whether `name` looks like a capture written by [`clip_path`].
fn is_capture_name(name: &str) -> bool {
    let known_facing = Facing::ALL
        .iter()
        .any(|f| name.starts_with(&format!("{f}_")));
    let known_kind = [ClipKind::Photo, ClipKind::Video]
        .iter()
        .any(|k| name.ends_with(&format!(".{}", k.extension())));
    known_facing && known_kind
}

/// Delete the oldest undelivered captures in `dir` until at most `keep`
/// remain. Other files are left alone. Returns how many were deleted.
pub async fn prune_spool(dir: &Path, keep: usize) -> Result<usize, CamlinkError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| CamlinkError::file(dir, e))?;
    let mut captures = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CamlinkError::file(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_capture_name(&name) {
            continue;
        }
        let modified = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .map_err(|e| CamlinkError::file(entry.path(), e))?;
        captures.push((modified, name, entry.path()));
    }

    if captures.len() <= keep {
        return Ok(0);
    }
    captures.sort();
    let excess = captures.len() - keep;
    let mut removed = 0;
    for (_, _, path) in captures.into_iter().take(excess) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(?path, error = %e, "could not prune spooled capture"),
        }
    }
    debug!(dir = ?dir, removed, keep, "spool pruned");
    Ok(removed)
}
