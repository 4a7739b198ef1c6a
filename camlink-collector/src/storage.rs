//! On-disk layout of received data.
//!
//! ```text
//! <root>/<label>/<timestamp>_<seq>.jpg          streamed frames
//! <root>/<label>/<timestamp>_<filename>         completed transfers
//! <root>/<label>/<timestamp>_<filename>.part    transfers in progress
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::File;
use tracing::{debug, warn};

use camlink_core::CamlinkError;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

#[derive(Debug, Clone)]
pub struct ReceiveDir {
    root: PathBuf,
}

impl ReceiveDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn label_dir(&self, label: &str) -> Result<PathBuf, CamlinkError> {
        let dir = self.root.join(label);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CamlinkError::file(&dir, e))?;
        Ok(dir)
    }

    /// Write one streamed frame and return its path.
    pub async fn write_frame(
        &self,
        label: &str,
        seq: u64,
        payload: &[u8],
    ) -> Result<PathBuf, CamlinkError> {
        let dir = self.label_dir(label).await?;
        let path = dir.join(frame_name(Local::now(), seq));
        tokio::fs::write(&path, payload)
            .await
            .map_err(|e| CamlinkError::file(&path, e))?;
        Ok(path)
    }

    /// Open a `.part` file for an incoming transfer of `filename`.
    ///
    /// `filename` must already be reduced to a bare name.
    pub async fn begin_transfer(
        &self,
        label: &str,
        filename: &str,
    ) -> Result<PendingFile, CamlinkError> {
        let dir = self.label_dir(label).await?;
        let name = format!("{}_{filename}", Local::now().format(TIMESTAMP_FORMAT));
        let part = dir.join(format!("{name}.part"));
        let target = dir.join(name);
        let file = File::create(&part)
            .await
            .map_err(|e| CamlinkError::file(&part, e))?;
        Ok(PendingFile { part, target, file })
    }
}

fn frame_name(at: DateTime<Local>, seq: u64) -> String {
    format!("{}_{seq:06}.jpg", at.format(TIMESTAMP_FORMAT))
}

// ── PendingFile ──────────────────────────────────────────────────

/// A transfer being received. Only [`commit`](Self::commit) makes it
/// visible under its final name.
#[derive(Debug)]
pub struct PendingFile {
    part: PathBuf,
    target: PathBuf,
    file: File,
}

impl PendingFile {
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn part_path(&self) -> &Path {
        &self.part
    }

    /// Sync and rename to the final name.
    pub async fn commit(self) -> Result<PathBuf, CamlinkError> {
        let Self { part, target, file } = self;
        file.sync_all()
            .await
            .map_err(|e| CamlinkError::file(&part, e))?;
        drop(file);
        tokio::fs::rename(&part, &target)
            .await
            .map_err(|e| CamlinkError::file(&target, e))?;
        debug!(path = ?target, "transfer committed");
        Ok(target)
    }

    /// Remove the partial file.
    pub async fn discard(self) {
        let Self { part, file, .. } = self;
        drop(file);
        if let Err(e) = tokio::fs::remove_file(&part).await {
            warn!(path = ?part, error = %e, "could not remove partial transfer");
        }
    }
}
