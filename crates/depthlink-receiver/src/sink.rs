//! Writes completed files into per-event folders.
//!
//! ```text
//! <root>/20241208_140309/20241208_140309_45_frame000042.jpg   image / depth: first two `_` fields
//! <root>/20241208_140309/20241208_140309.csv                  calibration: file stem
//! <root>/imu_20241208_140309/imu_20241208_140309.csv          IMU stream: file stem
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use depthlink_core::ContentKind;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::assembler::ReceivedFile;

#[derive(Debug, Clone)]
pub struct FileSink {
    root: PathBuf,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of `filename`, or an error if the name could escape the
    /// output root.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf> {
        check_filename(filename)?;
        Ok(self.root.join(event_for(filename)).join(filename))
    }

    pub async fn write(&self, file: &ReceivedFile) -> Result<PathBuf> {
        let path = self.path_for(&file.filename)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Creating event folder {}", dir.display()))?;
        }
        if file.kind == ContentKind::Metadata {
            // IMU streams arrive as one CSV payload per sample under a
            // single name; successive payloads extend the file.
            let mut out = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("Opening {}", path.display()))?;
            out.write_all(&file.data)
                .await
                .with_context(|| format!("Appending to {}", path.display()))?;
        } else {
            tokio::fs::write(&path, &file.data)
                .await
                .with_context(|| format!("Writing {}", path.display()))?;
        }
        info!("Stored {} ({} bytes) at {}", file.filename, file.data.len(), path.display());
        Ok(path)
    }
}

fn check_filename(filename: &str) -> Result<()> {
    if filename.is_empty() {
        bail!("Empty filename");
    }
    if filename.contains(['/', '\\']) || filename == "." || filename == ".." {
        bail!("Filename {:?} contains a path component", filename);
    }
    Ok(())
}

/// Event folder name derived from a filename.
pub fn event_for(filename: &str) -> String {
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (filename, ""),
    };
    if ext.eq_ignore_ascii_case("csv") {
        return stem.to_owned();
    }
    let mut fields = stem.splitn(3, '_');
    match (fields.next(), fields.next()) {
        (Some(date), Some(time)) => format!("{}_{}", date, time),
        _ => stem.to_owned(),
    }
}
