//! Request-scoped storage for the submitted portrait.

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// The probe photo on disk. Removed when dropped.
#[derive(Debug)]
pub struct ProbeImage {
    path: PathBuf,
}

impl ProbeImage {
    /// Write `bytes` to a fresh, uniquely named file under `dir`.
    ///
    /// The extension is guessed from the content; unknown content gets `.img`.
    pub fn store(dir: &Path, bytes: &[u8]) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("img");
        let path = dir.join(format!("{}.{extension}", Uuid::new_v4()));
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "probe stored");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProbeImage {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "probe cleanup failed");
        }
    }
}
