//! Sequential probe-vs-gallery scan.

use crate::normalizer::{self, NormalizeError, NormalizeOutcome};
use crate::types::{
    CandidateImage, CandidateOutcome, CandidateVerdict, CanonicalSize, CanonicalState, ScanReport,
};
use crate::verifier::{BoundProbe, VerificationCapability};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("gallery folder not found: {0}")]
    GalleryNotFound(PathBuf),
    #[error("cannot list gallery {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One mutex per gallery file being normalized, shared by every scan in the
/// process.
///
/// In-place normalization of a gallery file only happens while holding that
/// file's lock, so concurrent requests never read a half-written image. An
/// entry is dropped as soon as no scan holds or waits on it, so the map is
/// bounded by the number of files normalized concurrently.
#[derive(Default)]
pub struct NormalizeLocks {
    files: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl NormalizeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `path` under its per-file lock.
    pub fn normalize(
        &self,
        path: &Path,
        size: CanonicalSize,
    ) -> Result<NormalizeOutcome, NormalizeError> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let lock = self.files.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            normalizer::normalize(path, size)
        };
        drop(lock);
        // Clones are only taken under the shard lock, so a count of one here
        // means nobody else holds or waits on this entry.
        self.files
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of files currently held or awaited by some scan.
    pub fn in_flight(&self) -> usize {
        self.files.len()
    }
}

/// Scans a gallery folder against a probe image.
pub struct GalleryScanner {
    verifier: Arc<dyn VerificationCapability>,
    locks: Arc<NormalizeLocks>,
    size: CanonicalSize,
}

impl GalleryScanner {
    pub fn new(verifier: Arc<dyn VerificationCapability>, size: CanonicalSize) -> Self {
        Self {
            verifier,
            locks: Arc::new(NormalizeLocks::new()),
            size,
        }
    }

    /// Share a lock registry with other scanners over the same galleries.
    pub fn with_locks(mut self, locks: Arc<NormalizeLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn canonical_size(&self) -> CanonicalSize {
        self.size
    }

    /// Compare `probe` against every entry of `gallery`, in file-name order.
    ///
    /// Fails only if the gallery folder is missing or unlistable. A candidate
    /// that cannot be normalized is still verified as-is; a candidate that
    /// cannot be verified is recorded as failed and does not match. The probe
    /// is bound once for the whole gallery.
    pub fn scan(&self, probe: &Path, gallery: &Path) -> Result<ScanReport, ScanError> {
        if !gallery.is_dir() {
            return Err(ScanError::GalleryNotFound(gallery.to_path_buf()));
        }

        let candidates = list_candidates(gallery)?;
        tracing::debug!(
            gallery = %gallery.display(),
            candidates = candidates.len(),
            "scanning gallery"
        );

        let bound = self.verifier.bind(probe).map_err(|e| {
            tracing::warn!(probe = %probe.display(), error = %e, "probe unusable; every candidate fails");
            e.to_string()
        });

        let mut report = ScanReport::default();
        for candidate in &candidates {
            let outcome = self.process(&bound, candidate);
            if outcome.is_match() {
                report.matches.push(candidate.id.clone());
            }
            report.outcomes.push(outcome);
        }

        tracing::info!(
            gallery = %gallery.display(),
            scanned = report.outcomes.len(),
            matched = report.matches.len(),
            failed = report.failures(),
            "gallery scan finished"
        );
        Ok(report)
    }

    fn process(
        &self,
        bound: &Result<Box<dyn BoundProbe + '_>, String>,
        candidate: &CandidateImage,
    ) -> CandidateOutcome {
        let canonical = match self.locks.normalize(&candidate.path, self.size) {
            Ok(NormalizeOutcome::AlreadyCanonical) => CanonicalState::AlreadyCanonical,
            Ok(NormalizeOutcome::Resized { from: (width, height) }) => CanonicalState::Resized {
                from_width: width,
                from_height: height,
            },
            Err(e) => {
                tracing::warn!(candidate = %candidate.id, error = %e, "normalize failed; verifying unmodified");
                CanonicalState::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let result = match bound {
            Ok(bound) => bound.verify(&candidate.path).map_err(|e| e.to_string()),
            Err(reason) => Err(reason.clone()),
        };
        let verdict = match result {
            Ok(result) => {
                tracing::info!(
                    candidate = %candidate.id,
                    verified = result.verified,
                    distance = format_args!("{:.4}", result.distance),
                    "compared"
                );
                CandidateVerdict::Compared(result)
            }
            Err(reason) => {
                tracing::warn!(candidate = %candidate.id, error = %reason, "compare failed; skipping");
                CandidateVerdict::Failed { reason }
            }
        };

        CandidateOutcome {
            id: candidate.id.clone(),
            canonical,
            verdict,
        }
    }
}

/// Every entry of the gallery folder, sorted by file name.
///
/// Entries whose names are not valid UTF-8 are skipped: they cannot be
/// reported back as identifiers that name the same file.
fn list_candidates(gallery: &Path) -> Result<Vec<CandidateImage>, ScanError> {
    let entries = std::fs::read_dir(gallery).map_err(|source| ScanError::Io {
        path: gallery.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<CandidateImage> = entries
        .filter_map(|entry| {
            let entry = entry
                .map_err(|e| {
                    tracing::warn!(gallery = %gallery.display(), error = %e, "unreadable gallery entry");
                })
                .ok()?;
            match entry.file_name().into_string() {
                Ok(id) => Some(CandidateImage {
                    id,
                    path: entry.path(),
                }),
                Err(name) => {
                    tracing::warn!(gallery = %gallery.display(), name = ?name, "skipping entry with non UTF-8 name");
                    None
                }
            }
        })
        .collect();
    candidates.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_image, write_raw, ColorVerifier};

    fn scanner(verifier: &Arc<ColorVerifier>) -> GalleryScanner {
        GalleryScanner::new(verifier.clone(), CanonicalSize::default())
    }

    #[test]
    fn test_scan_match_nonmatch_corrupt() {
        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [200, 10, 10], 224);
        write_image(gallery.path(), "a.jpg", [200, 10, 10], 300);
        write_image(gallery.path(), "b.jpg", [10, 200, 10], 300);
        write_raw(gallery.path(), "c.jpg", b"not really a jpeg");

        let verifier = Arc::new(ColorVerifier::default());
        let report = scanner(&verifier).scan(&probe, gallery.path()).unwrap();

        assert_eq!(report.matches, vec!["a.jpg".to_string()]);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failures(), 1);
        assert_eq!(
            report.outcomes[0].canonical,
            CanonicalState::Resized { from_width: 300, from_height: 300 }
        );
        assert!(!report.outcomes[2].canonical.is_canonical());
        assert_eq!(verifier.calls(), 3);
    }

    #[test]
    fn test_scan_records_already_canonical_candidates() {
        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [9, 9, 9], 224);
        write_image(gallery.path(), "done.png", [9, 9, 9], 224);

        let verifier = Arc::new(ColorVerifier::default());
        let report = scanner(&verifier).scan(&probe, gallery.path()).unwrap();
        assert_eq!(report.outcomes[0].canonical, CanonicalState::AlreadyCanonical);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_skips_names_that_are_not_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [200, 10, 10], 224);
        write_image(gallery.path(), "plain.png", [200, 10, 10], 224);
        std::fs::write(
            gallery.path().join(OsStr::from_bytes(b"caf\xe9.png")),
            crate::testing::encode_png([200, 10, 10], 224),
        )
        .unwrap();

        let verifier = Arc::new(ColorVerifier::default());
        let report = scanner(&verifier).scan(&probe, gallery.path()).unwrap();

        assert_eq!(report.matches, vec!["plain.png"]);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(verifier.calls(), 1);
        assert!(report
            .matches
            .iter()
            .all(|m| gallery.path().join(m).is_file()));
    }

    #[test]
    fn test_scan_normalizes_candidates_in_place() {
        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [1, 2, 3], 224);
        let candidate = write_image(gallery.path(), "big.png", [1, 2, 3], 500);

        let verifier = Arc::new(ColorVerifier::default());
        scanner(&verifier).scan(&probe, gallery.path()).unwrap();

        let img = image::open(&candidate).unwrap();
        assert_eq!((img.width(), img.height()), (224, 224));
    }

    #[test]
    fn test_scan_preserves_name_order() {
        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [5, 5, 5], 224);
        for name in ["z.png", "m.png", "a.png"] {
            write_image(gallery.path(), name, [5, 5, 5], 224);
        }

        let verifier = Arc::new(ColorVerifier::default());
        let report = scanner(&verifier).scan(&probe, gallery.path()).unwrap();
        assert_eq!(report.matches, vec!["a.png", "m.png", "z.png"]);
    }

    #[test]
    fn test_scan_results_are_gallery_members() {
        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [7, 7, 7], 224);
        write_image(gallery.path(), "one.png", [7, 7, 7], 100);
        write_image(gallery.path(), "two.png", [8, 8, 8], 100);

        let verifier = Arc::new(ColorVerifier::default());
        let report = scanner(&verifier).scan(&probe, gallery.path()).unwrap();

        let members: Vec<String> = std::fs::read_dir(gallery.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(report.matches.iter().all(|m| members.contains(m)));
    }

    #[test]
    fn test_scan_empty_gallery() {
        let probe_dir = tempfile::tempdir().unwrap();
        let gallery = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [1, 1, 1], 224);

        let verifier = Arc::new(ColorVerifier::default());
        let report = scanner(&verifier).scan(&probe, gallery.path()).unwrap();
        assert!(report.matches.is_empty());
        assert!(report.outcomes.is_empty());
        assert_eq!(verifier.calls(), 0);
    }

    #[test]
    fn test_scan_missing_gallery_does_no_work() {
        let probe_dir = tempfile::tempdir().unwrap();
        let probe = write_image(probe_dir.path(), "probe.png", [1, 1, 1], 224);

        let verifier = Arc::new(ColorVerifier::default());
        let err = scanner(&verifier)
            .scan(&probe, &probe_dir.path().join("no-such-event"))
            .unwrap_err();
        assert!(matches!(err, ScanError::GalleryNotFound(_)));
        assert_eq!(verifier.calls(), 0);
    }

    #[test]
    fn test_normalize_locks_share_one_entry_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(dir.path(), "shared.png", [3, 3, 3], 64);
        let locks = Arc::new(NormalizeLocks::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let path = path.clone();
                std::thread::spawn(move || locks.normalize(&path, CanonicalSize::default()))
            })
            .collect();
        let outcomes: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let resized = outcomes
            .iter()
            .filter(|o| matches!(o, NormalizeOutcome::Resized { .. }))
            .count();
        assert_eq!(resized, 1);
        assert_eq!(locks.in_flight(), 0);
    }

    #[test]
    fn test_normalize_locks_forget_finished_files() {
        let dir = tempfile::tempdir().unwrap();
        let locks = NormalizeLocks::new();
        for (i, side) in [64, 224, 300].into_iter().enumerate() {
            let path = write_image(dir.path(), &format!("{i}.png"), [3, 3, 3], side);
            locks.normalize(&path, CanonicalSize::default()).unwrap();
        }
        assert!(locks.normalize(&dir.path().join("gone.png"), CanonicalSize::default()).is_err());
        assert_eq!(locks.in_flight(), 0);
    }
}
