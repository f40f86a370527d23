//! End-to-end match request: validate, scan, notify.
//!
//! Only precondition failures reject a request. Everything after the
//! preconditions degrades: a bad candidate is skipped, and a failed
//! composition or dispatch is logged while the match list is still returned.

use crate::normalizer;
use crate::notify::{NotificationComposer, NotificationDispatcher};
use crate::probe::ProbeImage;
use crate::scanner::{GalleryScanner, ScanError};
use crate::types::MatchSet;
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreconditionError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid gallery identifier: {0:?}")]
    InvalidGallery(String),
    #[error("gallery '{0}' not found")]
    GalleryNotFound(String),
    #[error("cannot store probe image: {0}")]
    ProbeStorage(#[source] std::io::Error),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Pipeline stages, in order. `Failed` is only entered from validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReceivingInput,
    ValidatingPreconditions,
    Scanning,
    Composing,
    Dispatching,
    Responding,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ReceivingInput => "receiving_input",
            Stage::ValidatingPreconditions => "validating_preconditions",
            Stage::Scanning => "scanning",
            Stage::Composing => "composing",
            Stage::Dispatching => "dispatching",
            Stage::Responding => "responding",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Raw request fields as received; any of them may be absent.
#[derive(Debug, Clone, Default)]
pub struct MatchRequest {
    pub probe: Option<Vec<u8>>,
    pub gallery: Option<String>,
    pub destination: Option<String>,
}

/// What happened to the notification for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum NotificationStatus {
    NoMatches,
    Sent { attachments: usize },
    CompositionFailed(String),
    DispatchFailed(String),
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub matches: MatchSet,
    pub notification: NotificationStatus,
    pub elapsed: Duration,
}

struct ValidRequest {
    probe: Vec<u8>,
    gallery_dir: PathBuf,
    destination: String,
}

/// Owns every collaborator a match request needs.
pub struct MatchPipeline {
    scanner: GalleryScanner,
    composer: NotificationComposer,
    dispatcher: Arc<dyn NotificationDispatcher>,
    gallery_root: PathBuf,
    temp_dir: PathBuf,
}

impl MatchPipeline {
    pub fn new(
        scanner: GalleryScanner,
        composer: NotificationComposer,
        dispatcher: Arc<dyn NotificationDispatcher>,
        gallery_root: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scanner,
            composer,
            dispatcher,
            gallery_root: gallery_root.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn gallery_root(&self) -> &Path {
        &self.gallery_root
    }

    /// Run one request to completion.
    pub fn run(&self, request: MatchRequest) -> Result<MatchOutcome, PreconditionError> {
        let started = Instant::now();
        tracing::debug!(stage = %Stage::ReceivingInput, "match request received");

        let valid = self.validate(request).map_err(|e| {
            tracing::warn!(stage = %Stage::Failed, error = %e, "match request rejected");
            e
        })?;

        tracing::debug!(stage = %Stage::Scanning, gallery = %valid.gallery_dir.display());
        // The probe lives only for this block and is removed on drop, however
        // the scan ends.
        let matches = {
            let probe = ProbeImage::store(&self.temp_dir, &valid.probe)
                .map_err(PreconditionError::ProbeStorage)?;
            if let Err(e) = normalizer::normalize(probe.path(), self.scanner.canonical_size()) {
                tracing::warn!(error = %e, "probe normalize failed; using it unmodified");
            }
            self.scanner.scan(probe.path(), &valid.gallery_dir)?.matches
        };

        let notification = self.notify(&matches, &valid.destination, &valid.gallery_dir);

        let elapsed = started.elapsed();
        tracing::info!(
            stage = %Stage::Responding,
            matches = matches.len(),
            notification = ?notification,
            elapsed_secs = format_args!("{:.2}", elapsed.as_secs_f64()),
            "match completed"
        );

        Ok(MatchOutcome {
            matches,
            notification,
            elapsed,
        })
    }

    fn validate(&self, request: MatchRequest) -> Result<ValidRequest, PreconditionError> {
        tracing::debug!(stage = %Stage::ValidatingPreconditions);

        let probe = request
            .probe
            .filter(|bytes| !bytes.is_empty())
            .ok_or(PreconditionError::MissingField("guestPhoto"))?;
        let gallery = non_blank(request.gallery).ok_or(PreconditionError::MissingField("eventFolder"))?;
        let destination = non_blank(request.destination).ok_or(PreconditionError::MissingField("email"))?;

        if !is_single_component(&gallery) {
            return Err(PreconditionError::InvalidGallery(gallery));
        }
        let gallery_dir = self.gallery_root.join(&gallery);
        if !gallery_dir.is_dir() {
            return Err(PreconditionError::GalleryNotFound(gallery));
        }

        Ok(ValidRequest {
            probe,
            gallery_dir,
            destination,
        })
    }

    fn notify(&self, matches: &[String], destination: &str, gallery_dir: &Path) -> NotificationStatus {
        tracing::debug!(stage = %Stage::Composing);
        let payload = match self.composer.compose(matches, destination, gallery_dir) {
            Ok(Some(payload)) => payload,
            Ok(None) => return NotificationStatus::NoMatches,
            Err(e) => {
                tracing::error!(to = destination, error = %e, "notification dropped");
                return NotificationStatus::CompositionFailed(e.to_string());
            }
        };

        tracing::debug!(stage = %Stage::Dispatching);
        match self.dispatcher.dispatch(&payload) {
            Ok(()) => {
                tracing::info!(to = destination, attachments = payload.attachments.len(), "notification sent");
                NotificationStatus::Sent {
                    attachments: payload.attachments.len(),
                }
            }
            Err(e) => {
                tracing::error!(to = destination, error = %e, "notification dispatch failed");
                NotificationStatus::DispatchFailed(e.to_string())
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// True for a plain folder name: no separators, no `.`/`..`, not absolute.
fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
