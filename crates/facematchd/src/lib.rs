//! facematchd: HTTP daemon around the facematch pipeline.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod mailer;

pub use api::{build_router, AppState};
pub use config::Config;

use facematch_core::{
    CanonicalSize, GalleryScanner, MatchPipeline, NotificationComposer, NotificationDispatcher,
    VerificationCapability,
};
use std::sync::Arc;

/// Wire the pipeline from configuration and already-built collaborators.
///
/// Without a configured sender the composer falls back to the SMTP user, and
/// failing that to an empty address that dispatch will reject.
pub fn build_pipeline(
    config: &Config,
    verifier: Arc<dyn VerificationCapability>,
    dispatcher: Arc<dyn NotificationDispatcher>,
) -> MatchPipeline {
    let scanner = GalleryScanner::new(verifier, CanonicalSize::square(config.canonical_size));
    let composer = NotificationComposer::new(config.sender.clone().unwrap_or_default());
    MatchPipeline::new(
        scanner,
        composer,
        dispatcher,
        &config.gallery_root,
        &config.temp_dir,
    )
}
