//! facematch-core: match a portrait against an event gallery.
//!
//! Normalizes images to a canonical size, verifies the probe against every
//! gallery entry through an injected [`VerificationCapability`], and composes
//! an email payload with the matching photos inlined.

pub mod embedder;
pub mod normalizer;
pub mod notify;
pub mod pipeline;
pub mod probe;
pub mod scanner;
pub mod types;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

pub use embedder::{EmbedError, EmbeddingExtractor, FaceEmbedder};
pub use notify::{
    DispatchError, InlineImage, NotificationComposer, NotificationDispatcher, NotificationPayload,
};
pub use pipeline::{MatchOutcome, MatchPipeline, MatchRequest, NotificationStatus, PreconditionError};
pub use scanner::{GalleryScanner, NormalizeLocks, ScanError};
pub use types::{
    CandidateOutcome, CanonicalSize, CanonicalState, Embedding, MatchSet, ScanReport,
    VerificationResult,
};
pub use verifier::{BoundProbe, EmbeddingVerifier, VerificationCapability, VerifyError};
