//! Pairwise face verification.

use crate::embedder::{EmbedError, EmbeddingExtractor};
use crate::types::{Embedding, VerificationResult};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Cosine distance at or below which Facenet512 embeddings are the same person.
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.30;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),
    #[error("verification unavailable: {0}")]
    Unavailable(String),
}

/// Judges whether two normalized images show the same face.
///
/// Calls block until the comparison is done. Implementations are shared
/// across requests, hence `Send + Sync`.
pub trait VerificationCapability: Send + Sync {
    fn verify(&self, probe: &Path, candidate: &Path) -> Result<VerificationResult, VerifyError>;

    /// Fix `probe` for a run of comparisons against many candidates.
    ///
    /// The default compares pair by pair. Embedding-backed implementations
    /// embed the probe once here.
    fn bind<'a>(&'a self, probe: &'a Path) -> Result<Box<dyn BoundProbe + 'a>, VerifyError> {
        Ok(Box::new(Pairwise {
            verifier: self,
            probe,
        }))
    }
}

/// A probe prepared by [`VerificationCapability::bind`].
pub trait BoundProbe {
    fn verify(&self, candidate: &Path) -> Result<VerificationResult, VerifyError>;
}

struct Pairwise<'a, V: ?Sized> {
    verifier: &'a V,
    probe: &'a Path,
}

impl<V: VerificationCapability + ?Sized> BoundProbe for Pairwise<'_, V> {
    fn verify(&self, candidate: &Path) -> Result<VerificationResult, VerifyError> {
        self.verifier.verify(self.probe, candidate)
    }
}

/// Threshold decision on the cosine distance of two embeddings.
pub fn decide(probe: &Embedding, candidate: &Embedding, threshold: f32) -> VerificationResult {
    let distance = probe.cosine_distance(candidate);
    VerificationResult {
        verified: distance <= threshold,
        distance,
    }
}

/// Verification on top of an in-process extractor, serialized by a mutex.
pub struct EmbeddingVerifier<E> {
    extractor: Mutex<E>,
    threshold: f32,
}

impl<E: EmbeddingExtractor> EmbeddingVerifier<E> {
    pub fn new(extractor: E, threshold: f32) -> Self {
        Self {
            extractor: Mutex::new(extractor),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl<E: EmbeddingExtractor> EmbeddingVerifier<E> {
    fn extract(&self, image: &Path) -> Result<Embedding, EmbedError> {
        self.extractor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extract(image)
    }
}

impl<E: EmbeddingExtractor> VerificationCapability for EmbeddingVerifier<E> {
    fn verify(&self, probe: &Path, candidate: &Path) -> Result<VerificationResult, VerifyError> {
        let probe = self.extract(probe)?;
        let candidate = self.extract(candidate)?;
        Ok(decide(&probe, &candidate, self.threshold))
    }

    fn bind<'a>(&'a self, probe: &'a Path) -> Result<Box<dyn BoundProbe + 'a>, VerifyError> {
        let embedding = self.extract(probe)?;
        Ok(Box::new(EmbeddedProbe {
            embedding,
            threshold: self.threshold,
            embed: move |candidate: &Path| self.extract(candidate).map_err(VerifyError::from),
        }))
    }
}

/// A probe embedding plus a way to embed candidates.
pub struct EmbeddedProbe<F> {
    pub embedding: Embedding,
    pub threshold: f32,
    pub embed: F,
}

impl<F> BoundProbe for EmbeddedProbe<F>
where
    F: Fn(&Path) -> Result<Embedding, VerifyError>,
{
    fn verify(&self, candidate: &Path) -> Result<VerificationResult, VerifyError> {
        let candidate = (self.embed)(candidate)?;
        Ok(decide(&self.embedding, &candidate, self.threshold))
    }
}
