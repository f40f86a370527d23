use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolution every image is brought to before verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSize {
    pub width: u32,
    pub height: u32,
}

impl CanonicalSize {
    pub const fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

impl Default for CanonicalSize {
    fn default() -> Self {
        Self::square(224)
    }
}

/// Face embedding vector (512-dimensional for Facenet512).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "facenet512").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).max(0.0)
    }
}

/// Outcome of comparing the probe against one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    /// Non-negative distance, lower = more similar.
    pub distance: f32,
}

/// One gallery entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateImage {
    /// File name inside the gallery folder.
    pub id: String,
    pub path: PathBuf,
}

/// Identifiers of verified candidates, in gallery enumeration order.
pub type MatchSet = Vec<String>;

/// What verification produced for a single candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateVerdict {
    Compared(VerificationResult),
    Failed { reason: String },
}

/// Where a candidate stood against the canonical size when it was verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CanonicalState {
    AlreadyCanonical,
    Resized { from_width: u32, from_height: u32 },
    /// Normalization failed; the candidate was verified unmodified.
    Failed { reason: String },
}

impl CanonicalState {
    pub fn is_canonical(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Per-candidate diagnostic record kept by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateOutcome {
    pub id: String,
    pub canonical: CanonicalState,
    pub verdict: CandidateVerdict,
}

impl CandidateOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self.verdict, CandidateVerdict::Compared(r) if r.verified)
    }
}

/// Result of scanning one gallery.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub matches: MatchSet,
    pub outcomes: Vec<CandidateOutcome>,
}

impl ScanReport {
    /// Number of candidates whose comparison failed outright.
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.verdict, CandidateVerdict::Failed { .. }))
            .count()
    }
}
