//! Facenet512 face embedder via ONNX Runtime.
//!
//! Embeds a whole (already canonical-size) image. There is no detection or
//! alignment step: the portrait and the gallery photos are compared as they
//! are, the same way a verifier that does not enforce detection would.

use crate::types::Embedding;
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FACENET_INPUT_SIZE: usize = 160;
// Facenet512 takes [0, 1] RGB input, NHWC.
const FACENET_MEAN: f32 = 0.0;
const FACENET_STD: f32 = 255.0;
const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "facenet512";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model file not found: {0} (export Facenet512 to ONNX and set FACEMATCH_MODEL_PATH)")]
    ModelNotFound(String),
    #[error("cannot load image {path}: {reason}")]
    Image { path: String, reason: String },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns an image file into an embedding.
///
/// Implementations may hold mutable inference state, so callers serialize
/// access (a mutex, or a dedicated engine thread).
pub trait EmbeddingExtractor: Send {
    fn extract(&mut self, image_path: &Path) -> Result<Embedding, EmbedError>;
}

/// Facenet512-based embedder.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the Facenet512 ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded Facenet512 model"
        );

        Ok(Self { session })
    }

    /// Decode an image file and bring it to the network input size.
    fn load_rgb(image_path: &Path) -> Result<RgbImage, EmbedError> {
        let image_err = |reason: String| EmbedError::Image {
            path: image_path.display().to_string(),
            reason,
        };
        let img = ImageReader::open(image_path)
            .map_err(|e| image_err(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| image_err(e.to_string()))?
            .decode()
            .map_err(|e| image_err(e.to_string()))?;

        let size = FACENET_INPUT_SIZE as u32;
        Ok(image::imageops::resize(
            &img.to_rgb8(),
            size,
            size,
            FilterType::Triangle,
        ))
    }

    /// Convert an input-size RGB image into a NHWC float tensor.
    fn preprocess(rgb: &RgbImage) -> Array4<f32> {
        let size = FACENET_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= size || y >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, y, x, c]] = (pixel[c] as f32 - FACENET_MEAN) / FACENET_STD;
            }
        }

        tensor
    }
}

impl EmbeddingExtractor for FaceEmbedder {
    fn extract(&mut self, image_path: &Path) -> Result<Embedding, EmbedError> {
        let rgb = Self::load_rgb(image_path)?;
        let input = Self::preprocess(&rgb);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != FACENET_EMBEDDING_DIM {
            return Err(EmbedError::InferenceFailed(format!(
                "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize the embedding
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(FACENET_MODEL_VERSION.to_string()),
        })
    }
}
