use facematch_core::embedder::{EmbedError, EmbeddingExtractor, FaceEmbedder};
use facematch_core::verifier::{self, BoundProbe, EmbeddedProbe, VerificationCapability, VerifyError};
use facematch_core::{Embedding, VerificationResult};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedder error: {0}")]
    Embed(#[from] EmbedError),
    #[error("cannot spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from scan threads to the engine thread.
enum EngineRequest {
    Embed {
        image: PathBuf,
        reply: oneshot::Sender<Result<Embedding, EmbedError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every call blocks the calling thread until the engine replies, so it must
/// not be used from inside an async task; the HTTP layer runs scans on the
/// blocking pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    threshold: f32,
}

impl EngineHandle {
    /// Request one embedding from the engine thread.
    pub fn embed(&self, image: &Path) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(EngineRequest::Embed {
                image: image.to_path_buf(),
                reply: reply_tx,
            })
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.blocking_recv().map_err(|_| EngineError::ChannelClosed)??)
    }
}

impl VerificationCapability for EngineHandle {
    fn verify(&self, probe: &Path, candidate: &Path) -> Result<VerificationResult, VerifyError> {
        let probe = self.embed(probe).map_err(into_verify_error)?;
        let candidate = self.embed(candidate).map_err(into_verify_error)?;
        Ok(verifier::decide(&probe, &candidate, self.threshold))
    }

    fn bind<'a>(&'a self, probe: &'a Path) -> Result<Box<dyn BoundProbe + 'a>, VerifyError> {
        let embedding = self.embed(probe).map_err(into_verify_error)?;
        Ok(Box::new(EmbeddedProbe {
            embedding,
            threshold: self.threshold,
            embed: move |candidate: &Path| self.embed(candidate).map_err(into_verify_error),
        }))
    }
}

fn into_verify_error(err: EngineError) -> VerifyError {
    match err {
        EngineError::Embed(e) => VerifyError::Embedding(e),
        other => VerifyError::Unavailable(other.to_string()),
    }
}

/// Load the Facenet512 model and spawn the engine on a dedicated OS thread.
///
/// Fails fast at startup if the model is unavailable.
pub fn spawn_engine(model_path: &str, threshold: f32) -> Result<EngineHandle, EngineError> {
    let embedder = FaceEmbedder::load(model_path)?;
    tracing::info!(path = model_path, threshold, "Facenet512 embedder loaded");
    spawn_engine_with(embedder, threshold)
}

/// Spawn the engine thread around any extractor.
pub fn spawn_engine_with<E>(mut extractor: E, threshold: f32) -> Result<EngineHandle, EngineError>
where
    E: EmbeddingExtractor + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { image, reply } => {
                        let result = extractor.extract(&image);
                        if let Err(e) = &result {
                            tracing::debug!(image = %image.display(), error = %e, "embed failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, threshold })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Embeds a file as a one-hot vector chosen by its length.
    #[derive(Default)]
    struct LengthExtractor {
        extracted: Arc<AtomicUsize>,
    }

    impl EmbeddingExtractor for LengthExtractor {
        fn extract(&mut self, image_path: &Path) -> Result<Embedding, EmbedError> {
            self.extracted.fetch_add(1, Ordering::SeqCst);
            let len = std::fs::metadata(image_path)
                .map_err(|e| EmbedError::Image {
                    path: image_path.display().to_string(),
                    reason: e.to_string(),
                })?
                .len() as usize;
            let mut values = vec![0.0; 8];
            values[len % 8] = 1.0;
            Ok(Embedding { values, model_version: None })
        }
    }

    #[test]
    fn test_engine_verifies_through_thread() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe");
        let same = dir.path().join("same");
        let other = dir.path().join("other");
        std::fs::write(&probe, b"abc").unwrap();
        std::fs::write(&same, b"xyz").unwrap();
        std::fs::write(&other, b"wxyz").unwrap();

        let engine = spawn_engine_with(LengthExtractor::default(), 0.30).unwrap();
        assert!(engine.verify(&probe, &same).unwrap().verified);
        let result = engine.verify(&probe, &other).unwrap();
        assert!(!result.verified);
        assert!((result.distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_engine_reports_embed_errors() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe");
        std::fs::write(&probe, b"abc").unwrap();

        let engine = spawn_engine_with(LengthExtractor::default(), 0.30).unwrap();
        let err = engine.verify(&probe, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, VerifyError::Embedding(EmbedError::Image { .. })));
    }

    #[test]
    fn test_bound_probe_embeds_probe_once() {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe");
        std::fs::write(&probe, b"abc").unwrap();
        let candidates: Vec<_> = ["x", "yy", "zzz"]
            .iter()
            .map(|body| {
                let path = dir.path().join(body);
                std::fs::write(&path, body).unwrap();
                path
            })
            .collect();

        let extractor = LengthExtractor::default();
        let extracted = extractor.extracted.clone();
        let engine = spawn_engine_with(extractor, 0.30).unwrap();

        let bound = engine.bind(&probe).unwrap();
        let verdicts: Vec<bool> = candidates
            .iter()
            .map(|c| bound.verify(c).unwrap().verified)
            .collect();

        assert_eq!(verdicts, vec![false, false, true]);
        assert_eq!(extracted.load(Ordering::SeqCst), candidates.len() + 1);
    }

    #[test]
    fn test_spawn_engine_missing_model() {
        let result = spawn_engine("/nonexistent/facenet512.onnx", 0.30);
        assert!(matches!(result, Err(EngineError::Embed(EmbedError::ModelNotFound(_)))));
    }
}
