//! Test doubles shared by the scanner and pipeline tests.

use crate::embedder::EmbedError;
use crate::notify::{DispatchError, NotificationDispatcher, NotificationPayload};
use crate::types::VerificationResult;
use crate::verifier::{VerificationCapability, VerifyError};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Treats two images as the same face when their mean colors are close.
#[derive(Default)]
pub(crate) struct ColorVerifier {
    calls: AtomicUsize,
}

impl ColorVerifier {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn mean_color(path: &Path) -> Result<[f32; 3], VerifyError> {
    let img = image::open(path)
        .map_err(|e| EmbedError::Image {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
        .to_rgb8();
    let mut sum = [0f32; 3];
    for pixel in img.pixels() {
        for c in 0..3 {
            sum[c] += pixel[c] as f32;
        }
    }
    let n = (img.width() * img.height()).max(1) as f32;
    Ok(sum.map(|s| s / n))
}

impl VerificationCapability for ColorVerifier {
    fn verify(&self, probe: &Path, candidate: &Path) -> Result<VerificationResult, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let a = mean_color(probe)?;
        let b = mean_color(candidate)?;
        let distance = (0..3).map(|c| (a[c] - b[c]).abs()).fold(0.0, f32::max) / 255.0;
        Ok(VerificationResult {
            verified: distance <= 16.0 / 255.0,
            distance,
        })
    }
}

/// Records every payload; optionally fails each dispatch.
#[derive(Default)]
pub(crate) struct RecordingDispatcher {
    pub(crate) sent: Mutex<Vec<NotificationPayload>>,
    pub(crate) fail: bool,
}

impl RecordingDispatcher {
    pub(crate) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub(crate) fn sent(&self) -> Vec<NotificationPayload> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn dispatch(&self, payload: &NotificationPayload) -> Result<(), DispatchError> {
        self.sent.lock().unwrap().push(payload.clone());
        if self.fail {
            return Err(DispatchError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

/// Solid-color square image; the encoding follows the file extension.
pub(crate) fn write_image(dir: &Path, name: &str, rgb: [u8; 3], side: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(side, side, Rgb(rgb)).save(&path).unwrap();
    path
}

pub(crate) fn write_raw(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub(crate) fn encode_png(rgb: [u8; 3], side: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(side, side, Rgb(rgb))
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
