use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default bound on how long a single decode may take
pub const DEFAULT_DECODE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Rectangle in pixel coordinates of the image it was measured on
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Area shared with `other`, zero when the rectangles do not touch
    pub fn intersection_area(&self, other: &Roi) -> u64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return 0;
        }
        (x2 - x1) as u64 * (y2 - y1) as u64
    }

    /// Intersection over union, in [0, 1]
    pub fn iou(&self, other: &Roi) -> f64 {
        let intersection = self.intersection_area(other);
        if intersection == 0 {
            return 0.0;
        }
        let union = self.area() + other.area() - intersection;
        intersection as f64 / union as f64
    }

    /// Shrink every side by `fraction` of the corresponding dimension.
    pub fn inset(&self, fraction: f64) -> Roi {
        let dx = (self.width as f64 * fraction).round() as u32;
        let dy = (self.height as f64 * fraction).round() as u32;
        Roi {
            x: self.x.saturating_add(dx.min(self.width / 2)),
            y: self.y.saturating_add(dy.min(self.height / 2)),
            width: self.width.saturating_sub(dx.saturating_mul(2)),
            height: self.height.saturating_sub(dy.saturating_mul(2)),
            label: self.label.clone(),
        }
    }

    /// Clamp to the bounds of a `width`×`height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Roi {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Roi {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
            label: self.label.clone(),
        }
    }
}

/// Crop a region from a frame. Returns `None` when the clamped region has no area.
pub fn crop_roi(frame: &RgbaImage, roi: &Roi) -> Option<RgbaImage> {
    let clamped = roi.clamp_to(frame.width(), frame.height());
    if clamped.is_empty() {
        return None;
    }
    Some(
        image::imageops::crop_imm(frame, clamped.x, clamped.y, clamped.width, clamped.height)
            .to_image(),
    )
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("image decode timed out after {0:?}")]
    Timeout(Duration),
    #[error("image has no pixels")]
    EmptyImage,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decode task failed: {0}")]
    TaskFailed(String),
}

/// Decodes opaque image bytes into an RGBA buffer with a bounded wait.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    timeout: Duration,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DECODE_TIMEOUT)
    }
}

impl ImageDecoder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Decode on a blocking thread. Fails with `Timeout` instead of hanging.
    pub async fn decode(&self, bytes: Arc<[u8]>) -> Result<RgbaImage, CaptureError> {
        let task = tokio::task::spawn_blocking(move || decode_rgba(&bytes));
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CaptureError::TaskFailed(e.to_string())),
            Err(_) => {
                warn!("Image decode exceeded {:?}", self.timeout);
                Err(CaptureError::Timeout(self.timeout))
            }
        }
    }

    pub async fn decode_file(&self, path: &Path) -> Result<RgbaImage, CaptureError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| CaptureError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.decode(Arc::from(bytes)).await
    }
}

/// Synchronous decode of any format the `image` crate understands.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::EmptyImage);
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| CaptureError::Decode(e.to_string()))?
        .to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(CaptureError::EmptyImage);
    }
    debug!("Decoded {}x{} image ({} bytes)", img.width(), img.height(), bytes.len());
    Ok(img)
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(buf)
}
