//! Stub models and fixtures shared by unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use ndarray::Array4;
use tokio::sync::watch;

use crate::registry::{ModelLoader, SuperResModel};
use crate::tensor::ValueRange;
use crate::types::{EnhancementTier, SourceImage, CHANNELS};

/// Deterministic stand-in for a real model: nearest-neighbor upscale,
/// value-preserving (0-255 in, 0-255 out).
pub(crate) struct NearestNeighborModel {
    pub scale: u32,
    pub infer_count: Arc<AtomicU32>,
}

impl NearestNeighborModel {
    pub fn new(scale: u32) -> Self {
        Self {
            scale,
            infer_count: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl SuperResModel for NearestNeighborModel {
    fn scale(&self) -> u32 {
        self.scale
    }

    fn input_range(&self) -> ValueRange {
        ValueRange::Byte
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.infer_count.fetch_add(1, Ordering::SeqCst);
        let s = self.scale as usize;
        let (h, w) = (input.shape()[2], input.shape()[3]);
        let mut out = Array4::<f32>::zeros((1, 3, h * s, w * s));
        for c in 0..3 {
            for y in 0..h * s {
                for x in 0..w * s {
                    out[[0, c, y, x]] = input[[0, c, y / s, x / s]];
                }
            }
        }
        Ok(out)
    }
}

/// Fails the first `failures_remaining` inference calls, then behaves
/// like [`NearestNeighborModel`].
pub(crate) struct FlakyModel {
    pub inner: NearestNeighborModel,
    pub failures_remaining: u32,
}

impl SuperResModel for FlakyModel {
    fn scale(&self) -> u32 {
        self.inner.scale
    }

    fn input_range(&self) -> ValueRange {
        ValueRange::Byte
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            bail!("synthetic inference failure");
        }
        self.inner.infer(input)
    }
}

/// Every inference call fails.
pub(crate) struct AlwaysFailingModel {
    pub scale: u32,
    pub infer_count: Arc<AtomicU32>,
}

impl AlwaysFailingModel {
    pub fn new(scale: u32) -> Self {
        Self {
            scale,
            infer_count: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl SuperResModel for AlwaysFailingModel {
    fn scale(&self) -> u32 {
        self.scale
    }

    fn input_range(&self) -> ValueRange {
        ValueRange::Byte
    }

    fn infer(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
        self.infer_count.fetch_add(1, Ordering::SeqCst);
        bail!("synthetic inference failure");
    }
}

/// Requests cancellation through a watch channel once `cancel_after`
/// inference calls have completed.
pub(crate) struct CancellingModel {
    pub inner: NearestNeighborModel,
    pub cancel_after: u32,
    pub cancel_tx: watch::Sender<bool>,
}

impl SuperResModel for CancellingModel {
    fn scale(&self) -> u32 {
        self.inner.scale
    }

    fn input_range(&self) -> ValueRange {
        ValueRange::Byte
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let out = self.inner.infer(input)?;
        if self.inner.infer_count.load(Ordering::SeqCst) >= self.cancel_after {
            let _ = self.cancel_tx.send(true);
        }
        Ok(out)
    }
}

/// Loader producing [`NearestNeighborModel`]s, counting load and
/// inference calls across all handed-out models.
pub(crate) struct CountingLoader {
    pub load_count: Arc<AtomicU32>,
    pub infer_count: Arc<AtomicU32>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            load_count: Arc::new(AtomicU32::new(0)),
            infer_count: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self, tier: EnhancementTier) -> Result<Box<dyn SuperResModel>> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        let model = NearestNeighborModel {
            scale: tier.scale(),
            infer_count: self.infer_count.clone(),
        };
        Ok(Box::new(model))
    }
}

/// Loader that fails for one tier (or all of them).
pub(crate) struct FailingLoader {
    fail_tier: Option<EnhancementTier>,
}

impl FailingLoader {
    /// Fail only the given tier; load a working stub for the rest.
    pub fn fail_only(tier: EnhancementTier) -> Self {
        Self {
            fail_tier: Some(tier),
        }
    }

    /// Fail every tier.
    pub fn fail_all() -> Self {
        Self { fail_tier: None }
    }
}

impl ModelLoader for FailingLoader {
    fn load(&self, tier: EnhancementTier) -> Result<Box<dyn SuperResModel>> {
        match self.fail_tier {
            Some(fail_tier) if fail_tier != tier => {
                Ok(Box::new(NearestNeighborModel::new(tier.scale())))
            }
            _ => bail!("synthetic load failure for tier {tier}"),
        }
    }
}

/// Deterministic RGBA test image with a bright gradient (tensor means
/// stay well above 1.0, exercising the 0-255 detection branch).
pub(crate) fn gradient_image(width: u32, height: u32) -> SourceImage {
    let mut data = Vec::with_capacity((width * height) as usize * CHANNELS);
    for y in 0..height {
        for x in 0..width {
            let v = ((x * 7 + y * 13) % 200 + 40) as u8;
            data.extend_from_slice(&[v, v.wrapping_add(17), v.wrapping_add(51), 255]);
        }
    }
    SourceImage::new(data, width, height).expect("gradient buffer sized correctly")
}

/// Reference nearest-neighbor upscale of a full RGBA image, with alpha
/// forced opaque like the pipeline's tensor bridge.
pub(crate) fn nn_upscale_rgba(src: &SourceImage, scale: u32) -> Vec<u8> {
    let (w, h) = (src.width() as usize, src.height() as usize);
    let s = scale as usize;
    let data = src.data();
    let mut out = vec![255u8; w * s * h * s * CHANNELS];
    for y in 0..h * s {
        for x in 0..w * s {
            let sp = ((y / s) * w + x / s) * CHANNELS;
            let dp = (y * w * s + x) * CHANNELS;
            out[dp..dp + 3].copy_from_slice(&data[sp..sp + 3]);
        }
    }
    out
}
