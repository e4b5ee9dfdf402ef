//! Tensor Bridge: RGBA pixel buffers <-> NCHW `[1,3,H,W]` f32 tensors.
//!
//! Owns the normalization policy (0-255 integer vs 0-1 float) and the
//! output range auto-detection that prevents a black or blown-out image
//! when the model returns the other convention. All intermediate arrays
//! are plain owned values dropped at scope end.

use anyhow::{bail, Result};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::CHANNELS;

/// Value range a model expects on its input tensor.
/// ESRGAN-family weights take 0-255, most other upscalers take 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueRange {
    /// `[0.0, 1.0]` float convention.
    Unit,
    /// `[0.0, 255.0]` integer convention.
    Byte,
}

/// Tensor means inside this band make the output range heuristic
/// unreliable; they are logged, not fatal.
pub const RANGE_AMBIGUITY_BAND: (f32, f32) = (0.75, 1.25);

/// Convert interleaved RGBA bytes to an NCHW `[1,3,H,W]` tensor in the
/// model's expected range. Alpha is dropped; the model consumes RGB only.
pub fn to_tensor(rgba: &[u8], width: usize, height: usize, range: ValueRange) -> Result<Array4<f32>> {
    let expected = width * height * CHANNELS;
    if rgba.len() != expected {
        bail!(
            "pixel buffer length mismatch: expected {expected} ({width}x{height}x4), got {}",
            rgba.len()
        );
    }

    let mut nchw = Array4::<f32>::zeros((1, 3, height, width));
    let slice = nchw
        .as_slice_mut()
        .expect("freshly allocated NCHW array is contiguous");
    let hw = height * width;

    let divisor = match range {
        ValueRange::Unit => 255.0,
        ValueRange::Byte => 1.0,
    };

    for y in 0..height {
        for x in 0..width {
            let src = (y * width + x) * CHANNELS;
            let px = y * width + x;
            slice[px] = rgba[src] as f32 / divisor;
            slice[hw + px] = rgba[src + 1] as f32 / divisor;
            slice[2 * hw + px] = rgba[src + 2] as f32 / divisor;
        }
    }

    Ok(nchw)
}

/// Convert a model output tensor back to interleaved RGBA bytes in
/// `[0,255]`, with alpha forced opaque.
///
/// Range auto-detection: if the tensor mean exceeds 1.0 the values are
/// treated as already being 0-255 and clamp-cast directly; otherwise
/// they are clamped to `[0,1]` and scaled by 255. The model may return
/// either convention depending on its internal configuration, and
/// guessing wrong is the classic black-image failure.
pub fn from_tensor(arr: &Array4<f32>) -> Result<Vec<u8>> {
    let shape = arr.shape();
    if shape[0] != 1 || shape[1] != 3 {
        bail!("expected [1,3,H,W] tensor, got {shape:?}");
    }
    let height = shape[2];
    let width = shape[3];
    let hw = height * width;

    let owned_contig;
    let slice = if let Some(s) = arr.as_slice() {
        s
    } else {
        owned_contig = arr.as_standard_layout().into_owned();
        owned_contig.as_slice().expect("standard layout is contiguous")
    };

    let mean = slice.iter().sum::<f32>() / slice.len().max(1) as f32;
    if mean > RANGE_AMBIGUITY_BAND.0 && mean < RANGE_AMBIGUITY_BAND.1 {
        warn!(
            mean,
            "tensor mean is near the range-detection threshold; output range guess may be wrong"
        );
    }
    let byte_range = mean > 1.0;

    let mut rgba = vec![255u8; hw * CHANNELS];
    for i in 0..hw {
        let (r, g, b) = if byte_range {
            (
                slice[i].clamp(0.0, 255.0),
                slice[hw + i].clamp(0.0, 255.0),
                slice[2 * hw + i].clamp(0.0, 255.0),
            )
        } else {
            (
                slice[i].clamp(0.0, 1.0) * 255.0,
                slice[hw + i].clamp(0.0, 1.0) * 255.0,
                slice[2 * hw + i].clamp(0.0, 1.0) * 255.0,
            )
        };
        let dst = i * CHANNELS;
        rgba[dst] = r as u8;
        rgba[dst + 1] = g as u8;
        rgba[dst + 2] = b as u8;
    }

    Ok(rgba)
}

/// Min/max of a tensor, captured for tile failure diagnostics.
pub fn value_extent(arr: &Array4<f32>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in arr.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}
