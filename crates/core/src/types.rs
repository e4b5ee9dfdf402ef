use serde::{Deserialize, Serialize};

use crate::error::UpscaleError;

/// Bytes per pixel: interleaved RGBA.
pub const CHANNELS: usize = 4;

/// Enhancement strength. Each tier is bound to a distinct model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnhancementTier {
    /// 2x upscale.
    Standard,
    /// 4x upscale.
    High,
}

impl EnhancementTier {
    pub fn scale(&self) -> u32 {
        match self {
            Self::Standard => 2,
            Self::High => 4,
        }
    }
}

impl std::fmt::Display for EnhancementTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "2x"),
            Self::High => write!(f, "4x"),
        }
    }
}

impl std::str::FromStr for EnhancementTier {
    type Err = UpscaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "2x" | "standard" => Ok(Self::Standard),
            "4x" | "high" => Ok(Self::High),
            other => Err(UpscaleError::UnknownTier(other.to_string())),
        }
    }
}

/// Immutable RGBA source pixel buffer. Owned by the caller, read-only
/// to the pipeline.
#[derive(Debug, Clone)]
pub struct SourceImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl SourceImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, UpscaleError> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(UpscaleError::Pipeline(anyhow::anyhow!(
                "source buffer length mismatch: expected {expected} ({width}x{height}x4), got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy the rectangle `[x0,x1) x [y0,y1)` into a contiguous RGBA buffer.
    /// Bounds must already be clamped to the image extent.
    pub fn extract_rect(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> Vec<u8> {
        debug_assert!(x1 <= self.width && y1 <= self.height && x0 <= x1 && y0 <= y1);
        let rect_w = (x1 - x0) as usize;
        let mut out = Vec::with_capacity(rect_w * (y1 - y0) as usize * CHANNELS);
        for y in y0..y1 {
            let row_start = (y as usize * self.width as usize + x0 as usize) * CHANNELS;
            out.extend_from_slice(&self.data[row_start..row_start + rect_w * CHANNELS]);
        }
        out
    }
}

/// Pre-allocated, zero-initialized RGBA destination buffer. Mutated in
/// place tile by tile; every pixel is written exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputImage {
    pub(crate) data: Vec<u8>,
    width: u32,
    height: u32,
}

impl OutputImage {
    /// Allocation is checked so an oversized output surfaces as
    /// [`UpscaleError::BufferAllocation`] with the attempted dimensions
    /// instead of aborting the process.
    pub fn allocate(width: u32, height: u32) -> Result<Self, UpscaleError> {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(CHANNELS))
            .ok_or(UpscaleError::BufferAllocation {
                out_w: width,
                out_h: height,
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| UpscaleError::BufferAllocation {
                out_w: width,
                out_h: height,
            })?;
        data.resize(len, 0);

        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }
}

/// Informational progress report. Never required for correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 0..=100.
    pub percent: u8,
    pub message: String,
}
