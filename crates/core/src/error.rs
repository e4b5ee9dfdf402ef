//! Error taxonomy for the upscale pipeline.
//!
//! Internal tensor/model errors are caught at the executor boundary and
//! re-thrown with tile coordinates attached; the worker catches everything
//! else and reports a single terminal failure per operation.

use thiserror::Error;

use crate::types::EnhancementTier;

#[derive(Debug, Error)]
pub enum UpscaleError {
    /// Backend or model initialization failed. Fatal to the requested
    /// operation; never silently falls back to a different tier.
    #[error("failed to load {tier} model: {reason}")]
    ModelLoad {
        tier: EnhancementTier,
        reason: String,
    },

    /// A single tile's model call failed after all allowed attempts.
    /// The input numeric range is captured for diagnostics.
    #[error(
        "inference failed for tile ({row}, {col}) after {attempts} attempt(s): {message} \
         (input range {input_min}..{input_max})"
    )]
    TileInference {
        row: u32,
        col: u32,
        attempts: u32,
        message: String,
        input_min: f32,
        input_max: f32,
    },

    /// Output buffer too large for available memory. The attempted
    /// dimensions let the host suggest a smaller source image.
    #[error("cannot allocate {out_w}x{out_h} RGBA output buffer")]
    BufferAllocation { out_w: u32, out_h: u32 },

    /// Cancellation was requested; no further tile inference was issued.
    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown enhancement tier: {0:?} (expected \"2x\" or \"4x\")")]
    UnknownTier(String),

    /// Anything else that ends the operation.
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}
