//! Tile Executor: padded slice -> tensor -> model -> pixels, with
//! bounded retries.
//!
//! The model is invoked raw (no internal tiling or padding); the
//! read-window already carries the spatial context the model needs.

use std::time::Duration;

use tracing::warn;

use crate::error::UpscaleError;
use crate::planner::TileSpec;
use crate::registry::SuperResModel;
use crate::tensor::{from_tensor, to_tensor, value_extent};
use crate::types::SourceImage;

/// Upscaled pixels for one tile's full read window. Transient: the valid
/// region is copied out by the stitcher and the rest is discarded.
#[derive(Debug)]
pub struct TileResult {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Bounded retry with linear backoff for individual tile inferences.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Run the model over one tile's padded read window.
///
/// On failure the tile's input numeric range is captured for diagnostics
/// and the error carries the grid coordinates. Retries are bounded; an
/// exhausted tile fails the whole operation rather than leaving a hole.
pub async fn execute_tile(
    spec: &TileSpec,
    source: &SourceImage,
    model: &mut dyn SuperResModel,
    retry: &RetryPolicy,
) -> Result<TileResult, UpscaleError> {
    let read_w = spec.read_w() as usize;
    let read_h = spec.read_h() as usize;
    let scale = model.scale();

    let input = {
        let rgba = source.extract_rect(spec.read_x0, spec.read_y0, spec.read_x1, spec.read_y1);
        to_tensor(&rgba, read_w, read_h, model.input_range())?
    };
    let (input_min, input_max) = value_extent(&input);

    let mut failed_attempts = 0u32;
    let output = loop {
        match model.infer(&input) {
            Ok(output) => break output,
            Err(error) => {
                failed_attempts += 1;
                if failed_attempts > retry.max_retries {
                    return Err(UpscaleError::TileInference {
                        row: spec.row,
                        col: spec.col,
                        attempts: failed_attempts,
                        message: format!("{error:#}"),
                        input_min,
                        input_max,
                    });
                }
                warn!(
                    row = spec.row,
                    col = spec.col,
                    attempt = failed_attempts,
                    error = %error,
                    "Tile inference failed; retrying"
                );
                tokio::time::sleep(retry.backoff * failed_attempts).await;
            }
        }
    };
    // Input tensor is no longer needed; free it before decoding the output.
    drop(input);

    let expected_h = read_h * scale as usize;
    let expected_w = read_w * scale as usize;
    let shape = output.shape();
    if shape[2] != expected_h || shape[3] != expected_w {
        return Err(UpscaleError::TileInference {
            row: spec.row,
            col: spec.col,
            attempts: failed_attempts + 1,
            message: format!(
                "unexpected output shape {shape:?}, expected [1,3,{expected_h},{expected_w}]"
            ),
            input_min,
            input_max,
        });
    }

    let data = from_tensor(&output)?;
    Ok(TileResult {
        data,
        width: spec.read_w() * scale,
        height: spec.read_h() * scale,
    })
}
