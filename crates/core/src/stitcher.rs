//! Stitcher: copies each tile's valid output region into the assembled
//! output buffer.
//!
//! Pure row-by-row memory copy — no resampling, no blending. Padding
//! removal already guarantees the copied region contains no
//! edge-artifact pixels, so tile boundaries are seamless.

use anyhow::anyhow;

use crate::error::UpscaleError;
use crate::executor::TileResult;
use crate::planner::TileSpec;
use crate::types::{OutputImage, CHANNELS};

/// Copy the valid (unpadded) rectangle of `tile` into `output` at the
/// tile's destination offset. Offsets are pre-clamped by the planner;
/// a mismatch between buffers and spec is a pipeline bug, not a
/// recoverable condition.
pub fn write_tile(
    output: &mut OutputImage,
    tile: &TileResult,
    spec: &TileSpec,
    scale: u32,
) -> Result<(), UpscaleError> {
    let src_x0 = (spec.valid_in_x * scale) as usize;
    let src_y0 = (spec.valid_in_y * scale) as usize;
    let row_len = spec.out_w as usize * CHANNELS;

    let tile_w = tile.width as usize;
    let out_w = output.width() as usize;

    if spec.out_h == 0 || spec.out_w == 0 {
        return Ok(());
    }

    let src_end = ((src_y0 + spec.out_h as usize - 1) * tile_w + src_x0) * CHANNELS + row_len;
    let dst_end = (((spec.target_y + spec.out_h - 1) as usize) * out_w
        + spec.target_x as usize)
        * CHANNELS
        + row_len;
    if src_end > tile.data.len() || dst_end > output.data.len() {
        return Err(UpscaleError::Pipeline(anyhow!(
            "stitch window out of bounds for tile ({}, {}): src_end={src_end}/{}, dst_end={dst_end}/{}",
            spec.row,
            spec.col,
            tile.data.len(),
            output.data.len()
        )));
    }

    for row in 0..spec.out_h as usize {
        let src_off = ((src_y0 + row) * tile_w + src_x0) * CHANNELS;
        let dst_off =
            ((spec.target_y as usize + row) * out_w + spec.target_x as usize) * CHANNELS;
        output.data[dst_off..dst_off + row_len]
            .copy_from_slice(&tile.data[src_off..src_off + row_len]);
    }

    Ok(())
}
