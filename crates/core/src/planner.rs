//! Tile Planner: deterministic partition of a W x H source into a
//! row-major grid of padded tiles.
//!
//! Padding feeds the model context beyond a tile's own borders so seams
//! are suppressed; only the padding-free center of each tile's output is
//! kept. The union of all output rects tiles the upscaled canvas exactly,
//! with no gaps and no overlaps.

/// One grid cell. Created by [`plan`], consumed exactly once by the
/// executor and stitcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    pub row: u32,
    pub col: u32,

    /// Padded read window in source space, clamped to image bounds.
    pub read_x0: u32,
    pub read_y0: u32,
    pub read_x1: u32,
    pub read_y1: u32,

    /// Offset of the valid (unpadded) region within the read window.
    /// Nonzero only where padding was not clamped by an image edge.
    pub valid_in_x: u32,
    pub valid_in_y: u32,

    /// Valid region size in source space.
    pub valid_w: u32,
    pub valid_h: u32,

    /// Destination offset in output space (= cell origin x scale).
    pub target_x: u32,
    pub target_y: u32,

    /// Valid region size in output space (= valid size x scale).
    pub out_w: u32,
    pub out_h: u32,
}

impl TileSpec {
    pub fn read_w(&self) -> u32 {
        self.read_x1 - self.read_x0
    }

    pub fn read_h(&self) -> u32 {
        self.read_y1 - self.read_y0
    }
}

/// Partition a `width x height` image into padded tiles, row-major.
/// Deterministic for identical inputs.
pub fn plan(width: u32, height: u32, tile_size: u32, pad: u32, scale: u32) -> Vec<TileSpec> {
    if width == 0 || height == 0 || tile_size == 0 || scale == 0 {
        return Vec::new();
    }

    let cols = width.div_ceil(tile_size);
    let rows = height.div_ceil(tile_size);
    let mut tiles = Vec::with_capacity((rows * cols) as usize);

    for row in 0..rows {
        for col in 0..cols {
            let src_x = col * tile_size;
            let src_y = row * tile_size;
            let valid_w = tile_size.min(width - src_x);
            let valid_h = tile_size.min(height - src_y);

            let read_x0 = src_x.saturating_sub(pad);
            let read_y0 = src_y.saturating_sub(pad);
            let read_x1 = width.min(src_x + tile_size + pad);
            let read_y1 = height.min(src_y + tile_size + pad);

            // Degenerate window at an exact image boundary.
            if read_x1 <= read_x0 || read_y1 <= read_y0 {
                continue;
            }

            tiles.push(TileSpec {
                row,
                col,
                read_x0,
                read_y0,
                read_x1,
                read_y1,
                valid_in_x: src_x - read_x0,
                valid_in_y: src_y - read_y0,
                valid_w,
                valid_h,
                target_x: src_x * scale,
                target_y: src_y * scale,
                out_w: valid_w * scale,
                out_h: valid_h * scale,
            });
        }
    }

    tiles
}
