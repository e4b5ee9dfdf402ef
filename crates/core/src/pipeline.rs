//! End-to-end upscale orchestration: plan, execute sequentially, stitch.
//!
//! Tiles run one at a time so peak memory stays at roughly one padded
//! tile's tensors plus the output buffer. Between tiles the task yields
//! to the runtime, which keeps the host responsive and gives the
//! cancellation flag a chance to be observed.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::UpscaleError;
use crate::executor::{execute_tile, RetryPolicy};
use crate::planner::plan;
use crate::registry::SuperResModel;
use crate::stitcher::write_tile;
use crate::types::{OutputImage, ProgressEvent, SourceImage};

/// Tuning knobs for one upscale run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Valid (unpadded) tile edge in source pixels.
    pub tile_size: u32,
    /// Context pixels read beyond each tile edge, clamped at the image
    /// border. Discarded from the output.
    pub pad: u32,
    pub retry: RetryPolicy,
    /// Extra pause between tiles. Zero means a bare cooperative yield.
    pub inter_tile_pause: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            tile_size: 64,
            pad: 16,
            retry: RetryPolicy::default(),
            inter_tile_pause: Duration::ZERO,
        }
    }
}

/// Upscale `source` through `model`, reporting progress and honoring
/// cancellation between tiles.
///
/// The output is deterministic for a given source, model, and tile
/// geometry. Progress events are advisory; a dropped receiver never
/// fails the run. Cancellation is cooperative: the flag is checked
/// before each tile, so at most the in-flight tile completes after the
/// request.
pub async fn run_upscale(
    source: &SourceImage,
    model: &mut dyn SuperResModel,
    options: &PipelineOptions,
    progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
    cancel: &watch::Receiver<bool>,
) -> Result<OutputImage, UpscaleError> {
    let scale = model.scale();
    let out_w = source
        .width()
        .checked_mul(scale)
        .ok_or(UpscaleError::BufferAllocation {
            out_w: u32::MAX,
            out_h: source.height(),
        })?;
    let out_h = source
        .height()
        .checked_mul(scale)
        .ok_or(UpscaleError::BufferAllocation {
            out_w,
            out_h: u32::MAX,
        })?;

    let tiles = plan(
        source.width(),
        source.height(),
        options.tile_size,
        options.pad,
        scale,
    );
    let total = tiles.len();
    info!(
        width = source.width(),
        height = source.height(),
        out_w,
        out_h,
        scale,
        tile_size = options.tile_size,
        pad = options.pad,
        tiles = total,
        "Starting tiled upscale"
    );

    let mut output = OutputImage::allocate(out_w, out_h)?;

    for (done, spec) in tiles.iter().enumerate() {
        if *cancel.borrow() {
            info!(completed = done, total, "Upscale cancelled");
            return Err(UpscaleError::Cancelled);
        }

        let tile = execute_tile(spec, source, model, &options.retry).await?;
        write_tile(&mut output, &tile, spec, scale)?;

        let completed = done + 1;
        debug!(
            row = spec.row,
            col = spec.col,
            completed,
            total,
            "Tile stitched"
        );
        if let Some(progress) = progress {
            let percent = ((completed as f64 / total as f64) * 100.0).round() as u8;
            let _ = progress.send(ProgressEvent {
                percent,
                message: format!("upscaled tile {completed}/{total}"),
            });
        }

        if completed < total {
            if options.inter_tile_pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(options.inter_tile_pause).await;
            }
        }
    }

    info!(tiles = total, "Upscale complete");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        gradient_image, nn_upscale_rgba, AlwaysFailingModel, CancellingModel, FlakyModel,
        NearestNeighborModel,
    };
    use std::sync::atomic::Ordering;

    fn fast_options(tile_size: u32, pad: u32) -> PipelineOptions {
        PipelineOptions {
            tile_size,
            pad,
            retry: RetryPolicy {
                max_retries: 2,
                backoff: Duration::from_millis(1),
            },
            inter_tile_pause: Duration::ZERO,
        }
    }

    fn not_cancelled() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn tiled_output_matches_whole_image_upscale() {
        // Tiling with padding discard must be invisible in the result:
        // the stitched image equals upscaling the whole image at once.
        let source = gradient_image(100, 100);
        let mut model = NearestNeighborModel::new(2);
        let infer_count = model.infer_count.clone();

        let output = run_upscale(
            &source,
            &mut model,
            &fast_options(64, 16),
            None,
            &not_cancelled(),
        )
        .await
        .unwrap();

        assert_eq!((output.width(), output.height()), (200, 200));
        assert_eq!(output.data(), &nn_upscale_rgba(&source, 2)[..]);
        // 100/64 rounds up to a 2x2 grid.
        assert_eq!(infer_count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn image_smaller_than_tile_runs_as_single_tile() {
        let source = gradient_image(50, 50);
        let mut model = NearestNeighborModel::new(2);
        let infer_count = model.infer_count.clone();

        let output = run_upscale(
            &source,
            &mut model,
            &fast_options(128, 16),
            None,
            &not_cancelled(),
        )
        .await
        .unwrap();

        assert_eq!((output.width(), output.height()), (100, 100));
        assert_eq!(output.data(), &nn_upscale_rgba(&source, 2)[..]);
        assert_eq!(infer_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_runs_are_deterministic() {
        let source = gradient_image(80, 60);
        let options = fast_options(32, 8);

        let mut model = NearestNeighborModel::new(4);
        let first = run_upscale(&source, &mut model, &options, None, &not_cancelled())
            .await
            .unwrap();
        let second = run_upscale(&source, &mut model, &options, None, &not_cancelled())
            .await
            .unwrap();

        assert_eq!(first.data(), second.data());
    }

    #[tokio::test]
    async fn transient_tile_failures_are_retried_to_success() {
        let source = gradient_image(100, 100);
        let mut model = FlakyModel {
            inner: NearestNeighborModel::new(2),
            failures_remaining: 2,
        };

        let output = run_upscale(
            &source,
            &mut model,
            &fast_options(64, 16),
            None,
            &not_cancelled(),
        )
        .await
        .unwrap();

        assert_eq!(output.data(), &nn_upscale_rgba(&source, 2)[..]);
    }

    #[tokio::test]
    async fn persistent_tile_failure_fails_the_operation() {
        let source = gradient_image(100, 100);
        let mut model = AlwaysFailingModel::new(2);
        let infer_count = model.infer_count.clone();

        let err = run_upscale(
            &source,
            &mut model,
            &fast_options(64, 16),
            None,
            &not_cancelled(),
        )
        .await
        .unwrap_err();

        match err {
            UpscaleError::TileInference { row, col, attempts, .. } => {
                assert_eq!((row, col), (0, 0));
                assert_eq!(attempts, 3);
            }
            other => panic!("expected TileInference, got {other}"),
        }
        // First tile exhausts its attempts; later tiles never start.
        assert_eq!(infer_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn progress_percentages_are_monotonic_and_end_at_100() {
        let source = gradient_image(100, 100);
        let mut model = NearestNeighborModel::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        run_upscale(
            &source,
            &mut model,
            &fast_options(64, 16),
            Some(&tx),
            &not_cancelled(),
        )
        .await
        .unwrap();
        drop(tx);

        let mut percents = Vec::new();
        while let Some(event) = rx.recv().await {
            assert!(event.percent <= 100);
            percents.push(event.percent);
        }
        assert_eq!(percents, vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_tile() {
        let source = gradient_image(100, 100);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        // 4x4 grid of 32px tiles; cancel after the third inference.
        let mut model = CancellingModel {
            inner: NearestNeighborModel::new(2),
            cancel_after: 3,
            cancel_tx,
        };

        let err = run_upscale(
            &source,
            &mut model,
            &fast_options(32, 8),
            None,
            &cancel_rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UpscaleError::Cancelled));
        assert_eq!(model.inner.infer_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn already_cancelled_runs_zero_tiles() {
        let source = gradient_image(64, 64);
        let mut model = NearestNeighborModel::new(2);
        let infer_count = model.infer_count.clone();
        let (_tx, rx) = watch::channel(true);

        let err = run_upscale(&source, &mut model, &fast_options(32, 8), None, &rx)
            .await
            .unwrap_err();

        assert!(matches!(err, UpscaleError::Cancelled));
        assert_eq!(infer_count.load(Ordering::SeqCst), 0);
    }
}
