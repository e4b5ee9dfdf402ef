//! Model Registry: at most one loaded model per enhancement tier.
//!
//! Loading is lazy and idempotent, performs a one-time warm-up inference
//! to pre-compile GPU kernels, and caches the handle until the host
//! explicitly releases it (reload cost is high). The loader is an
//! injected dependency so tests can substitute a stub model.

use std::collections::HashMap;

use anyhow::{bail, Result};
use ndarray::Array4;
use tracing::{debug, info};

use crate::backend::{InferenceBackend, OrtModel};
use crate::catalog::ModelCatalog;
use crate::error::UpscaleError;
use crate::tensor::ValueRange;
use crate::types::EnhancementTier;

/// Spatial size of the synthetic warm-up tile.
const WARMUP_TILE_SIZE: usize = 32;

/// An opaque super-resolution inference function with a fixed tensor
/// contract: `[1,3,H,W]` in, `[1,3,H*scale,W*scale]` out.
pub trait SuperResModel: Send {
    fn scale(&self) -> u32;
    fn input_range(&self) -> ValueRange;
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;
}

/// Single injection point for "the model for tier X".
pub trait ModelLoader: Send {
    fn load(&self, tier: EnhancementTier) -> Result<Box<dyn SuperResModel>>;
}

/// Loads ONNX weights resolved through the catalog.
pub struct OrtModelLoader {
    catalog: ModelCatalog,
    backend: InferenceBackend,
}

impl OrtModelLoader {
    pub fn new(catalog: ModelCatalog, backend: InferenceBackend) -> Self {
        Self { catalog, backend }
    }
}

impl ModelLoader for OrtModelLoader {
    fn load(&self, tier: EnhancementTier) -> Result<Box<dyn SuperResModel>> {
        let Some(entry) = self.catalog.entry_for(tier) else {
            bail!("no catalog entry for tier {tier}");
        };
        let path = self.catalog.resolve(tier)?;
        let model = OrtModel::load(entry, &path, self.backend)?;
        Ok(Box::new(model))
    }
}

/// Owned registry of loaded models, keyed by tier. Not a global:
/// constructed by the host and handed to the worker.
pub struct TierRegistry {
    loader: Box<dyn ModelLoader>,
    loaded: HashMap<EnhancementTier, Box<dyn SuperResModel>>,
}

impl TierRegistry {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            loaded: HashMap::new(),
        }
    }

    pub fn is_loaded(&self, tier: EnhancementTier) -> bool {
        self.loaded.contains_key(&tier)
    }

    /// Load and warm up the model for `tier`. A no-op when the tier is
    /// already loaded. A failed load leaves other tiers' cached handles
    /// untouched, and never substitutes a different tier.
    pub fn ensure_loaded(&mut self, tier: EnhancementTier) -> Result<(), UpscaleError> {
        if self.loaded.contains_key(&tier) {
            debug!(%tier, "Model already loaded");
            return Ok(());
        }

        let mut model = self.loader.load(tier).map_err(|e| UpscaleError::ModelLoad {
            tier,
            reason: format!("{e:#}"),
        })?;

        warm_up(model.as_mut()).map_err(|e| UpscaleError::ModelLoad {
            tier,
            reason: format!("warm-up inference failed: {e:#}"),
        })?;

        info!(%tier, scale = model.scale(), "Model loaded and warmed up");
        self.loaded.insert(tier, model);
        Ok(())
    }

    pub fn get_mut(&mut self, tier: EnhancementTier) -> Option<&mut dyn SuperResModel> {
        match self.loaded.get_mut(&tier) {
            Some(m) => Some(m.as_mut()),
            None => None,
        }
    }

    /// Drop the cached model for `tier`, freeing its backing memory.
    pub fn release(&mut self, tier: EnhancementTier) {
        if self.loaded.remove(&tier).is_some() {
            info!(%tier, "Released model");
        }
    }

    pub fn release_all(&mut self) {
        if !self.loaded.is_empty() {
            info!(count = self.loaded.len(), "Released all models");
            self.loaded.clear();
        }
    }
}

/// One dummy inference on a small uniform tile, discarding the result.
/// Forces one-time shader/kernel compilation so the first real tile is
/// not abnormally slow, and validates the model's scale contract.
fn warm_up(model: &mut dyn SuperResModel) -> Result<()> {
    let fill = match model.input_range() {
        ValueRange::Unit => 0.5,
        ValueRange::Byte => 128.0,
    };
    let input = Array4::<f32>::from_elem((1, 3, WARMUP_TILE_SIZE, WARMUP_TILE_SIZE), fill);

    let output = model.infer(&input)?;
    let expected = WARMUP_TILE_SIZE * model.scale() as usize;
    let shape = output.shape();
    if shape[2] != expected || shape[3] != expected {
        bail!(
            "warm-up output shape {shape:?} does not match declared scale {}",
            model.scale()
        );
    }

    debug!("Warm-up inference complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingLoader, FailingLoader};
    use std::sync::atomic::Ordering;

    #[test]
    fn ensure_loaded_is_idempotent() {
        let loader = CountingLoader::new();
        let load_count = loader.load_count.clone();
        let mut reg = TierRegistry::new(Box::new(loader));

        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        reg.ensure_loaded(EnhancementTier::Standard).unwrap();

        assert_eq!(load_count.load(Ordering::SeqCst), 1);
        assert!(reg.is_loaded(EnhancementTier::Standard));
    }

    #[test]
    fn warm_up_runs_one_inference_before_real_work() {
        let loader = CountingLoader::new();
        let infer_count = loader.infer_count.clone();
        let mut reg = TierRegistry::new(Box::new(loader));

        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        assert_eq!(infer_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tiers_are_loaded_independently() {
        let mut reg = TierRegistry::new(Box::new(CountingLoader::new()));
        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        assert!(!reg.is_loaded(EnhancementTier::High));
        assert!(reg.get_mut(EnhancementTier::High).is_none());
        assert!(reg.get_mut(EnhancementTier::Standard).is_some());
    }

    #[test]
    fn load_failure_names_the_tier_and_spares_other_tiers() {
        let loader = FailingLoader::fail_only(EnhancementTier::High);
        let mut reg = TierRegistry::new(Box::new(loader));

        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        let err = reg.ensure_loaded(EnhancementTier::High).unwrap_err();
        match err {
            UpscaleError::ModelLoad { tier, .. } => assert_eq!(tier, EnhancementTier::High),
            other => panic!("expected ModelLoad, got {other}"),
        }
        // The earlier tier's cached handle is untouched.
        assert!(reg.is_loaded(EnhancementTier::Standard));
        assert!(!reg.is_loaded(EnhancementTier::High));
    }

    #[test]
    fn release_drops_the_cached_model() {
        let loader = CountingLoader::new();
        let load_count = loader.load_count.clone();
        let mut reg = TierRegistry::new(Box::new(loader));

        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        reg.release(EnhancementTier::Standard);
        assert!(!reg.is_loaded(EnhancementTier::Standard));

        // Reload after release hits the loader again.
        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        assert_eq!(load_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn release_all_clears_every_tier() {
        let mut reg = TierRegistry::new(Box::new(CountingLoader::new()));
        reg.ensure_loaded(EnhancementTier::Standard).unwrap();
        reg.ensure_loaded(EnhancementTier::High).unwrap();
        reg.release_all();
        assert!(!reg.is_loaded(EnhancementTier::Standard));
        assert!(!reg.is_loaded(EnhancementTier::High));
    }
}
