//! Inference backend: `ort::Session` construction and the ONNX-backed
//! model implementation.
//!
//! The GPU path (CUDA EP) is preferred; if the provider is unavailable
//! ORT falls back to CPU execution automatically.

use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array4;
use ort::{
    execution_providers::{CUDAExecutionProvider, ExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::{debug, warn};

use crate::catalog::ModelEntry;
use crate::registry::SuperResModel;
use crate::tensor::ValueRange;

/// Inference backend selection. Default is `Cuda`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InferenceBackend {
    #[default]
    Cuda,
    Cpu,
}

impl InferenceBackend {
    /// Parse from string (case-insensitive). Returns `Cuda` for unknown values.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Self::Cpu,
            _ => Self::Cuda,
        }
    }
}

impl std::fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Build an `ort::Session` for the requested backend.
///
/// For `Cuda`, the CUDA EP is registered without `error_on_failure`, so
/// ORT falls back to CPU when the provider cannot initialize. For `Cpu`,
/// no provider is registered at all.
pub fn build_session(model_path: &Path, backend: InferenceBackend) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    let session = match backend {
        InferenceBackend::Cuda => {
            let cuda = CUDAExecutionProvider::default();
            if !cuda.is_available().unwrap_or(false) {
                warn!("CUDA EP is not available — inference will fall back to CPU");
            }

            debug!(backend = "cuda", "Building session with CUDA EP");

            builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?
                .commit_from_file(model_path)
                .with_context(|| {
                    format!("failed to load ONNX model: {}", model_path.display())
                })?
        }
        InferenceBackend::Cpu => {
            debug!(backend = "cpu", "Building session without GPU EPs");
            builder.commit_from_file(model_path).with_context(|| {
                format!("failed to load ONNX model: {}", model_path.display())
            })?
        }
    };

    Ok(session)
}

/// A super-resolution model backed by an ONNX Runtime session.
///
/// The session is invoked raw: no internal tiling, no internal padding.
/// Tiling is handled entirely by the planner/executor.
pub struct OrtModel {
    session: Session,
    scale: u32,
    input_range: ValueRange,
    input_name: String,
    output_name: String,
}

impl OrtModel {
    pub fn load(entry: &ModelEntry, model_path: &Path, backend: InferenceBackend) -> Result<Self> {
        debug!(
            model = %entry.name,
            path = %model_path.display(),
            scale = entry.scale,
            %backend,
            "Loading ONNX super-resolution model"
        );

        let session = build_session(model_path, backend)?;

        // Prefer the catalog's declared IO names; fall back to whatever
        // the session actually exposes.
        let input_name = if session.inputs().iter().any(|i| i.name() == entry.input_name) {
            entry.input_name.clone()
        } else {
            session.inputs()[0].name().to_string()
        };
        let output_name = if session
            .outputs()
            .iter()
            .any(|o| o.name() == entry.output_name)
        {
            entry.output_name.clone()
        } else {
            session.outputs()[0].name().to_string()
        };

        debug!(%input_name, %output_name, "Detected model IO");

        Ok(Self {
            session,
            scale: entry.scale,
            input_range: entry.input_range,
            input_name,
            output_name,
        })
    }
}

impl SuperResModel for OrtModel {
    fn scale(&self) -> u32 {
        self.scale
    }

    fn input_range(&self) -> ValueRange {
        self.input_range
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let input_tensor = Tensor::from_array(input.clone())?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &input_tensor])?;
        let output_view = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
        Ok(output_view
            .to_owned()
            .into_dimensionality::<ndarray::Ix4>()
            .context("model output is not a [1,3,H,W] tensor")?)
    }
}
