//! Model weight catalog: one ONNX entry per enhancement tier, with
//! on-disk resolution, download, and hash verification.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::tensor::ValueRange;
use crate::types::EnhancementTier;

const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DOWNLOAD_TOTAL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub tier: EnhancementTier,
    pub name: String,
    pub filename: String,
    pub url: Option<String>,
    pub sha256: Option<String>,
    /// Upscale factor the weights produce. Must match the tier's scale.
    pub scale: u32,
    /// Value range the model expects on its input tensor.
    pub input_range: ValueRange,
    pub input_name: String,
    pub output_name: String,
    pub description: String,
}

fn builtin_catalog() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            tier: EnhancementTier::Standard,
            name: "RealESRGAN_x2plus".into(),
            filename: "RealESRGAN_x2plus.onnx".into(),
            url: Some("https://huggingface.co/deepghs/imgutils-models/resolve/main/onnx/realesrgan/RealESRGAN_x2plus.onnx".into()),
            sha256: None,
            scale: 2,
            input_range: ValueRange::Byte,
            input_name: "image.1".into(),
            output_name: "image".into(),
            description: "RealESRGAN x2 general-purpose model".into(),
        },
        ModelEntry {
            tier: EnhancementTier::High,
            name: "RealESRGAN_x4plus".into(),
            filename: "RealESRGAN_x4plus.onnx".into(),
            url: Some("https://huggingface.co/deepghs/imgutils-models/resolve/main/onnx/realesrgan/RealESRGAN_x4plus.onnx".into()),
            sha256: None,
            scale: 4,
            input_range: ValueRange::Byte,
            input_name: "image.1".into(),
            output_name: "image".into(),
            description: "RealESRGAN x4 general-purpose model".into(),
        },
    ]
}

pub struct ModelCatalog {
    models_dir: PathBuf,
    entries: Vec<ModelEntry>,
    connect_timeout: Duration,
}

impl ModelCatalog {
    pub fn new(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            entries: Vec::new(),
            connect_timeout: DOWNLOAD_CONNECT_TIMEOUT,
        }
    }

    pub fn with_builtin_models(models_dir: PathBuf) -> Self {
        Self {
            models_dir,
            entries: builtin_catalog(),
            connect_timeout: DOWNLOAD_CONNECT_TIMEOUT,
        }
    }

    /// Fail fast instead of hanging when the weight host is unreachable.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn entry_for(&self, tier: EnhancementTier) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.tier == tier)
    }

    pub fn list(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn model_path(&self, tier: EnhancementTier) -> Option<PathBuf> {
        self.entry_for(tier).map(|e| self.models_dir.join(&e.filename))
    }

    pub fn is_downloaded(&self, tier: EnhancementTier) -> bool {
        self.model_path(tier).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Return the local weights path for `tier`, downloading first if the
    /// file is missing and the entry carries a URL.
    pub fn resolve(&self, tier: EnhancementTier) -> Result<PathBuf> {
        let entry = self
            .entry_for(tier)
            .with_context(|| format!("no catalog entry for tier {tier}"))?;

        let path = self.models_dir.join(&entry.filename);
        if path.is_file() {
            return Ok(path);
        }

        if entry.url.is_none() {
            bail!(
                "weights for tier {tier} not found at {} and no download URL is configured",
                path.display()
            );
        }

        self.download(tier)
    }

    pub fn download(&self, tier: EnhancementTier) -> Result<PathBuf> {
        let entry = self
            .entry_for(tier)
            .with_context(|| format!("no catalog entry for tier {tier}"))?;

        let url = entry
            .url
            .as_deref()
            .with_context(|| format!("no download URL for model: {}", entry.name))?;

        fs::create_dir_all(&self.models_dir).with_context(|| {
            format!(
                "failed to create models directory: {}",
                self.models_dir.display()
            )
        })?;

        let final_path = self.models_dir.join(&entry.filename);
        let tmp_path = self.models_dir.join(format!("{}.part", entry.filename));

        info!(model = %entry.name, url = %url, "Downloading model weights");

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(DOWNLOAD_TOTAL_TIMEOUT)
            .build()
            .context("failed to build HTTP client for model download")?;

        let mut response = client
            .get(url)
            .send()
            .with_context(|| format!("failed to start download for model {}", entry.name))?;

        if !response.status().is_success() {
            let _ = fs::remove_file(&tmp_path);
            bail!(
                "download request for model {} returned HTTP {}",
                entry.name,
                response.status().as_u16()
            );
        }

        let mut tmp_file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

        if let Err(err) = response
            .copy_to(&mut tmp_file)
            .with_context(|| format!("failed while downloading model {} from {url}", entry.name))
        {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        if let Err(err) = tmp_file
            .sync_all()
            .with_context(|| format!("failed to flush temp file: {}", tmp_path.display()))
        {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        if let Some(expected_hash) = &entry.sha256 {
            let actual_hash = sha256_file(&tmp_path)?;
            if actual_hash != *expected_hash {
                let _ = fs::remove_file(&tmp_path);
                bail!(
                    "SHA256 mismatch for {}: expected {expected_hash}, got {actual_hash}",
                    entry.name
                );
            }
            info!(model = %entry.name, "Hash verified OK");
        } else {
            warn!(model = %entry.name, "No SHA256 hash configured — skipping verification");
        }

        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!(
                "failed to move {} -> {}",
                tmp_path.display(),
                final_path.display()
            )
        })?;

        info!(model = %entry.name, path = %final_path.display(), "Download complete");
        Ok(final_path)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.entries).context("failed to serialize model catalog")
    }

    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let loaded: Vec<ModelEntry> =
            serde_json::from_str(json).context("failed to parse model catalog JSON")?;
        for entry in loaded {
            if !self.entries.iter().any(|e| e.tier == entry.tier) {
                self.entries.push(entry);
            }
        }
        Ok(())
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.write_all(&buf[..n])?;
    }
    let hash = hasher.finalize();
    Ok(format!("{hash:x}"))
}
