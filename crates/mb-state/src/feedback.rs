use crate::ranking::{RankingStore, VerifiedOutcome};
use crate::DetectionResult;
use anyhow::{bail, Context, Result};
use base64::Engine as _;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const CORRECTION_FORMAT_VERSION: u32 = 1;

/// A user-verified label for one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub corrected_entity_id: String,
    /// What the pipeline reported for the cell, if anything
    #[serde(default)]
    pub original: Option<DetectionResult>,
    /// Template variant that produced the original detection; overrides the
    /// one named in `original`
    #[serde(default)]
    pub template_id: Option<String>,
    /// PNG of the cell, base64 encoded
    #[serde(default)]
    pub crop_png_base64: Option<String>,
    pub resolution: (u32, u32),
}

impl Correction {
    pub fn new(corrected_entity_id: impl Into<String>, resolution: (u32, u32)) -> Self {
        Self {
            corrected_entity_id: corrected_entity_id.into(),
            original: None,
            template_id: None,
            crop_png_base64: None,
            resolution,
        }
    }

    pub fn with_original(mut self, original: DetectionResult) -> Self {
        self.original = Some(original);
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn with_crop(mut self, crop: &RgbaImage) -> Result<Self> {
        let png = mb_capture::encode_png(crop).context("Failed to encode correction crop")?;
        self.crop_png_base64 = Some(base64::engine::general_purpose::STANDARD.encode(png));
        Ok(self)
    }

    pub fn crop(&self) -> Result<Option<RgbaImage>> {
        let Some(encoded) = &self.crop_png_base64 else {
            return Ok(None);
        };
        let png = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Correction crop is not valid base64")?;
        let img = mb_capture::decode_rgba(&png).context("Correction crop is not a valid image")?;
        Ok(Some(img))
    }

    /// Ranking outcome, when a template can be credited
    pub fn verified_outcome(&self) -> Option<VerifiedOutcome> {
        let original = self.original.as_ref()?;
        let template_id = self
            .template_id
            .clone()
            .or_else(|| original.template_id.clone())?;
        Some(VerifiedOutcome {
            template_id,
            detected_entity: original.entity_id.clone(),
            actual_entity: self.corrected_entity_id.clone(),
        })
    }
}

/// Exported set of corrections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionBatch {
    pub version: u32,
    /// Unix milliseconds
    pub exported_at: u64,
    pub corrections: Vec<Correction>,
}

impl Default for CorrectionBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrectionBatch {
    pub fn new() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            version: CORRECTION_FORMAT_VERSION,
            exported_at: now,
            corrections: Vec::new(),
        }
    }

    pub fn push(&mut self, correction: Correction) {
        self.corrections.push(correction);
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to encode correction batch")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let batch: CorrectionBatch =
            serde_json::from_str(json).context("Failed to parse correction batch")?;
        if batch.version > CORRECTION_FORMAT_VERSION {
            bail!(
                "Correction batch version {} is newer than supported version {}",
                batch.version,
                CORRECTION_FORMAT_VERSION
            );
        }
        Ok(batch)
    }

    pub fn verified_outcomes(&self) -> Vec<VerifiedOutcome> {
        self.corrections
            .iter()
            .filter_map(Correction::verified_outcome)
            .collect()
    }
}

impl RankingStore {
    /// Feed verified corrections into the rankings; returns how many applied.
    pub fn apply_corrections(&mut self, batch: &CorrectionBatch) -> usize {
        let outcomes = batch.verified_outcomes();
        self.record_all(&outcomes);
        info!(
            "Applied {} of {} corrections to template rankings",
            outcomes.len(),
            batch.corrections.len()
        );
        outcomes.len()
    }
}
