use image::RgbaImage;
use mb_capture::ImageDecoder;
use mb_data::Catalog;
use mb_state::{
    content_hash, CorrectionBatch, DetectionResult, GridCalibration, GridPreset, PresetStore,
    RankingStore, ResultCache,
};
use mb_vision::{
    calibrate, describe_ensemble, Ensemble, FailureReason, LoadReport, Recognizer,
    TemplateLoader, TemplateStore,
};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::error::PipelineError;
use crate::metrics::{MetricsCollector, MetricsSnapshot};

/// What one scan found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub detections: Vec<DetectionResult>,
    /// Grid the cells came from; `None` for cached results
    pub calibration: Option<GridCalibration>,
    pub calibration_confidence: f64,
    /// Non-fatal calibration flags
    pub reasons: Vec<FailureReason>,
    pub cells_scanned: usize,
    pub empty_cells: usize,
    pub unmatched_cells: usize,
    pub from_cache: bool,
    pub from_preset: bool,
    pub duration_ms: u64,
}

/// Clears the in-flight flag when the scan ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, PipelineError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(Arc::clone(flag)))
            .map_err(|_| PipelineError::Busy)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cache key for decoded pixels
fn frame_key(frame: &RgbaImage) -> u64 {
    let (w, h) = frame.dimensions();
    content_hash(frame.as_raw()) ^ (((w as u64) << 32) | h as u64)
}

/// Owns the state shared between scans: templates, rankings, presets,
/// the result cache and metrics. One scan runs at a time.
pub struct ScanSession {
    config: ScanConfig,
    decoder: ImageDecoder,
    templates: RwLock<Arc<TemplateStore>>,
    ranking: RwLock<Arc<RankingStore>>,
    presets: Mutex<PresetStore>,
    cache: Mutex<ResultCache<Vec<DetectionResult>>>,
    metrics: Mutex<MetricsCollector>,
    in_flight: Arc<AtomicBool>,
}

impl ScanSession {
    pub fn new(config: ScanConfig) -> Self {
        let ranking = RankingStore::new(config.ranking.clone());
        Self::with_state(config, ranking, PresetStore::default())
    }

    /// Like [`ScanSession::new`], restoring rankings and presets from the
    /// configured paths.
    pub fn open(config: ScanConfig) -> anyhow::Result<Self> {
        let ranking = match &config.ranking_path {
            Some(path) => RankingStore::load(path, config.ranking.clone())?,
            None => RankingStore::new(config.ranking.clone()),
        };
        let presets = match &config.presets_path {
            Some(path) => PresetStore::load(path)?,
            None => PresetStore::default(),
        };
        Ok(Self::with_state(config, ranking, presets))
    }

    fn with_state(config: ScanConfig, ranking: RankingStore, presets: PresetStore) -> Self {
        Self {
            decoder: ImageDecoder::new(config.decode_timeout()),
            templates: RwLock::new(Arc::new(TemplateStore::new(config.loader.sizes.clone()))),
            ranking: RwLock::new(Arc::new(ranking)),
            presets: Mutex::new(presets),
            cache: Mutex::new(ResultCache::new(&config.cache)),
            metrics: Mutex::new(MetricsCollector::default()),
            in_flight: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Current template store; later loads publish a new one.
    pub fn templates(&self) -> Arc<TemplateStore> {
        Arc::clone(&self.templates.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn set_templates(&self, store: TemplateStore) {
        let count = store.len();
        *self.templates.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(store);
        lock(&self.cache).clear();
        info!("Template store replaced ({} templates)", count);
    }

    /// Immutable view of the rankings for one run
    pub fn ranking(&self) -> Arc<RankingStore> {
        Arc::clone(&self.ranking.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.metrics).snapshot()
    }

    pub fn add_preset(&self, preset: GridPreset) {
        lock(&self.presets).insert(preset);
    }

    pub fn preset_for(&self, width: u32, height: u32) -> Option<GridCalibration> {
        lock(&self.presets).find(width, height)
    }

    /// Load every catalog icon: priority entities first, published as soon
    /// as they are ready, then the rest.
    pub async fn load_templates(&self, data_dir: &Path, catalog: &Catalog) -> LoadReport {
        let loader = TemplateLoader::new(data_dir, self.config.loader.clone());
        let (first, rest) = TemplateLoader::plan(catalog, &self.config.priority_entities);
        let mut store = TemplateStore::new(self.config.loader.sizes.clone());

        let mut report = if first.is_empty() {
            LoadReport::default()
        } else {
            let report = loader.load_into(first, &mut store).await;
            info!(
                "Priority templates ready: {} loaded, {} failed",
                report.loaded.len(),
                report.failed.len()
            );
            self.set_templates(store.clone());
            report
        };

        let background = loader.load_into(rest, &mut store).await;
        info!(
            "Background templates ready: {} loaded, {} failed in {} ms",
            background.loaded.len(),
            background.failed.len(),
            background.elapsed_ms
        );
        report.merge(background);
        self.set_templates(store);
        report
    }

    /// Feed verified corrections into the rankings. Cached results are
    /// dropped since the weights behind them changed.
    pub fn apply_feedback(&self, batch: &CorrectionBatch) -> usize {
        let applied = {
            let mut guard = self.ranking.write().unwrap_or_else(PoisonError::into_inner);
            Arc::make_mut(&mut *guard).apply_corrections(batch)
        };
        if applied > 0 {
            lock(&self.cache).clear();
            debug!("Result cache cleared after ranking update");
        }
        applied
    }

    /// Write rankings and presets to their configured paths.
    pub fn persist(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.config.ranking_path {
            self.ranking().save(path)?;
        }
        if let Some(path) = &self.config.presets_path {
            lock(&self.presets).save(path)?;
        }
        Ok(())
    }

    /// Decode and scan an encoded screenshot.
    pub async fn scan_bytes(self: &Arc<Self>, bytes: Vec<u8>) -> Result<ScanReport, PipelineError> {
        let guard = InFlightGuard::acquire(&self.in_flight)?;
        let started = Instant::now();
        let key = content_hash(&bytes);
        if let Some(report) = self.cached(key, started) {
            return Ok(report);
        }

        let frame = match self.decoder.decode(Arc::from(bytes)).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Screenshot decode failed: {}", e);
                lock(&self.metrics).record_error();
                return Err(e.into());
            }
        };

        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            session.run_guarded(&frame, key, started)
        })
        .await
        .map_err(|e| PipelineError::Internal(e.to_string()))?
    }

    /// Scan an already decoded frame on the calling thread.
    pub fn scan_frame(&self, frame: &RgbaImage) -> Result<ScanReport, PipelineError> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        let started = Instant::now();
        let key = frame_key(frame);
        if let Some(report) = self.cached(key, started) {
            return Ok(report);
        }
        self.run_guarded(frame, key, started)
    }

    fn cached(&self, key: u64, started: Instant) -> Option<ScanReport> {
        let hit = lock(&self.cache).get(key);
        let mut metrics = lock(&self.metrics);
        match hit {
            Some(detections) => {
                metrics.record_cache_hit();
                debug!("Cache hit {:016x} ({} detections)", key, detections.len());
                Some(ScanReport {
                    detections,
                    from_cache: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..Default::default()
                })
            }
            None => {
                metrics.record_cache_miss();
                None
            }
        }
    }

    fn run_guarded(&self, frame: &RgbaImage, key: u64, started: Instant) -> Result<ScanReport, PipelineError> {
        match catch_unwind(AssertUnwindSafe(|| self.run(frame, key, started))) {
            Ok(result) => result,
            Err(_) => {
                lock(&self.metrics).record_error();
                Err(PipelineError::Internal("scan panicked".to_string()))
            }
        }
    }

    fn run(&self, frame: &RgbaImage, key: u64, started: Instant) -> Result<ScanReport, PipelineError> {
        let (w, h) = frame.dimensions();
        let cal_config = &self.config.calibration;

        let preset = if self.config.use_presets {
            self.preset_for(w, h)
        } else {
            None
        };
        let mut from_preset = preset.is_some();
        let mut outcome = calibrate(frame, cal_config, preset.as_ref());
        if from_preset && !outcome.success {
            debug!("Preset grid does not fit {}x{}, calibrating from scratch", w, h);
            outcome = calibrate(frame, cal_config, None);
            from_preset = false;
        }

        if !outcome.success && !outcome.reasons().is_empty() {
            let reasons = outcome.validation.reasons.clone();
            let tags: Vec<&str> = reasons.iter().map(|r| r.tag()).collect();
            warn!("Frame {}x{} rejected: {}", w, h, tags.join(", "));
            lock(&self.metrics).record_rejection(&reasons, started.elapsed());
            return Err(PipelineError::ValidationRejected {
                reasons,
                validation: outcome.validation,
            });
        }

        if outcome.success
            && !from_preset
            && self.config.use_presets
            && outcome.validation.confidence >= self.config.preset_min_confidence
        {
            self.add_preset(GridPreset {
                name: format!("auto {}x{}", w, h),
                width: w,
                height: h,
                calibration: outcome.grid.calibration.clone(),
            });
        }

        let templates = self.templates();
        if templates.is_empty() {
            warn!("No templates loaded, nothing can be recognized");
        }
        let ranking = self.ranking();
        let recognizer = Recognizer {
            ensemble: Ensemble {
                config: &self.config.ensemble,
                voting: &self.config.voting,
                fusion: &self.config.fusion,
                templates: &templates,
                ranking: &*ranking,
            },
            config: &self.config.recognizer,
            scene: &self.config.scene,
            calibration: cal_config,
        };
        let recognition = recognizer.recognize(frame, &outcome.validation.cells);

        let elapsed = started.elapsed();
        lock(&self.cache).insert(key, recognition.detections.clone());
        lock(&self.metrics).record_run(&recognition, elapsed);
        info!(
            "Scan {}x{}: {} detections in {} ms",
            w,
            h,
            recognition.detections.len(),
            elapsed.as_millis()
        );

        Ok(ScanReport {
            detections: recognition.detections,
            calibration: Some(outcome.grid.calibration),
            calibration_confidence: outcome.validation.confidence,
            reasons: outcome.validation.reasons,
            cells_scanned: recognition.cells_scanned,
            empty_cells: recognition.empty_cells,
            unmatched_cells: recognition.unmatched_cells,
            from_cache: false,
            from_preset,
            duration_ms: elapsed.as_millis() as u64,
        })
    }

    /// Ensemble, voting, ranking and metrics state as text
    pub fn describe(&self) -> String {
        let mut out = describe_ensemble(&self.config.ensemble, &self.config.voting);
        out.push_str(&format!("\ntemplates: {}\n", self.templates().len()));
        out.push_str(&self.ranking().summary());
        out.push_str(&lock(&self.metrics).summary());
        out
    }
}
