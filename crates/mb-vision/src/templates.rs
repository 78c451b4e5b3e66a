use crate::similarity::Features;
use image::RgbaImage;
use mb_capture::{CaptureError, ImageDecoder};
use mb_data::{Catalog, EntityData, Rarity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Colour transparent template pixels are composited onto; close to the
/// in-game slot background.
const SLOT_BACKGROUND: [u8; 3] = [24, 26, 32];

/// Sizes every template is prepared at
pub const DEFAULT_TEMPLATE_SIZES: [u32; 3] = [32, 48, 64];

/// One reference icon with its precomputed per-size features
#[derive(Debug, Clone)]
pub struct Template {
    pub template_id: String,
    pub entity_id: String,
    pub rarity: Rarity,
    variants: BTreeMap<u32, Features>,
}

impl Template {
    pub fn variant(&self, size: u32) -> Option<&Features> {
        self.variants.get(&size)
    }
}

/// Owner of all template buffers. Built once, then shared read-only.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    sizes: Vec<u32>,
    templates: Vec<Template>,
    by_id: HashMap<String, usize>,
    by_entity: HashMap<String, Vec<usize>>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE_SIZES.to_vec())
    }
}

impl TemplateStore {
    pub fn new(mut sizes: Vec<u32>) -> Self {
        sizes.retain(|&s| s > 0);
        sizes.sort_unstable();
        sizes.dedup();
        if sizes.is_empty() {
            sizes = DEFAULT_TEMPLATE_SIZES.to_vec();
        }
        Self {
            sizes,
            templates: Vec::new(),
            by_id: HashMap::new(),
            by_entity: HashMap::new(),
        }
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// Add (or replace) a template, preparing every size variant.
    pub fn insert(
        &mut self,
        template_id: impl Into<String>,
        entity_id: impl Into<String>,
        rarity: Rarity,
        image: &RgbaImage,
    ) {
        let template_id = template_id.into();
        let entity_id = entity_id.into();
        let flat = flatten_alpha(image, SLOT_BACKGROUND);
        let variants = self
            .sizes
            .iter()
            .map(|&size| {
                let resized = image::imageops::resize(
                    &flat,
                    size,
                    size,
                    image::imageops::FilterType::Triangle,
                );
                (size, Features::from_image(&resized))
            })
            .collect();
        let template = Template {
            template_id: template_id.clone(),
            entity_id: entity_id.clone(),
            rarity,
            variants,
        };

        if let Some(&idx) = self.by_id.get(&template_id) {
            let old_entity = std::mem::replace(&mut self.templates[idx], template).entity_id;
            if let Some(list) = self.by_entity.get_mut(&old_entity) {
                list.retain(|&i| i != idx);
            }
            self.by_entity.entry(entity_id).or_default().push(idx);
            return;
        }
        let idx = self.templates.len();
        self.templates.push(template);
        self.by_id.insert(template_id, idx);
        self.by_entity.entry(entity_id).or_default().push(idx);
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.by_id.get(template_id).map(|&i| &self.templates[i])
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn templates_for<'a>(&'a self, entity_id: &str) -> impl Iterator<Item = &'a Template> + 'a {
        self.by_entity
            .get(entity_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.templates[i])
    }

    /// Entity ids with at least one template, sorted
    pub fn entities(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .by_entity
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Prepared size closest to a cell of `cell_size` pixels
    pub fn nearest_size(&self, cell_size: u32) -> u32 {
        self.sizes
            .iter()
            .copied()
            .min_by_key(|&s| (s.abs_diff(cell_size), s))
            .unwrap_or(DEFAULT_TEMPLATE_SIZES[2])
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Exponential retry delay, capped so large retry counts cannot overflow
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(1u64 << attempt.min(16))
}

/// Composite onto an opaque background so transparent icon margins
/// look like an empty slot.
fn flatten_alpha(img: &RgbaImage, background: [u8; 3]) -> RgbaImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let a = px[3] as f64 / 255.0;
        for c in 0..3 {
            px[c] = (px[c] as f64 * a + background[c] as f64 * (1.0 - a)).round() as u8;
        }
        px[3] = 255;
    }
    out
}

#[derive(Debug, Error)]
pub enum TemplateLoadError {
    #[error("entity {0} has no icon locator")]
    MissingLocator(String),
    #[error("no icon found at {0} or its fallback format")]
    NotFound(PathBuf),
    #[error("failed to decode {path} after {attempts} attempts: {source}")]
    Decode {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: CaptureError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub retries: u32,
    pub base_delay_ms: u64,
    /// Images decoded at once
    pub concurrency: usize,
    pub sizes: Vec<u32>,
    pub decode_timeout_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay_ms: 500,
            concurrency: 8,
            sizes: DEFAULT_TEMPLATE_SIZES.to_vec(),
            decode_timeout_ms: mb_capture::DEFAULT_DECODE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Outcome of a load phase; failures are collected, never thrown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// Entity id and reason
    pub failed: Vec<(String, String)>,
    pub elapsed_ms: u64,
}

impl LoadReport {
    pub fn merge(&mut self, other: LoadReport) {
        self.loaded.extend(other.loaded);
        self.failed.extend(other.failed);
        self.elapsed_ms += other.elapsed_ms;
    }
}

/// Loads reference icons from the data directory with retry and format fallback
#[derive(Debug, Clone)]
pub struct TemplateLoader {
    data_dir: PathBuf,
    config: LoaderConfig,
    decoder: ImageDecoder,
}

impl TemplateLoader {
    pub fn new(data_dir: impl Into<PathBuf>, config: LoaderConfig) -> Self {
        let decoder = ImageDecoder::new(Duration::from_millis(config.decode_timeout_ms));
        Self {
            data_dir: data_dir.into(),
            config,
            decoder,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Primary locator, and the same path in the other supported format
    fn candidate_paths(&self, entity: &EntityData) -> Option<(PathBuf, Option<PathBuf>)> {
        let primary = self.data_dir.join(entity.image.as_ref()?);
        let fallback = match primary.extension().and_then(|e| e.to_str()) {
            Some("png") => Some(primary.with_extension("webp")),
            Some("webp") => Some(primary.with_extension("png")),
            _ => None,
        };
        Some((primary, fallback))
    }

    /// Decode one entity's icon, retrying decode failures with
    /// exponential backoff.
    pub async fn load_image(&self, entity: &EntityData) -> Result<RgbaImage, TemplateLoadError> {
        let (primary, fallback) = self
            .candidate_paths(entity)
            .ok_or_else(|| TemplateLoadError::MissingLocator(entity.id.clone()))?;
        let path = if primary.exists() {
            primary
        } else {
            match fallback.filter(|p| p.exists()) {
                Some(p) => {
                    debug!("Using fallback format for {}: {}", entity.id, p.display());
                    p
                }
                None => return Err(TemplateLoadError::NotFound(primary)),
            }
        };

        let attempts = self.config.retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            match self.decoder.decode_file(&path).await {
                Ok(img) => return Ok(img),
                Err(e) if attempt + 1 < attempts => {
                    let delay = Duration::from_millis(backoff_ms(self.config.base_delay_ms, attempt));
                    debug!(
                        "Retrying {} in {:?} after: {}",
                        path.display(),
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(TemplateLoadError::Decode {
                        path,
                        attempts,
                        source,
                    })
                }
            }
        }
    }

    /// Load a batch with bounded concurrency into `store`.
    pub async fn load_into(&self, entities: Vec<EntityData>, store: &mut TemplateStore) -> LoadReport {
        let started = Instant::now();
        let mut report = LoadReport::default();
        let mut pending = entities.into_iter();
        let mut tasks = JoinSet::new();
        let limit = self.config.concurrency.max(1);

        loop {
            while tasks.len() < limit {
                let Some(entity) = pending.next() else { break };
                let loader = self.clone();
                tasks.spawn(async move {
                    let result = loader.load_image(&entity).await;
                    (entity, result)
                });
            }
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok((entity, Ok(img))) => {
                    store.insert(entity.id.clone(), entity.id.clone(), entity.rarity, &img);
                    report.loaded.push(entity.id);
                }
                Ok((entity, Err(e))) => {
                    warn!("Template {} skipped: {}", entity.id, e);
                    report.failed.push((entity.id, e.to_string()));
                }
                Err(e) => {
                    warn!("Template load task failed: {}", e);
                    report.failed.push(("<task>".to_string(), e.to_string()));
                }
            }
        }

        report.loaded.sort();
        report.failed.sort();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Split the catalog into (priority, remainder) batches, priority ids in
    /// the order given.
    pub fn plan(catalog: &Catalog, priority: &[String]) -> (Vec<EntityData>, Vec<EntityData>) {
        let first: Vec<EntityData> = priority
            .iter()
            .filter_map(|id| catalog.get(id).cloned())
            .collect();
        let rest: Vec<EntityData> = catalog
            .sorted()
            .into_iter()
            .filter(|e| !priority.contains(&e.id))
            .cloned()
            .collect();
        (first, rest)
    }

    /// Both phases back to back: priority candidates first, then the rest.
    pub async fn load_all(&self, catalog: &Catalog, priority: &[String]) -> (TemplateStore, LoadReport) {
        let (first, rest) = Self::plan(catalog, priority);
        let mut store = TemplateStore::new(self.config.sizes.clone());

        let mut report = self.load_into(first, &mut store).await;
        info!(
            "Priority templates: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        let background = self.load_into(rest, &mut store).await;
        info!(
            "Remaining templates: {} loaded, {} failed",
            background.loaded.len(),
            background.failed.len()
        );
        report.merge(background);
        (store, report)
    }
}
