use super::band::BandRegion;
use super::CalibrationConfig;
use image::RgbaImage;
use mb_data::Rarity;
use mb_state::GridCalibration;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A vertical frame line: a few adjacent columns sharing one rarity colour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellEdge {
    /// First column of the line
    pub x: u32,
    pub width: u32,
    pub top: u32,
    pub bottom: u32,
    pub rarity: Rarity,
    /// Run length relative to the band height
    pub strength: f64,
}

impl CellEdge {
    pub fn end(&self) -> u32 {
        self.x + self.width
    }

    pub fn run(&self) -> u32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BorderResult {
    pub edges: Vec<CellEdge>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
struct ColumnHit {
    x: u32,
    top: u32,
    bottom: u32,
    rarity: Rarity,
}

/// Longest vertical run of one rarity colour in column `x` between `y0..y1`.
fn longest_run(frame: &RgbaImage, x: u32, y0: u32, y1: u32) -> Option<(u32, u32, Rarity)> {
    let mut best: Option<(u32, u32, Rarity)> = None;
    let mut current: Option<(u32, Rarity)> = None;

    let close = |start: u32, end: u32, rarity: Rarity, best: &mut Option<(u32, u32, Rarity)>| {
        if best.map_or(true, |(s, e, _)| end - start > e - s) {
            *best = Some((start, end, rarity));
        }
    };

    for y in y0..y1 {
        let px = frame.get_pixel(x, y);
        let class = Rarity::classify_border([px[0], px[1], px[2]]);
        match (current, class) {
            (Some((_, r)), Some(c)) if r == c => {}
            (Some((start, r)), next) => {
                close(start, y, r, &mut best);
                current = next.map(|c| (y, c));
            }
            (None, Some(c)) => current = Some((y, c)),
            (None, None) => {}
        }
    }
    if let Some((start, r)) = current {
        close(start, y1, r, &mut best);
    }
    best
}

/// Scan the band column by column for long vertical runs of frame colour,
/// then merge neighbouring columns into edges.
pub fn detect_borders(frame: &RgbaImage, band: &BandRegion, config: &CalibrationConfig) -> BorderResult {
    let y0 = band.y.min(frame.height());
    let y1 = band.bottom().min(frame.height());
    if y1 <= y0 {
        return BorderResult::default();
    }
    let band_h = y1 - y0;
    let min_run = ((band_h as f64 * config.border_min_run_fraction) as u32)
        .max(GridCalibration::MIN_ICON_SIZE);

    let hits: Vec<ColumnHit> = (0..frame.width())
        .filter_map(|x| {
            let (top, bottom, rarity) = longest_run(frame, x, y0, y1)?;
            (bottom - top >= min_run).then_some(ColumnHit {
                x,
                top,
                bottom,
                rarity,
            })
        })
        .collect();

    let mut edges = Vec::new();
    let mut cluster: Vec<ColumnHit> = Vec::new();
    for hit in hits {
        let joins = cluster
            .last()
            .is_some_and(|last| hit.x == last.x + 1 && hit.rarity == last.rarity);
        if !joins && !cluster.is_empty() {
            edges.extend(merge_cluster(&cluster, band_h, config));
            cluster.clear();
        }
        cluster.push(hit);
    }
    if !cluster.is_empty() {
        edges.extend(merge_cluster(&cluster, band_h, config));
    }

    let confidence = if edges.is_empty() {
        0.0
    } else {
        edges.iter().map(|e| e.strength).sum::<f64>() / edges.len() as f64
    };
    debug!(
        "Found {} frame edges in band y={}..{} (confidence {:.2})",
        edges.len(),
        y0,
        y1,
        confidence
    );
    BorderResult { edges, confidence }
}

fn merge_cluster(cluster: &[ColumnHit], band_h: u32, config: &CalibrationConfig) -> Option<CellEdge> {
    let first = cluster.first()?;
    let width = cluster.len() as u32;
    // Wide solid blocks are artwork, not frame lines
    if width > config.max_border_width {
        return None;
    }
    let n = cluster.len() as f64;
    let top = (cluster.iter().map(|c| c.top as f64).sum::<f64>() / n).round() as u32;
    let bottom = (cluster.iter().map(|c| c.bottom as f64).sum::<f64>() / n).round() as u32;
    Some(CellEdge {
        x: first.x,
        width,
        top,
        bottom,
        rarity: first.rarity,
        strength: ((bottom - top) as f64 / band_h as f64).min(1.0),
    })
}
