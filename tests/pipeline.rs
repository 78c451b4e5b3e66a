use image::{Rgba, RgbaImage};
use mb_capture::{encode_png, crop_roi, Roi};
use mb_data::Catalog;
use mb_state::{Correction, CorrectionBatch, DetectionMethod, DetectionResult};
use mb_vision::FailureReason;
use megabonk_scan::{PipelineError, ScanConfig, ScanSession};
use std::path::PathBuf;
use std::sync::Arc;

const BACKGROUND: Rgba<u8> = Rgba([20, 22, 28, 255]);
const X0: u32 = 400;
const Y0: u32 = 620;
const ICON: u32 = 64;
const GAP: u32 = 8;

/// common, uncommon, rare, epic, legendary
const FRAMES: [([u8; 3], &str); 5] = [
    ([140, 140, 140], "common"),
    ([60, 200, 60], "uncommon"),
    ([40, 110, 230], "rare"),
    ([160, 60, 220], "epic"),
    ([240, 160, 30], "legendary"),
];

/// 1280x720 HUD with one framed icon per rarity along the bottom.
fn screenshot() -> RgbaImage {
    let mut frame = RgbaImage::from_pixel(1280, 720, BACKGROUND);
    for (i, (color, _)) in FRAMES.iter().enumerate() {
        let x_start = X0 + i as u32 * (ICON + GAP);
        for dy in 0..ICON {
            for dx in 0..ICON {
                let on_frame = dx < 3 || dy < 3 || dx >= ICON - 3 || dy >= ICON - 3;
                let px = if on_frame {
                    Rgba([color[0], color[1], color[2], 255])
                } else {
                    let v = (50 + (dx * 31 + dy * 17 + i as u32 * 41) % 160) as u8;
                    Rgba([v, v.wrapping_add(30) / 2 + 40, 200 - v / 2, 255])
                };
                frame.put_pixel(x_start + dx, Y0 + dy, px);
            }
        }
    }
    frame
}

/// Data directory with an items.json and one icon per slot, cut from the
/// art inside each frame.
fn data_dir(name: &str, frame: &RgbaImage) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("megabonk_scan_{}_{}", name, std::process::id()));
    let icons = dir.join("icons");
    std::fs::create_dir_all(&icons).unwrap();

    let mut items = Vec::new();
    for (i, (_, rarity)) in FRAMES.iter().enumerate() {
        let art = crop_roi(frame, &Roi::new(X0 + i as u32 * (ICON + GAP) + 3, Y0 + 3, 58, 58)).unwrap();
        art.save(icons.join(format!("item_{}.png", i))).unwrap();
        items.push(serde_json::json!({
            "id": format!("item_{}", i),
            "name": format!("Item {}", i),
            "rarity": rarity,
            "image": format!("icons/item_{}.png", i),
        }));
    }
    std::fs::write(
        dir.join("items.json"),
        serde_json::json!({ "items": items }).to_string(),
    )
    .unwrap();
    dir
}

fn config() -> ScanConfig {
    let mut config = ScanConfig::default();
    config.recognizer.adaptive_preprocessing = false;
    config.loader.base_delay_ms = 10;
    config
}

async fn loaded_session(name: &str, frame: &RgbaImage) -> (Arc<ScanSession>, PathBuf) {
    let dir = data_dir(name, frame);
    let catalog = Catalog::load(&dir).unwrap();
    assert_eq!(catalog.len(), 5);

    let session = Arc::new(ScanSession::new(config()));
    let report = session.load_templates(&dir, &catalog).await;
    assert_eq!(report.loaded.len(), 5, "failed: {:?}", report.failed);
    assert_eq!(session.templates().len(), 5);
    (session, dir)
}

fn ids_by_x(detections: &[DetectionResult]) -> Vec<String> {
    let mut sorted: Vec<&DetectionResult> = detections.iter().collect();
    sorted.sort_by_key(|d| d.position.as_ref().map_or(0, |p| p.x));
    sorted.iter().map(|d| d.entity_id.clone()).collect()
}

#[tokio::test]
async fn test_scan_recognizes_every_slot() {
    let frame = screenshot();
    let (session, dir) = loaded_session("scan", &frame).await;
    let bytes = encode_png(&frame).unwrap();

    let report = session.scan_bytes(bytes.clone()).await.unwrap();
    assert!(!report.from_cache);
    let cal = report.calibration.as_ref().unwrap();
    assert_eq!((cal.icon_width, cal.icon_height), (64, 64));
    assert_eq!(cal.x_offset, X0);
    assert_eq!(report.cells_scanned, 5);
    assert_eq!(
        ids_by_x(&report.detections),
        vec!["item_0", "item_1", "item_2", "item_3", "item_4"]
    );
    for det in &report.detections {
        assert_eq!(det.method, DetectionMethod::Hybrid);
        assert!(det.confidence >= 0.5 && det.confidence <= 0.99);
        assert_eq!(det.template_id.as_deref(), Some(det.entity_id.as_str()));
    }

    // same bytes again come from the cache
    let again = session.scan_bytes(bytes).await.unwrap();
    assert!(again.from_cache);
    assert_eq!(ids_by_x(&again.detections), ids_by_x(&report.detections));

    let metrics = session.metrics();
    assert_eq!(metrics.runs, 1);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.detections, 5);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_blank_screenshot_is_rejected() {
    let frame = screenshot();
    let (session, dir) = loaded_session("blank", &frame).await;

    // calibrate once so a preset for this resolution may exist
    session.scan_frame(&frame).unwrap();

    let blank = RgbaImage::from_pixel(1280, 720, BACKGROUND);
    let err = session.scan_bytes(encode_png(&blank).unwrap()).await.unwrap_err();
    match &err {
        PipelineError::ValidationRejected { reasons, validation } => {
            assert!(reasons.contains(&FailureReason::LikelyEmptyScreen));
            assert_eq!(validation.confidence, 0.0);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(session.metrics().rejections, 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_feedback_retires_confused_template() {
    let frame = screenshot();
    let (session, dir) = loaded_session("feedback", &frame).await;

    let first = session.scan_frame(&frame).unwrap();
    assert!(ids_by_x(&first.detections).contains(&"item_1".to_string()));

    let mut batch = CorrectionBatch::new();
    for _ in 0..10 {
        batch.push(
            Correction::new("item_2", (1280, 720)).with_original(
                DetectionResult::new("item_1", 0.8, DetectionMethod::Hybrid).with_template("item_1"),
            ),
        );
    }
    let json = batch.to_json().unwrap();
    let restored = CorrectionBatch::from_json(&json).unwrap();
    assert_eq!(session.apply_feedback(&restored), 10);
    assert!(!session.ranking().should_use_template("item_1"));

    let second = session.scan_frame(&frame).unwrap();
    assert!(!second.from_cache);
    assert!(!ids_by_x(&second.detections).contains(&"item_1".to_string()));
    assert!(ids_by_x(&second.detections).contains(&"item_0".to_string()));

    let _ = std::fs::remove_dir_all(dir);
}
