use mb_state::DetectionResult;

pub const DEFAULT_NMS_THRESHOLD: f64 = 0.3;

/// Greedy non-maximum suppression over detection positions.
///
/// Highest confidence first; a detection is dropped when its box overlaps a
/// kept one by more than `threshold` IoU. Detections without a position
/// cannot overlap and are always kept.
pub fn non_max_suppression(mut detections: Vec<DetectionResult>, threshold: f64) -> Vec<DetectionResult> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<DetectionResult> = Vec::with_capacity(detections.len());
    for det in detections {
        let overlaps = det.position.as_ref().is_some_and(|pos| {
            keep.iter()
                .filter_map(|k| k.position.as_ref())
                .any(|kept| kept.iou(pos) > threshold)
        });
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}
