use mb_capture::CaptureError;
use mb_vision::calibration::ValidationResult;
use mb_vision::FailureReason;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to decode screenshot: {0}")]
    Decode(#[source] CaptureError),
    #[error("screenshot decode timed out after {0:?}")]
    Timeout(Duration),
    #[error("grid calibration rejected the frame: {}", join_tags(reasons))]
    ValidationRejected {
        reasons: Vec<FailureReason>,
        validation: ValidationResult,
    },
    #[error("a scan is already in progress")]
    Busy,
    #[error("internal pipeline failure: {0}")]
    Internal(String),
}

fn join_tags(reasons: &[FailureReason]) -> String {
    reasons.iter().map(|r| r.tag()).collect::<Vec<_>>().join(", ")
}

impl From<CaptureError> for PipelineError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::Timeout(after) => PipelineError::Timeout(after),
            other => PipelineError::Decode(other),
        }
    }
}

impl PipelineError {
    /// Failure tags for reporting. Anything that broke rather than found
    /// nothing is `exception_thrown`.
    pub fn reasons(&self) -> Vec<FailureReason> {
        match self {
            PipelineError::ValidationRejected { reasons, .. } => reasons.clone(),
            PipelineError::Busy => Vec::new(),
            PipelineError::Decode(_) | PipelineError::Timeout(_) | PipelineError::Internal(_) => {
                vec![FailureReason::ExceptionThrown]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_timeout_maps_to_timeout() {
        let err: PipelineError = CaptureError::Timeout(Duration::from_millis(10)).into();
        assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_millis(10)));
        assert_eq!(err.reasons(), vec![FailureReason::ExceptionThrown]);

        let err: PipelineError = CaptureError::EmptyImage.into();
        assert!(matches!(err, PipelineError::Decode(CaptureError::EmptyImage)));
    }

    #[test]
    fn test_rejection_message_lists_reasons() {
        let err = PipelineError::ValidationRejected {
            reasons: vec![FailureReason::LikelyEmptyScreen, FailureReason::NoVerticalClusters],
            validation: ValidationResult::default(),
        };
        assert_eq!(
            err.to_string(),
            "grid calibration rejected the frame: likely_empty_screen, no_vertical_clusters"
        );
        assert_eq!(err.reasons().len(), 2);
        assert!(PipelineError::Busy.reasons().is_empty());
    }
}
