pub mod calibration;
pub mod ensemble;
pub mod nms;
pub mod preprocess;
pub mod recognizer;
pub mod scene;
pub mod similarity;
pub mod strategy;
pub mod templates;
pub mod voting;

pub use calibration::{
    calibrate, CalibrationConfig, CalibrationOutcome, ConfidenceWeights, FailureReason,
};
pub use ensemble::{describe_ensemble, CombineMethod, Ensemble, EnsembleConfig, EnsembleDecision};
pub use nms::{non_max_suppression, DEFAULT_NMS_THRESHOLD};
pub use preprocess::PreprocessConfig;
pub use recognizer::{Recognition, Recognizer, RecognizerConfig};
pub use scene::{SceneAnalysis, SceneThresholds};
pub use similarity::{similarity, FusionParams, MetricWeights, SimilarityScores};
pub use strategy::DetectionStrategy;
pub use templates::{LoadReport, LoaderConfig, TemplateLoadError, TemplateLoader, TemplateStore};
pub use voting::{
    combine_votes, describe_voting, describe_voting_result, TemplateVote, VotingConfig,
    VotingMethod, VotingResult,
};
