mod evaluator;
mod types;

pub use evaluator::{check_metric_finite, decide, evaluate_candidate};
pub use types::{
    write_promotion_report_json, ModelStage, ModelVersion, PromoteDecision, PromotionDecision,
    PromotionReport, StageParseError,
};
