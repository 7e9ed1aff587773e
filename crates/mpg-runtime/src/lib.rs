//! mpg-runtime
//!
//! The caller side of the promotion policy: reads the current production
//! metric from a registry, runs `mpg_promotion::decide`, and executes the
//! resulting stage transition. Promotions for one model name are serialized
//! in process; across processes a promotion based on a stale production read
//! is refused by the registry and decided again.

mod error;
mod orchestrator;

pub use error::PromotionError;
pub use orchestrator::{PromotionOrchestrator, PromotionOutcome};
