use crate::types::{ModelVersion, PromoteDecision, PromotionDecision};

// ============================================================================
// Public API
// ============================================================================

/// Promotion policy.
///
/// Promote iff there is no production metric, or the candidate's metric is
/// greater than or equal to it. Ties promote (newer model wins).
///
/// Callers must pass `None` only when no production version exists. A failed
/// lookup is an error for the caller to surface, never `None` or `Some(0.0)`.
pub fn decide(candidate_metric: f64, current_production_metric: Option<f64>) -> PromoteDecision {
    match current_production_metric {
        None => PromoteDecision::Promote,
        Some(current) if candidate_metric >= current => PromoteDecision::Promote,
        Some(_) => PromoteDecision::Reject,
    }
}

/// Evaluate a candidate metric against the current production version and
/// explain the result.
pub fn evaluate_candidate(
    metric_key: &str,
    candidate_metric: f64,
    production: Option<&ModelVersion>,
) -> PromotionDecision {
    let production_metric = production.map(|p| p.metric);
    let decision = decide(candidate_metric, production_metric);

    let mut reasons = Vec::new();
    match production {
        None => reasons.push("no production version; promoting unconditionally".to_string()),
        Some(p) => {
            let cmp = match decision {
                PromoteDecision::Promote if candidate_metric == p.metric => "==",
                PromoteDecision::Promote => ">",
                PromoteDecision::Reject => "<",
            };
            reasons.push(format!(
                "{metric_key} {candidate_metric:.6} {cmp} production v{} {:.6}",
                p.version, p.metric
            ));
        }
    }

    PromotionDecision {
        decision,
        metric_key: metric_key.to_string(),
        candidate_metric,
        production_metric,
        production_version: production.map(|p| p.version),
        reasons,
    }
}

/// Returns a fail reason when `value` is NaN or infinite.
///
/// A NaN candidate would be rejected by every comparison yet promoted when no
/// production version exists, so it must be refused before [`decide`] runs.
pub fn check_metric_finite(metric_key: &str, value: f64) -> Option<String> {
    if value.is_finite() {
        None
    } else {
        Some(format!("{metric_key} is not finite ({value})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinities_compare_normally() {
        assert_eq!(decide(f64::INFINITY, Some(1.0)), PromoteDecision::Promote);
        assert_eq!(decide(1.0, Some(f64::INFINITY)), PromoteDecision::Reject);
    }

    #[test]
    fn nan_never_beats_a_production_metric() {
        assert_eq!(decide(f64::NAN, Some(0.1)), PromoteDecision::Reject);
        assert!(check_metric_finite("accuracy", f64::NAN).is_some());
        assert!(check_metric_finite("accuracy", 0.5).is_none());
    }
}
