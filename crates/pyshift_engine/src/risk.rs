//! Risk & Validation (spec §4.7): an advisory 0–100 risk score and the
//! re-parse check that gates a Patch's `Ready`/`Rejected` transition.
//!
//! The score is a deterministic weighted sum — spec.md leaves the exact
//! weights to the implementation but requires them documented and stable
//! across runs, so they're plain constants rather than anything tunable at
//! runtime.

use std::path::Path;

use pyshift_knowledge::Confidence;

/// Path components that weigh a change more heavily (spec §4.7 "file-path
/// signals").
const SENSITIVE_PATH_COMPONENTS: &[&str] = &["auth", "security", "config", "migrations"];

const WEIGHT_FILES_AFFECTED: u32 = 1;
const WEIGHT_CHANGE_COUNT: u32 = 1;
const WEIGHT_TIER2: u32 = 3;
const WEIGHT_TIER3: u32 = 8;
const WEIGHT_SENSITIVE_PATH: u32 = 10;
/// Full weight applied when *every* change is `medium` confidence or lower;
/// scaled down by the actual fraction.
const WEIGHT_LOW_CONFIDENCE_FRACTION: u32 = 30;

/// Raw counts the score is computed from, gathered while `analyse` walks a
/// project (spec §4.7 "weighted sum of: file count affected..., change
/// count..., tier mix..., file-path signals..., fraction of changes with
/// confidence=medium or lower").
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskInputs {
    pub files_affected: usize,
    pub change_count: usize,
    pub tier2_changes: usize,
    pub tier3_changes: usize,
    pub sensitive_path_hits: usize,
    pub medium_or_lower_confidence_changes: usize,
}

/// True if any path component case-insensitively matches a sensitive-area
/// name (spec §4.7).
#[must_use]
pub fn is_sensitive_path(path: &Path) -> bool {
    path.components().any(|component| {
        let text = component.as_os_str().to_string_lossy().to_lowercase();
        SENSITIVE_PATH_COMPONENTS.iter().any(|marker| text.contains(marker))
    })
}

/// Computes the 0–100 advisory risk score. Deterministic: the same inputs
/// always produce the same score, and the weights above are the entire
/// policy — nothing here depends on wall-clock time or call order.
#[must_use]
pub fn score(inputs: &RiskInputs) -> u32 {
    let mut total = 0u32;
    total += u32::try_from(inputs.files_affected).unwrap_or(u32::MAX).min(20) * WEIGHT_FILES_AFFECTED;
    total += u32::try_from(inputs.change_count).unwrap_or(u32::MAX).min(20) * WEIGHT_CHANGE_COUNT;
    total += u32::try_from(inputs.tier2_changes).unwrap_or(u32::MAX) * WEIGHT_TIER2;
    total += u32::try_from(inputs.tier3_changes).unwrap_or(u32::MAX) * WEIGHT_TIER3;
    total += u32::try_from(inputs.sensitive_path_hits).unwrap_or(u32::MAX) * WEIGHT_SENSITIVE_PATH;

    if inputs.change_count > 0 {
        #[allow(clippy::cast_precision_loss)]
        let fraction = inputs.medium_or_lower_confidence_changes as f64 / inputs.change_count as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let low_confidence_component = (fraction * f64::from(WEIGHT_LOW_CONFIDENCE_FRACTION)) as u32;
        total += low_confidence_component;
    }

    total.min(100)
}

/// Buckets a numeric score into the three-level `Confidence` the rest of the
/// model uses for its aggregate risk field: a low score (little risk) maps
/// to `High` confidence in the session's safety, a high score maps to `Low`.
#[must_use]
pub fn as_confidence(score: u32) -> Confidence {
    match score {
        0..=33 => Confidence::High,
        34..=66 => Confidence::Medium,
        _ => Confidence::Low,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_session_scores_zero() {
        assert_eq!(score(&RiskInputs::default()), 0);
    }

    #[test]
    fn tier3_changes_weigh_more_than_tier2() {
        let tier2 = RiskInputs { change_count: 1, tier2_changes: 1, ..RiskInputs::default() };
        let tier3 = RiskInputs { change_count: 1, tier3_changes: 1, ..RiskInputs::default() };
        assert!(score(&tier3) > score(&tier2));
    }

    #[test]
    fn sensitive_path_hit_raises_score() {
        let plain = RiskInputs { files_affected: 1, change_count: 1, ..RiskInputs::default() };
        let sensitive = RiskInputs { sensitive_path_hits: 1, ..plain };
        assert!(score(&sensitive) > score(&plain));
    }

    #[test]
    fn is_sensitive_path_matches_known_markers() {
        assert!(is_sensitive_path(Path::new("app/auth/views.py")));
        assert!(is_sensitive_path(Path::new("migrations/0001_initial.py")));
        assert!(!is_sensitive_path(Path::new("app/views.py")));
    }

    #[test]
    fn score_buckets_to_confidence_monotonically() {
        assert_eq!(as_confidence(0), Confidence::High);
        assert_eq!(as_confidence(50), Confidence::Medium);
        assert_eq!(as_confidence(100), Confidence::Low);
    }
}
