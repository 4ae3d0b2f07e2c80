use crate::config::Settings;
use crate::matcher::CandidateMatch;
use std::fmt;

/// Float slack so that e.g. 1.0 - 0.9 still clears a 0.1 margin
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub confidence_threshold: f64,
    pub match_threshold: f64,
    pub ambiguity_margin: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            match_threshold: 0.5,
            ambiguity_margin: 0.1,
        }
    }
}

impl From<&Settings> for GateConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            match_threshold: settings.match_threshold,
            ambiguity_margin: settings.ambiguity_margin,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NoMatch,
    LowConfidence { confidence: f64, threshold: f64 },
    WeakMatch { score: f64, threshold: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoMatch => write!(f, "no_match"),
            RejectReason::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "low_confidence ({confidence:.2} < {threshold:.2})"),
            RejectReason::WeakMatch { score, threshold } => {
                write!(f, "weak_match ({score:.2} < {threshold:.2})")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum GateDecision {
    Accepted(CandidateMatch),
    Rejected(RejectReason),
    /// Candidates within the margin of the best one, best first
    Ambiguous(Vec<CandidateMatch>),
}

/// Decides whether the best of `candidates` (ranked, best first) may proceed.
pub fn evaluate(
    recognition_confidence: f64,
    candidates: Vec<CandidateMatch>,
    config: &GateConfig,
) -> GateDecision {
    let Some(best) = candidates.first() else {
        return GateDecision::Rejected(RejectReason::NoMatch);
    };
    if recognition_confidence < config.confidence_threshold {
        return GateDecision::Rejected(RejectReason::LowConfidence {
            confidence: recognition_confidence,
            threshold: config.confidence_threshold,
        });
    }
    if best.score < config.match_threshold {
        return GateDecision::Rejected(RejectReason::WeakMatch {
            score: best.score,
            threshold: config.match_threshold,
        });
    }

    let best_score = best.score;
    let clears_margin =
        |score: f64| best_score - score + EPSILON >= config.ambiguity_margin;
    let ambiguous = candidates
        .get(1)
        .is_some_and(|runner_up| !clears_margin(runner_up.score));
    if ambiguous {
        let tied = candidates
            .into_iter()
            .take_while(|c| !clears_margin(c.score))
            .collect();
        return GateDecision::Ambiguous(tied);
    }
    match candidates.into_iter().next() {
        Some(best) => GateDecision::Accepted(best),
        None => GateDecision::Rejected(RejectReason::NoMatch),
    }
}
