//! Answer label to score tables.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::model::{Instrument, InstrumentKind, InstrumentScores};

const MENTAL_HEALTH_SCALE: [(&str, i64); 4] = [
    ("없음", 0),
    ("2일 이상", 1),
    ("1주일 이상", 2),
    ("거의 매일", 3),
];

const PHYSICAL_HEALTH_SCALE: [(&str, i64); 5] = [
    ("매우 맞음", 1),
    ("맞음", 2),
    ("보통", 3),
    ("아님", 4),
    ("전혀 아님", 5),
];

pub fn scale(kind: InstrumentKind) -> &'static [(&'static str, i64)] {
    match kind {
        InstrumentKind::MentalHealth => &MENTAL_HEALTH_SCALE,
        InstrumentKind::PhysicalHealth => &PHYSICAL_HEALTH_SCALE,
    }
}

/// Highest score on the scale; lenient scoring maps unknown labels here.
pub fn top_score(kind: InstrumentKind) -> i64 {
    scale(kind).iter().map(|(_, score)| *score).max().unwrap_or(0)
}

pub fn score_label(kind: InstrumentKind, label: &str) -> Option<i64> {
    scale(kind)
        .iter()
        .find(|(candidate, _)| *candidate == label)
        .map(|(_, score)| *score)
}

/// Options of `instrument` that have no score on its scale, without repeats.
pub fn unscored_options(instrument: &Instrument) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for option in instrument.questions.iter().flat_map(|q| q.options.iter()) {
        if score_label(instrument.kind, option.as_str()).is_none() && !out.contains(option) {
            out.push(option.clone());
        }
    }
    out
}

/// Number shown next to an option in the survey: 0-based for the mental
/// scale, 1-based for the physical one.
pub fn option_badge(kind: InstrumentKind, option_index: usize) -> usize {
    match kind {
        InstrumentKind::MentalHealth => option_index,
        InstrumentKind::PhysicalHealth => option_index + 1,
    }
}

/// Converts raw answers (question index -> label) into stored scores.
pub fn score_answers(
    kind: InstrumentKind,
    answers: &BTreeMap<usize, String>,
    lenient: bool,
) -> AppResult<InstrumentScores> {
    let mut out = InstrumentScores::new();
    for (index, label) in answers {
        let score = match score_label(kind, label.as_str()) {
            Some(score) => score,
            None if lenient => {
                warn!(%kind, label = label.as_str(), "unmapped answer scored at top of scale");
                top_score(kind)
            }
            None => {
                return Err(AppError::UnmappedAnswer {
                    kind,
                    label: label.clone(),
                })
            }
        };
        out.insert(index.to_string(), score);
    }
    Ok(out)
}
