use std::cmp::Ordering;
use std::collections::HashSet;

use super::dictionary::{normalize_name, ParameterDictionary};
use super::types::{ExtractedParameter, LogicalLine};

/// Label of a document that matches no exam type.
pub const UNKNOWN_EXAM: &str = "unknown";

/// Scores closer than this are tied.
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct ExamClassification {
    pub label: String,
    /// A keyword of the chosen exam type appears on a non-parameter line.
    pub corroborated: bool,
}

impl ExamClassification {
    fn unknown() -> Self {
        Self {
            label: UNKNOWN_EXAM.to_string(),
            corroborated: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: usize,
    score: f64,
    matched: usize,
    typical: usize,
}

/// Higher score, then more matched parameters, then a smaller typical set,
/// then catalogue order.
fn better(a: &Candidate, b: &Candidate) -> Ordering {
    if (a.score - b.score).abs() > SCORE_EPSILON {
        return b.score.total_cmp(&a.score);
    }
    b.matched
        .cmp(&a.matched)
        .then(a.typical.cmp(&b.typical))
        .then(a.position.cmp(&b.position))
}

/// Pick the exam type whose typical parameters best cover the extracted ones.
///
/// Each exam type scores the summed category weight of its typical
/// parameters that were found, divided by the size of its typical set.
/// Header keywords only corroborate the choice; they never change it.
pub fn classify_exam(
    parameters: &[ExtractedParameter],
    lines: &[LogicalLine],
    consumed: &[bool],
    dictionary: &ParameterDictionary,
) -> ExamClassification {
    if parameters.is_empty() {
        return ExamClassification::unknown();
    }
    let found: HashSet<&str> = parameters.iter().map(|p| p.name.as_str()).collect();

    let mut candidates: Vec<Candidate> = Vec::new();
    for (position, exam) in dictionary.exam_types().iter().enumerate() {
        let mut weight = 0.0f64;
        let mut matched = 0usize;
        for &index in &exam.typical {
            let Some(def) = dictionary.definition(index) else {
                continue;
            };
            if found.contains(def.canonical_name.as_str()) {
                weight += f64::from(dictionary.category_weight(def.category));
                matched += 1;
            }
        }
        if matched == 0 || exam.typical.is_empty() {
            continue;
        }
        candidates.push(Candidate {
            position,
            score: weight / exam.typical.len() as f64,
            matched,
            typical: exam.typical.len(),
        });
    }

    let Some(best) = candidates.iter().min_by(|a, b| better(a, b)) else {
        return ExamClassification::unknown();
    };
    if best.score <= 0.0 {
        return ExamClassification::unknown();
    }
    let exam = &dictionary.exam_types()[best.position];

    let corroborated = lines.iter().enumerate().any(|(i, line)| {
        if consumed.get(i).copied().unwrap_or(false) {
            return false;
        }
        let text = format!(" {} ", normalize_name(&line.text));
        exam.keywords.iter().any(|k| text.contains(&format!(" {k} ")))
    });

    tracing::debug!(
        exam_type = exam.label.as_str(),
        score = best.score,
        matched = best.matched,
        candidates = candidates.len(),
        corroborated,
        "Exam type classified"
    );

    ExamClassification {
        label: exam.label.clone(),
        corroborated,
    }
}
