use super::types::TextFragment;

/// Engine-side confidence thresholds
pub mod thresholds {
    /// Below this: recognition likely failed.
    pub const VERY_LOW: f32 = 0.30;
}

/// A recognition confidence the pipeline can use.
pub fn is_valid_confidence(confidence: f32) -> bool {
    confidence.is_finite() && (0.0..=1.0).contains(&confidence)
}

/// Mean recognition confidence of an engine answer, weighted by text length.
pub fn mean_fragment_confidence(fragments: &[TextFragment]) -> f32 {
    let total_chars: usize = fragments.iter().map(|f| f.text.chars().count()).sum();
    if total_chars == 0 {
        return 0.0;
    }

    let weighted_sum: f32 = fragments
        .iter()
        .map(|f| f.confidence * f.text.chars().count() as f32)
        .sum();

    weighted_sum / total_chars as f32
}

/// Share of fragments the engine itself was unsure about.
pub fn low_confidence_ratio(fragments: &[TextFragment]) -> f32 {
    if fragments.is_empty() {
        return 0.0;
    }
    let low = fragments
        .iter()
        .filter(|f| f.confidence < thresholds::VERY_LOW)
        .count();
    low as f32 / fragments.len() as f32
}
