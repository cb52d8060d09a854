use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::models::enums::{
    ClinicalCategory, LineSource, ParameterStatus, RangeSource, Sex, UnitResolution,
};
use crate::pipeline::extraction::BoundingBox;

/// One reading row of the document, rebuilt from OCR fragments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogicalLine {
    /// Position in document order.
    pub index: usize,
    pub page: u32,
    /// Cells joined by single spaces.
    pub text: String,
    pub cells: Vec<String>,
    pub min_confidence: f32,
    pub avg_confidence: f32,
    /// Absent for lines rebuilt from text without layout.
    pub envelope: Option<BoundingBox>,
    pub source: LineSource,
}

#[cfg(test)]
impl LogicalLine {
    /// Geometry-less line for rule tests.
    pub fn from_text(index: usize, text: &str, confidence: f32) -> Self {
        Self {
            index,
            page: 0,
            text: text.to_string(),
            cells: vec![text.to_string()],
            min_confidence: confidence,
            avg_confidence: confidence,
            envelope: None,
            source: LineSource::Geometry,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    pub name: Option<String>,
    pub age: Option<u32>,
    #[serde(rename = "gender")]
    pub sex: Option<Sex>,
    /// RG, CPF or a laboratory registration number.
    pub document_id: Option<String>,
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaboratoryInfo {
    pub name: Option<String>,
    /// Physician or technician signing the report.
    pub responsible: Option<String>,
    /// Collection date.
    pub date: Option<NaiveDate>,
}

/// Reference interval; an absent bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ReferenceRange {
    /// A range with at least one finite bound and `min <= max`.
    pub fn new(min: Option<f64>, max: Option<f64>) -> Option<Self> {
        if min.is_none() && max.is_none() {
            return None;
        }
        if min.is_some_and(|v| !v.is_finite()) || max.is_some_and(|v| !v.is_finite()) {
            return None;
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return None;
            }
        }
        Some(Self { min, max })
    }

    /// Bounds are inclusive.
    pub fn status(&self, value: f64) -> ParameterStatus {
        if self.min.is_some_and(|min| value < min) {
            ParameterStatus::Below
        } else if self.max.is_some_and(|max| value > max) {
            ParameterStatus::Above
        } else {
            ParameterStatus::Normal
        }
    }

    /// Far enough out of range to need attention: below 70% of the lower
    /// bound or above 130% of the upper one.
    pub fn is_critical(&self, value: f64) -> bool {
        let low = self.min.is_some_and(|min| min > 0.0 && value < 0.7 * min);
        let high = self.max.is_some_and(|max| value > 1.3 * max);
        low || high
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            min: self.min.map(|v| v * factor),
            max: self.max.map(|v| v * factor),
        }
    }
}

/// A recognized laboratory test result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedParameter {
    /// Canonical dictionary name.
    pub name: String,
    pub value: f64,
    /// Unit `value` is expressed in.
    pub unit: String,
    /// Unit as printed on the report.
    pub raw_unit: Option<String>,
    pub unit_resolution: UnitResolution,
    pub reference_range: Option<ReferenceRange>,
    pub range_source: RangeSource,
    pub status: ParameterStatus,
    pub critical: bool,
    pub category: ClinicalCategory,
    pub confidence: f32,
    pub line_index: usize,
    pub source_text: String,
}

/// A measurement-shaped line whose name is not in the dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnclassifiedEntry {
    pub raw_name: String,
    pub value: f64,
    pub raw_unit: Option<String>,
    pub reference_range: Option<ReferenceRange>,
    pub confidence: f32,
    pub line_index: usize,
    pub source_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordStatistics {
    pub by_status: BTreeMap<ParameterStatus, usize>,
    pub by_category: BTreeMap<ClinicalCategory, usize>,
    pub normal_percentage: f64,
    pub altered_percentage: f64,
    pub critical_count: usize,
    pub critical_percentage: f64,
}

/// Short view of a parameter inside its category group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizedParameter {
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub status: ParameterStatus,
    pub confidence: f32,
}

impl From<&ExtractedParameter> for CategorizedParameter {
    fn from(p: &ExtractedParameter) -> Self {
        Self {
            name: p.name.clone(),
            value: p.value,
            unit: p.unit.clone(),
            status: p.status,
            confidence: p.confidence,
        }
    }
}

/// Everything the engine could read off one lab report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub patient: PatientInfo,
    pub laboratory: LaboratoryInfo,
    pub exam_type: String,
    /// A keyword of the chosen exam type was printed on the report.
    pub exam_corroborated: bool,
    pub parameters: Vec<ExtractedParameter>,
    pub total_parameters: usize,
    /// Parameters dropped by the confidence threshold.
    pub filtered_out: usize,
    pub unclassified: Vec<UnclassifiedEntry>,
    pub statistics: RecordStatistics,
    /// Kept parameters grouped by clinical category, in reading order.
    pub categories: BTreeMap<ClinicalCategory, Vec<CategorizedParameter>>,
    /// Plain-language notes on altered and critical results.
    pub insights: Vec<String>,
    pub overall_confidence: f32,
    pub low_confidence: bool,
    pub raw_text: String,
}

/// Caller-supplied patient facts, preferred over values read from the report
/// when choosing reference ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientHint {
    pub age: Option<u32>,
    pub sex: Option<Sex>,
}

/// Tunables of one `extract` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub fuzzy_floor: f64,
    pub include_unclassified: bool,
    pub low_confidence_warning: f32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ExtractOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            fuzzy_floor: config.fuzzy_similarity_floor,
            include_unclassified: config.include_unclassified,
            low_confidence_warning: config.low_confidence_warning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: Option<f64>, max: Option<f64>) -> ReferenceRange {
        ReferenceRange::new(min, max).unwrap()
    }

    #[test]
    fn status_bounds_are_inclusive() {
        let r = range(Some(12.0), Some(16.0));
        assert_eq!(r.status(12.0), ParameterStatus::Normal);
        assert_eq!(r.status(16.0), ParameterStatus::Normal);
        assert_eq!(r.status(11.99), ParameterStatus::Below);
        assert_eq!(r.status(16.01), ParameterStatus::Above);
    }

    #[test]
    fn open_bounds_are_infinite() {
        let upper_only = range(None, Some(200.0));
        assert_eq!(upper_only.status(-5.0), ParameterStatus::Normal);
        assert_eq!(upper_only.status(201.0), ParameterStatus::Above);
        let lower_only = range(Some(40.0), None);
        assert_eq!(lower_only.status(1e9), ParameterStatus::Normal);
        assert_eq!(lower_only.status(39.0), ParameterStatus::Below);
    }

    #[test]
    fn malformed_ranges_rejected() {
        assert!(ReferenceRange::new(Some(16.0), Some(12.0)).is_none());
        assert!(ReferenceRange::new(None, None).is_none());
        assert!(ReferenceRange::new(Some(f64::NAN), Some(1.0)).is_none());
        assert!(ReferenceRange::new(Some(5.0), Some(5.0)).is_some());
    }

    #[test]
    fn critical_margins() {
        let r = range(Some(70.0), Some(99.0));
        assert!(r.is_critical(48.0));
        assert!(!r.is_critical(49.0));
        assert!(r.is_critical(129.0));
        assert!(!r.is_critical(128.0));
        assert!(!range(Some(0.0), Some(5.0)).is_critical(0.0));
    }

    #[test]
    fn patient_sex_serializes_as_gender() {
        let patient = PatientInfo {
            sex: Some(Sex::Male),
            ..Default::default()
        };
        let json = serde_json::to_value(&patient).unwrap();
        assert_eq!(json["gender"], "masculino");
    }

    #[test]
    fn dates_serialize_as_iso() {
        let lab = LaboratoryInfo {
            date: NaiveDate::from_ymd_opt(2024, 6, 15),
            ..Default::default()
        };
        let json = serde_json::to_value(&lab).unwrap();
        assert_eq!(json["date"], "2024-06-15");
    }
}
