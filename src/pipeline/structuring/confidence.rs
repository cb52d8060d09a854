use std::collections::BTreeMap;

use super::dictionary::ParameterDictionary;
use super::types::{CategorizedParameter, ExtractedParameter, RecordStatistics};
use crate::models::enums::{ClinicalCategory, ParameterStatus};

/// Overall record confidence: mean of parameter confidences weighted by
/// clinical category. 0.0 for a record without parameters.
pub fn overall_confidence(parameters: &[ExtractedParameter], dictionary: &ParameterDictionary) -> f32 {
    let mut weighted = 0.0f64;
    let mut total_weight = 0.0f64;
    for p in parameters {
        let weight = f64::from(dictionary.category_weight(p.category));
        weighted += weight * f64::from(p.confidence);
        total_weight += weight;
    }
    if total_weight <= 0.0 {
        return 0.0;
    }
    ((weighted / total_weight) as f32).clamp(0.0, 1.0)
}

/// Share of `total`, in percent with two decimals.
fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (count as f64 * 10000.0 / total as f64).round() / 100.0
    }
}

/// Counts by status and category, with normal/altered/critical shares.
pub fn compute_statistics(parameters: &[ExtractedParameter]) -> RecordStatistics {
    let mut stats = RecordStatistics::default();
    for p in parameters {
        *stats.by_status.entry(p.status).or_insert(0) += 1;
        *stats.by_category.entry(p.category).or_insert(0) += 1;
    }
    let total = parameters.len();
    let normal = stats.by_status.get(&ParameterStatus::Normal).copied().unwrap_or(0);
    let altered = parameters.iter().filter(|p| p.status.is_altered()).count();
    stats.critical_count = parameters.iter().filter(|p| p.critical).count();
    stats.normal_percentage = percentage(normal, total);
    stats.altered_percentage = percentage(altered, total);
    stats.critical_percentage = percentage(stats.critical_count, total);
    stats
}

/// Parameters grouped by clinical category, keeping reading order.
pub fn group_by_category(
    parameters: &[ExtractedParameter],
) -> BTreeMap<ClinicalCategory, Vec<CategorizedParameter>> {
    let mut groups: BTreeMap<ClinicalCategory, Vec<CategorizedParameter>> = BTreeMap::new();
    for p in parameters {
        groups.entry(p.category).or_default().push(p.into());
    }
    groups
}

fn category_findings(category: ClinicalCategory) -> &'static str {
    match category {
        ClinicalCategory::Hematology => "Alterações hematológicas",
        ClinicalCategory::Biochemistry => "Alterações bioquímicas",
        ClinicalCategory::RenalFunction => "Alterações de função renal",
        ClinicalCategory::HepaticFunction => "Alterações de função hepática",
        ClinicalCategory::Hormonal => "Alterações hormonais",
        ClinicalCategory::Electrolytes => "Alterações de eletrólitos",
        ClinicalCategory::Vitamins => "Alterações vitamínicas",
        ClinicalCategory::Unclassified => "Outras alterações",
    }
}

/// Notes on the record, in category order, critical count last.
///
/// A record with no judged parameter gets no notes; one whose judged
/// parameters are all normal gets a single reassurance.
pub fn medical_insights(parameters: &[ExtractedParameter]) -> Vec<String> {
    let mut altered: BTreeMap<ClinicalCategory, usize> = BTreeMap::new();
    for p in parameters.iter().filter(|p| p.status.is_altered()) {
        *altered.entry(p.category).or_insert(0) += 1;
    }

    if altered.is_empty() {
        let any_normal = parameters.iter().any(|p| p.status == ParameterStatus::Normal);
        return if any_normal {
            vec!["Todos os parâmetros analisados estão dentro da normalidade.".to_string()]
        } else {
            Vec::new()
        };
    }

    let mut insights: Vec<String> = altered
        .into_iter()
        .map(|(category, count)| {
            format!("{} detectadas em {count} parâmetro(s).", category_findings(category))
        })
        .collect();
    let critical = parameters.iter().filter(|p| p.critical).count();
    if critical > 0 {
        insights.push(format!("ATENÇÃO: {critical} parâmetro(s) em nível crítico."));
    }
    insights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{ClinicalCategory, RangeSource, UnitResolution};

    fn make_param(status: ParameterStatus, category: ClinicalCategory, confidence: f32) -> ExtractedParameter {
        ExtractedParameter {
            name: "X".to_string(),
            value: 1.0,
            unit: "u".to_string(),
            raw_unit: None,
            unit_resolution: UnitResolution::Canonical,
            reference_range: None,
            range_source: RangeSource::Document,
            status,
            critical: false,
            category,
            confidence,
            line_index: 0,
            source_text: String::new(),
        }
    }

    #[test]
    fn empty_record_has_zero_confidence() {
        let dict = ParameterDictionary::bundled().unwrap();
        assert_eq!(overall_confidence(&[], &dict), 0.0);
    }

    #[test]
    fn confidence_weighted_by_category() {
        let dict = ParameterDictionary::bundled().unwrap();
        let params = vec![
            make_param(ParameterStatus::Normal, ClinicalCategory::Hematology, 0.9),
            make_param(ParameterStatus::Normal, ClinicalCategory::Biochemistry, 0.5),
        ];
        // (1.0 * 0.9 + 0.8 * 0.5) / 1.8
        let expected = (0.9 + 0.4) / 1.8;
        assert!((overall_confidence(&params, &dict) - expected).abs() < 1e-6);
    }

    #[test]
    fn statistics_counts_and_shares() {
        let mut params = vec![
            make_param(ParameterStatus::Normal, ClinicalCategory::Hematology, 0.9),
            make_param(ParameterStatus::Above, ClinicalCategory::Hematology, 0.9),
            make_param(ParameterStatus::Below, ClinicalCategory::Biochemistry, 0.9),
        ];
        params[1].critical = true;
        let stats = compute_statistics(&params);
        assert_eq!(stats.by_status[&ParameterStatus::Normal], 1);
        assert_eq!(stats.by_category[&ClinicalCategory::Hematology], 2);
        assert_eq!(stats.normal_percentage, 33.33);
        assert_eq!(stats.altered_percentage, 66.67);
        assert_eq!(stats.critical_count, 1);
        assert_eq!(stats.critical_percentage, 33.33);
    }

    #[test]
    fn groups_keep_reading_order() {
        let mut params = vec![
            make_param(ParameterStatus::Normal, ClinicalCategory::Biochemistry, 0.9),
            make_param(ParameterStatus::Normal, ClinicalCategory::Hematology, 0.8),
            make_param(ParameterStatus::Above, ClinicalCategory::Hematology, 0.7),
        ];
        params[1].name = "Hemoglobina".to_string();
        params[2].name = "Leucócitos".to_string();
        let groups = group_by_category(&params);
        assert_eq!(groups.len(), 2);
        let names: Vec<&str> = groups[&ClinicalCategory::Hematology]
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, ["Hemoglobina", "Leucócitos"]);
        assert_eq!(groups[&ClinicalCategory::Hematology][1].status, ParameterStatus::Above);
        assert!(group_by_category(&[]).is_empty());
    }

    #[test]
    fn insights_for_altered_and_critical() {
        let mut params = vec![
            make_param(ParameterStatus::Below, ClinicalCategory::Hematology, 0.9),
            make_param(ParameterStatus::Above, ClinicalCategory::Hematology, 0.9),
            make_param(ParameterStatus::Above, ClinicalCategory::RenalFunction, 0.9),
            make_param(ParameterStatus::Normal, ClinicalCategory::Biochemistry, 0.9),
        ];
        params[2].critical = true;
        assert_eq!(
            medical_insights(&params),
            [
                "Alterações hematológicas detectadas em 2 parâmetro(s).",
                "Alterações de função renal detectadas em 1 parâmetro(s).",
                "ATENÇÃO: 1 parâmetro(s) em nível crítico.",
            ]
        );
    }

    #[test]
    fn insights_when_nothing_is_altered() {
        let normal = vec![
            make_param(ParameterStatus::Normal, ClinicalCategory::Hematology, 0.9),
            make_param(ParameterStatus::Indeterminate, ClinicalCategory::Unclassified, 0.9),
        ];
        assert_eq!(
            medical_insights(&normal),
            ["Todos os parâmetros analisados estão dentro da normalidade."]
        );
        let unjudged = vec![make_param(ParameterStatus::Indeterminate, ClinicalCategory::Hematology, 0.9)];
        assert!(medical_insights(&unjudged).is_empty());
        assert!(medical_insights(&[]).is_empty());
    }

    #[test]
    fn statistics_of_empty_record() {
        let stats = compute_statistics(&[]);
        assert!(stats.by_status.is_empty());
        assert_eq!(stats.normal_percentage, 0.0);
    }
}
