use super::classify::classify_exam;
use super::confidence::{compute_statistics, group_by_category, medical_insights, overall_confidence};
use super::dictionary::ParameterDictionary;
use super::fields::extract_fields;
use super::lines::reconstruct_lines;
use super::parameters::{extract_parameters, RangeContext};
use super::types::{ExtractOptions, ExtractedParameter, PatientHint, StructuredRecord};
use super::StructuringError;
use crate::pipeline::extraction::TextFragment;

/// Parameters below this confidence are left out unless the caller asks otherwise.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Structure the OCR output of one lab report.
///
/// Pipeline: lines → identity fields → parameters → threshold filter →
/// exam type → confidence and statistics. `patient_hint` takes precedence
/// over sex and age read from the report when choosing dictionary ranges;
/// it never overwrites the extracted patient fields.
///
/// Fails only on unusable input. A document with nothing recognizable still
/// yields a record, with no parameters and exam type `unknown`.
pub fn extract(
    fragments: &[TextFragment],
    patient_hint: Option<&PatientHint>,
    confidence_threshold: f32,
    dictionary: &ParameterDictionary,
    options: &ExtractOptions,
) -> Result<StructuredRecord, StructuringError> {
    if !(0.0..=1.0).contains(&confidence_threshold) {
        return Err(StructuringError::InvalidThreshold(confidence_threshold));
    }

    let lines = reconstruct_lines(fragments)?;
    let fields = extract_fields(&lines);

    let hint = patient_hint.copied().unwrap_or_default();
    let context = RangeContext {
        sex: hint.sex.or(fields.patient.sex),
        age: hint.age.or(fields.patient.age),
    };
    let extraction = extract_parameters(&lines, dictionary, &context, options, &fields.labelled_lines);

    let (parameters, dropped): (Vec<ExtractedParameter>, Vec<ExtractedParameter>) = extraction
        .parameters
        .into_iter()
        .partition(|p| p.confidence >= confidence_threshold);
    if !dropped.is_empty() {
        tracing::debug!(
            filtered_out = dropped.len(),
            threshold = confidence_threshold,
            "Low-confidence parameters filtered"
        );
    }

    let exam = classify_exam(&parameters, &lines, &extraction.consumed, dictionary);
    let confidence = overall_confidence(&parameters, dictionary);
    let low_confidence = confidence < options.low_confidence_warning;
    let statistics = compute_statistics(&parameters);
    let categories = group_by_category(&parameters);
    let insights = medical_insights(&parameters);

    if low_confidence {
        tracing::warn!(
            overall_confidence = confidence,
            parameters = parameters.len(),
            "Lab report structured with low confidence"
        );
    }
    tracing::info!(
        lines = lines.len(),
        parameters = parameters.len(),
        filtered_out = dropped.len(),
        unclassified = extraction.unclassified.len(),
        exam_type = exam.label.as_str(),
        overall_confidence = confidence,
        "Lab report structured"
    );

    Ok(StructuredRecord {
        patient: fields.patient,
        laboratory: fields.laboratory,
        exam_type: exam.label,
        exam_corroborated: exam.corroborated,
        total_parameters: parameters.len(),
        filtered_out: dropped.len(),
        parameters,
        unclassified: extraction.unclassified,
        statistics,
        categories,
        insights,
        overall_confidence: confidence,
        low_confidence,
        raw_text: lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

/// [`extract`] with the default threshold and options, without a patient hint.
pub fn extract_with_defaults(
    fragments: &[TextFragment],
    dictionary: &ParameterDictionary,
) -> Result<StructuredRecord, StructuringError> {
    extract(
        fragments,
        None,
        DEFAULT_CONFIDENCE_THRESHOLD,
        dictionary,
        &ExtractOptions::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::{ClinicalCategory, ParameterStatus, Sex, UnitResolution};

    const REPORT: &[&str] = &[
        "LABORATÓRIO EXEMPLO",
        "HEMOGRAMA COMPLETO",
        "Paciente: João Silva",
        "Idade: 45 anos",
        "Data: 15/06/2024",
        "Hemoglobina: 14.2 g/dL (12.0-16.0)",
        "Leucócitos: 7.200 /mm³ (4.000-11.000)",
        "Plaquetas: 280.000 /mm³ (150.000-450.000)",
        "Dr. Maria Santos",
    ];

    fn dict() -> ParameterDictionary {
        ParameterDictionary::bundled().unwrap()
    }

    /// One fragment per line, stacked top to bottom.
    fn make_fragments(lines: &[&str], confidence: f32) -> Vec<TextFragment> {
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                TextFragment::new(line, confidence).with_bbox(
                    40.0,
                    40.0 + i as f32 * 30.0,
                    10.0 * line.chars().count() as f32,
                    20.0,
                )
            })
            .collect()
    }

    fn run(lines: &[&str], threshold: f32) -> StructuredRecord {
        extract(
            &make_fragments(lines, 0.95),
            None,
            threshold,
            &dict(),
            &ExtractOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn full_blood_count_report() {
        let record = run(REPORT, DEFAULT_CONFIDENCE_THRESHOLD);

        assert_eq!(record.patient.name.as_deref(), Some("João Silva"));
        assert_eq!(record.patient.age, Some(45));
        assert_eq!(record.laboratory.name.as_deref(), Some("Laboratório Exemplo"));
        assert_eq!(record.laboratory.responsible.as_deref(), Some("Maria Santos"));
        assert_eq!(
            record.laboratory.date,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 15)
        );

        let names: Vec<&str> = record.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Hemoglobina", "Leucócitos", "Plaquetas"]);
        assert!(record
            .parameters
            .iter()
            .all(|p| p.status == ParameterStatus::Normal));
        assert_eq!(record.parameters[1].value, 7200.0);
        assert_eq!(record.total_parameters, 3);
        assert_eq!(record.filtered_out, 0);

        assert_eq!(record.exam_type, "hemograma");
        assert!(record.exam_corroborated);
        assert!((record.overall_confidence - 0.95).abs() < 1e-5);
        assert!(!record.low_confidence);
        assert_eq!(record.statistics.normal_percentage, 100.0);
        assert_eq!(record.categories[&ClinicalCategory::Hematology].len(), 3);
        assert_eq!(
            record.insights,
            ["Todos os parâmetros analisados estão dentro da normalidade."]
        );
        assert!(record.raw_text.starts_with("LABORATÓRIO EXEMPLO\nHEMOGRAMA COMPLETO\n"));
    }

    #[test]
    fn hemoglobin_example() {
        let record = run(&["Hemoglobina 14.2 g/dL (12.0-16.0)"], DEFAULT_CONFIDENCE_THRESHOLD);
        let p = &record.parameters[0];
        assert_eq!(p.name, "Hemoglobina");
        assert_eq!(p.value, 14.2);
        assert_eq!(p.unit, "g/dL");
        assert_eq!(p.reference_range.map(|r| (r.min, r.max)), Some((Some(12.0), Some(16.0))));
        assert_eq!(p.status, ParameterStatus::Normal);
    }

    #[test]
    fn glucose_example() {
        let record = run(&["Glicose 250 mg/dL (70-99)"], DEFAULT_CONFIDENCE_THRESHOLD);
        assert_eq!(record.parameters[0].status, ParameterStatus::Above);
        assert_eq!(record.exam_type, "bioquimica");
    }

    #[test]
    fn altered_results_are_grouped_and_noted() {
        let record = run(
            &["Hemoglobina 10.2 g/dL (12.0-16.0)", "Glicose 250 mg/dL (70-99)"],
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        assert_eq!(record.categories.len(), 2);
        assert_eq!(record.categories[&ClinicalCategory::Hematology][0].name, "Hemoglobina");
        assert_eq!(
            record.categories[&ClinicalCategory::Biochemistry][0].status,
            ParameterStatus::Above
        );
        assert_eq!(
            record.insights,
            [
                "Alterações hematológicas detectadas em 1 parâmetro(s).",
                "Alterações bioquímicas detectadas em 1 parâmetro(s).",
                "ATENÇÃO: 1 parâmetro(s) em nível crítico.",
            ]
        );
    }

    #[test]
    fn status_boundaries_are_inclusive() {
        let record = run(
            &["Hemoglobina 12.0 g/dL (12.0-16.0)", "Hematócrito 47 % (36-47)"],
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        assert_eq!(record.parameters.len(), 2);
        assert!(record
            .parameters
            .iter()
            .all(|p| p.status == ParameterStatus::Normal));
    }

    #[test]
    fn document_without_parameters() {
        let record = run(&["Laudo em anexo", "Sem resultados numéricos"], DEFAULT_CONFIDENCE_THRESHOLD);
        assert!(record.parameters.is_empty());
        assert_eq!(record.exam_type, "unknown");
        assert_eq!(record.overall_confidence, 0.0);
        assert!(record.low_confidence);
    }

    #[test]
    fn unusable_input_is_rejected() {
        let dict = dict();
        let options = ExtractOptions::default();
        assert_eq!(
            extract(&[], None, 0.7, &dict, &options),
            Err(StructuringError::EmptyInput)
        );
        let frags = make_fragments(&["Glicose 92"], 0.9);
        for bad in [1.5, -0.1, f32::NAN] {
            assert!(matches!(
                extract(&frags, None, bad, &dict, &options),
                Err(StructuringError::InvalidThreshold(_))
            ));
        }
    }

    #[test]
    fn unit_mismatch_is_kept_with_raw_unit() {
        let lines = ["Hemoglobina 14.2 mg/dL (12.0-16.0)"];
        let record = extract_with_defaults(&make_fragments(&lines, 1.0), &dict()).unwrap();
        assert_eq!(record.filtered_out, 0);
        let p = &record.parameters[0];
        assert_eq!(p.name, "Hemoglobina");
        assert_eq!(p.unit, "mg/dL");
        assert_eq!(p.raw_unit.as_deref(), Some("mg/dL"));
        assert_eq!(p.unit_resolution, UnitResolution::Conflict);
        assert_eq!(p.status, ParameterStatus::Indeterminate);
        assert!(p.confidence < 1.0);

        // Still visible at the default threshold with typical OCR confidence
        assert_eq!(run(&lines, DEFAULT_CONFIDENCE_THRESHOLD).parameters.len(), 1);

        let strict = run(&lines, 0.9);
        assert!(strict.parameters.is_empty());
        assert_eq!(strict.filtered_out, 1);
    }

    #[test]
    fn threshold_filter_is_monotonic() {
        let lines = [
            "Hemoglobina 14.2 g/dL (12.0-16.0)",
            "Glicose 92",
            "Hemoglobma Glicada 5,4 %",
            "Creatinina 1,0 mg%",
            "Ureia 30 g/dL",
        ];
        let mut previous = usize::MAX;
        for threshold in [0.0, 0.3, 0.45, 0.6, 0.75, 0.9, 1.0] {
            let record = run(&lines, threshold);
            assert!(record.parameters.len() <= previous);
            assert!(record
                .parameters
                .iter()
                .all(|p| p.confidence >= threshold && (0.0..=1.0).contains(&p.confidence)));
            assert_eq!(record.total_parameters + record.filtered_out, run(&lines, 0.0).total_parameters);
            previous = record.parameters.len();
        }
    }

    #[test]
    fn identical_input_gives_identical_json() {
        let frags = make_fragments(REPORT, 0.9);
        let dict = dict();
        let a = extract_with_defaults(&frags, &dict).unwrap();
        let b = extract_with_defaults(&frags, &dict).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn patient_hint_drives_ranges_only() {
        let frags = make_fragments(&["Sexo: Feminino", "Idade: 40", "Creatinina 1,25 mg/dL"], 0.95);
        let dict = dict();
        let options = ExtractOptions::default();

        let from_report = extract(&frags, None, 0.5, &dict, &options).unwrap();
        assert_eq!(from_report.parameters[0].status, ParameterStatus::Above);

        let hint = PatientHint {
            sex: Some(Sex::Male),
            age: Some(40),
        };
        let hinted = extract(&frags, Some(&hint), 0.5, &dict, &options).unwrap();
        assert_eq!(hinted.parameters[0].status, ParameterStatus::Normal);
        assert_eq!(hinted.patient.sex, Some(Sex::Female));
    }

    #[test]
    fn text_fallback_still_structures() {
        let frags = vec![TextFragment::new(
            "Paciente: Ana Souza\nGlicose\t92\tmg/dL\t70 a 99",
            0.9,
        )];
        let record = extract_with_defaults(&frags, &dict()).unwrap();
        assert_eq!(record.patient.name.as_deref(), Some("Ana Souza"));
        let p = &record.parameters[0];
        assert_eq!(p.name, "Glicose");
        assert!((p.confidence - 0.9 * 0.9).abs() < 1e-6);
    }

    #[test]
    fn unclassified_entries_are_opt_in() {
        let lines = ["Homocisteína 9,8 µmol/L (5-15)", "Glicose 92 mg/dL (70-99)"];
        let options = ExtractOptions {
            include_unclassified: true,
            ..Default::default()
        };
        let record = extract(&make_fragments(&lines, 0.95), None, 0.7, &dict(), &options).unwrap();
        assert_eq!(record.parameters.len(), 1);
        assert_eq!(record.unclassified.len(), 1);
        assert!(run(&lines, 0.7).unclassified.is_empty());
    }
}
