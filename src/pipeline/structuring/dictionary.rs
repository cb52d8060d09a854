//! Catalogue of laboratory parameters the engine can recognize.
//!
//! The catalogue is JSON data: a bundled copy is compiled into the binary and
//! an external file can replace it at start-up. Loading validates the whole
//! catalogue and builds the lookup indexes once; the result is shared
//! read-only across requests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::ReferenceRange;
use crate::models::enums::{ClinicalCategory, Sex};

const BUNDLED_CATALOGUE: &str = include_str!("../../../resources/parameter_dictionary.json");

/// Aliases shorter than this only ever match exactly.
pub const MIN_FUZZY_LEN: usize = 5;

/// Similarities closer than this count as a tie.
const TIE_EPSILON: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("Cannot read parameter catalogue {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed parameter catalogue: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid parameter catalogue: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Catalogue data
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedUnit {
    pub unit: String,
    pub factor_to_canonical: f64,
}

/// Reference range valid for a subset of patients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeVariant {
    #[serde(default)]
    pub sex: Option<Sex>,
    #[serde(default)]
    pub age_min: Option<u32>,
    #[serde(default)]
    pub age_max: Option<u32>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl RangeVariant {
    fn applies_to(&self, sex: Option<Sex>, age: Option<u32>) -> bool {
        let sex_ok = match self.sex {
            Some(required) => sex == Some(required),
            None => true,
        };
        let age_ok = match (self.age_min, self.age_max) {
            (None, None) => true,
            (lo, hi) => age.is_some_and(|a| lo.map_or(true, |lo| a >= lo) && hi.map_or(true, |hi| a <= hi)),
        };
        sex_ok && age_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Checked in order; the first applicable variant wins.
    #[serde(default)]
    pub conditional_variants: Vec<RangeVariant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlausibleBounds {
    pub min: f64,
    pub max: f64,
}

impl PlausibleBounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub canonical_unit: String,
    #[serde(default)]
    pub accepted_units: Vec<AcceptedUnit>,
    #[serde(default)]
    pub default_range: Option<DefaultRange>,
    pub category: ClinicalCategory,
    /// Values outside these bounds (canonical unit) are almost certainly misreads.
    #[serde(default)]
    pub plausible: Option<PlausibleBounds>,
}

impl ParameterDefinition {
    /// Default reference range for a patient, most specific variant first.
    pub fn default_range_for(&self, sex: Option<Sex>, age: Option<u32>) -> Option<ReferenceRange> {
        let range = self.default_range.as_ref()?;
        range
            .conditional_variants
            .iter()
            .find(|v| v.applies_to(sex, age))
            .and_then(|v| ReferenceRange::new(v.min, v.max))
            .or_else(|| ReferenceRange::new(range.min, range.max))
    }

    pub fn is_plausible(&self, canonical_value: f64) -> bool {
        self.plausible.map_or(true, |p| p.contains(canonical_value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamTypeDefinition {
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub typical_parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    version: String,
    #[serde(default)]
    category_weights: BTreeMap<ClinicalCategory, f32>,
    #[serde(default)]
    known_units: Vec<String>,
    parameters: Vec<ParameterDefinition>,
    #[serde(default)]
    exam_types: Vec<ExamTypeDefinition>,
}

// ═══════════════════════════════════════════════════════════
// Dictionary
// ═══════════════════════════════════════════════════════════

/// Result of a name lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NameMatch {
    /// Index into [`ParameterDictionary::definitions`].
    pub index: usize,
    /// 1.0 for an exact alias match.
    pub similarity: f64,
}

/// Exam type with its typical parameters resolved to definition indexes.
#[derive(Debug, Clone)]
pub struct ExamType {
    pub label: String,
    /// Normalized keywords.
    pub keywords: Vec<String>,
    pub typical: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ParameterDictionary {
    version: String,
    definitions: Vec<ParameterDefinition>,
    category_weights: BTreeMap<ClinicalCategory, f32>,
    exam_types: Vec<ExamType>,
    alias_index: HashMap<String, usize>,
    fuzzy_aliases: Vec<(String, usize)>,
    known_units: HashSet<String>,
    /// Per definition: normalized unit -> factor to canonical.
    unit_factors: Vec<HashMap<String, f64>>,
}

impl ParameterDictionary {
    /// The catalogue compiled into the crate.
    pub fn bundled() -> Result<Self, DictionaryError> {
        Self::from_json(BUNDLED_CATALOGUE)
    }

    /// Read an external catalogue.
    pub fn load(path: &Path) -> Result<Self, DictionaryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DictionaryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dictionary = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            version = dictionary.version.as_str(),
            parameters = dictionary.definitions.len(),
            "Parameter catalogue loaded"
        );
        Ok(dictionary)
    }

    /// External catalogue when configured, bundled one otherwise.
    pub fn load_or_bundled(path: Option<&Path>) -> Result<Self, DictionaryError> {
        match path {
            Some(p) => Self::load(p),
            None => Self::bundled(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, DictionaryError> {
        let file: CatalogueFile = serde_json::from_str(raw)?;
        Self::build(file)
    }

    fn build(file: CatalogueFile) -> Result<Self, DictionaryError> {
        let CatalogueFile {
            version,
            category_weights,
            known_units: extra_units,
            mut parameters,
            exam_types,
        } = file;

        if parameters.is_empty() {
            return Err(invalid("catalogue has no parameters"));
        }
        for (category, weight) in &category_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(invalid(format!("weight of {category} must be a non-negative number")));
            }
        }

        let mut names: HashMap<String, usize> = HashMap::new();
        let mut alias_index: HashMap<String, usize> = HashMap::new();
        let mut known_units: HashSet<String> = extra_units.iter().map(|u| normalize_unit(u)).collect();
        let mut unit_factors = Vec::with_capacity(parameters.len());

        for (index, def) in parameters.iter_mut().enumerate() {
            let name = def.canonical_name.trim();
            if name.is_empty() {
                return Err(invalid(format!("parameter #{index} has an empty canonical name")));
            }
            if names.insert(name.to_string(), index).is_some() {
                return Err(invalid(format!("duplicate canonical name {name}")));
            }

            let canonical_alias = normalize_name(name);
            for alias in std::iter::once(&canonical_alias).chain(def.aliases.iter()) {
                let key = normalize_name(alias);
                if key.is_empty() {
                    return Err(invalid(format!("{name} has an empty alias")));
                }
                match alias_index.get(&key) {
                    Some(&other) if other != index => {
                        return Err(invalid(format!(
                            "alias {key:?} is claimed by both {} and {name}",
                            names_by_index(&names, other)
                        )));
                    }
                    _ => {
                        alias_index.insert(key, index);
                    }
                }
            }

            let canonical_unit = normalize_unit(&def.canonical_unit);
            if canonical_unit.is_empty() {
                return Err(invalid(format!("{name} has no canonical unit")));
            }
            let mut factors: HashMap<String, f64> = HashMap::new();
            for accepted in &def.accepted_units {
                if !accepted.factor_to_canonical.is_finite() || accepted.factor_to_canonical <= 0.0 {
                    return Err(invalid(format!(
                        "{name}: conversion factor of {} must be positive",
                        accepted.unit
                    )));
                }
                let key = normalize_unit(&accepted.unit);
                if key == canonical_unit && accepted.factor_to_canonical != 1.0 {
                    return Err(invalid(format!("{name}: canonical unit must convert with factor 1")));
                }
                factors.insert(key, accepted.factor_to_canonical);
            }
            if !factors.contains_key(&canonical_unit) {
                def.accepted_units.push(AcceptedUnit {
                    unit: def.canonical_unit.clone(),
                    factor_to_canonical: 1.0,
                });
                factors.insert(canonical_unit, 1.0);
            }
            known_units.extend(factors.keys().cloned());
            unit_factors.push(factors);

            if let Some(range) = &def.default_range {
                check_bounds(name, range.min, range.max)?;
                for variant in &range.conditional_variants {
                    check_bounds(name, variant.min, variant.max)?;
                }
            }
            if let Some(p) = def.plausible {
                if !(p.min.is_finite() && p.max.is_finite() && p.min < p.max) {
                    return Err(invalid(format!("{name}: plausible bounds must satisfy min < max")));
                }
            }
        }

        let mut labels = HashSet::new();
        let mut resolved_exams = Vec::with_capacity(exam_types.len());
        for exam in exam_types {
            let label = exam.label.trim().to_string();
            if label.is_empty() || label == super::classify::UNKNOWN_EXAM {
                return Err(invalid(format!("exam type label {label:?} is reserved or empty")));
            }
            if !labels.insert(label.clone()) {
                return Err(invalid(format!("duplicate exam type {label}")));
            }
            if exam.typical_parameters.is_empty() {
                return Err(invalid(format!("exam type {label} lists no parameters")));
            }
            let mut typical = Vec::with_capacity(exam.typical_parameters.len());
            for p in &exam.typical_parameters {
                let index = *names
                    .get(p.trim())
                    .ok_or_else(|| invalid(format!("exam type {label} references unknown parameter {p}")))?;
                if !typical.contains(&index) {
                    typical.push(index);
                }
            }
            resolved_exams.push(ExamType {
                label,
                keywords: exam
                    .keywords
                    .iter()
                    .map(|k| normalize_name(k))
                    .filter(|k| !k.is_empty())
                    .collect(),
                typical,
            });
        }

        let mut fuzzy_aliases: Vec<(String, usize)> = alias_index
            .iter()
            .filter(|(alias, _)| alias.chars().count() >= MIN_FUZZY_LEN)
            .map(|(alias, index)| (alias.clone(), *index))
            .collect();
        // HashMap order is random; sort so that fuzzy scans are reproducible.
        fuzzy_aliases.sort();

        tracing::debug!(
            version = version.as_str(),
            parameters = parameters.len(),
            aliases = alias_index.len(),
            exam_types = resolved_exams.len(),
            "Parameter dictionary built"
        );

        Ok(Self {
            version,
            definitions: parameters,
            category_weights,
            exam_types: resolved_exams,
            alias_index,
            fuzzy_aliases,
            known_units,
            unit_factors,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    pub fn definition(&self, index: usize) -> Option<&ParameterDefinition> {
        self.definitions.get(index)
    }

    pub fn exam_types(&self) -> &[ExamType] {
        &self.exam_types
    }

    /// Weight of a clinical category; categories the catalogue omits weigh 1.0.
    pub fn category_weight(&self, category: ClinicalCategory) -> f32 {
        self.category_weights.get(&category).copied().unwrap_or(1.0)
    }

    /// Resolve a printed parameter name.
    ///
    /// Exact alias match first (case, accents and punctuation folded). Names
    /// of at least [`MIN_FUZZY_LEN`] characters then fall back to the closest
    /// alias by normalized Levenshtein similarity, if it reaches `floor` and
    /// no other parameter is equally close.
    pub fn lookup(&self, raw_name: &str, floor: f64) -> Option<NameMatch> {
        let key = normalize_name(raw_name);
        if key.is_empty() {
            return None;
        }
        if let Some(&index) = self.alias_index.get(&key) {
            return Some(NameMatch {
                index,
                similarity: 1.0,
            });
        }
        if key.chars().count() < MIN_FUZZY_LEN {
            return None;
        }

        let mut best: Option<NameMatch> = None;
        let mut tied = false;
        for (alias, index) in &self.fuzzy_aliases {
            let similarity = strsim::normalized_levenshtein(&key, alias);
            match best {
                Some(b) if similarity > b.similarity + TIE_EPSILON => {
                    best = Some(NameMatch { index: *index, similarity });
                    tied = false;
                }
                Some(b) if (similarity - b.similarity).abs() <= TIE_EPSILON && *index != b.index => {
                    tied = true;
                }
                None => best = Some(NameMatch { index: *index, similarity }),
                _ => {}
            }
        }

        let best = best.filter(|b| b.similarity >= floor)?;
        if tied {
            tracing::debug!(name = key.as_str(), "Ambiguous fuzzy parameter match rejected");
            return None;
        }
        Some(best)
    }

    /// Unit listed anywhere in the catalogue.
    pub fn is_known_unit(&self, raw_unit: &str) -> bool {
        self.known_units.contains(&normalize_unit(raw_unit))
    }

    /// Factor converting `raw_unit` into the canonical unit of a definition,
    /// or `None` when the unit is not accepted for it.
    pub fn unit_factor(&self, index: usize, raw_unit: &str) -> Option<f64> {
        self.unit_factors
            .get(index)?
            .get(&normalize_unit(raw_unit))
            .copied()
    }

    /// Whether `raw_unit` spells the canonical unit of a definition.
    pub fn is_canonical_unit(&self, index: usize, raw_unit: &str) -> bool {
        self.definitions
            .get(index)
            .is_some_and(|d| normalize_unit(&d.canonical_unit) == normalize_unit(raw_unit))
    }
}

fn invalid(message: impl Into<String>) -> DictionaryError {
    DictionaryError::Invalid(message.into())
}

fn names_by_index(names: &HashMap<String, usize>, index: usize) -> String {
    names
        .iter()
        .find(|(_, i)| **i == index)
        .map(|(n, _)| n.clone())
        .unwrap_or_default()
}

fn check_bounds(name: &str, min: Option<f64>, max: Option<f64>) -> Result<(), DictionaryError> {
    for bound in [min, max].into_iter().flatten() {
        if !bound.is_finite() {
            return Err(invalid(format!("{name}: range bounds must be finite")));
        }
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(invalid(format!("{name}: range min {lo} exceeds max {hi}")));
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Normalization
// ═══════════════════════════════════════════════════════════

/// Strip the diacritics used in Portuguese, Spanish and French.
pub fn fold_accents(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

/// Lowercase, fold accents, turn punctuation into spaces and collapse runs.
pub fn normalize_name(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accents)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical spelling of a unit for comparisons: lowercase, no spaces,
/// micro sign as `u`, superscripts as digits, `mcg` as `ug`.
pub fn normalize_unit(raw: &str) -> String {
    let mut unit: String = raw
        .trim()
        .trim_end_matches(['.', ',', ';', ')'])
        .trim_start_matches('(')
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_accents)
        .filter_map(|c| match c {
            'µ' | 'μ' => Some('u'),
            '³' => Some('3'),
            '²' => Some('2'),
            '×' => Some('x'),
            '^' => None,
            c if c.is_whitespace() => None,
            c => Some(c),
        })
        .collect();
    if unit.starts_with('x') && unit[1..].starts_with(|c: char| c.is_ascii_digit()) {
        unit.remove(0);
    }
    unit.replace("mcg", "ug")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundled() -> ParameterDictionary {
        ParameterDictionary::bundled().unwrap()
    }

    fn name_of(dict: &ParameterDictionary, m: Option<NameMatch>) -> Option<String> {
        m.map(|m| dict.definitions()[m.index].canonical_name.clone())
    }

    const MINIMAL: &str = r#"{
        "version": "test",
        "parameters": [
            {"canonical_name": "Glicose", "aliases": ["glicemia"], "canonical_unit": "mg/dL",
             "category": "bioquimica", "default_range": {"min": 70, "max": 99}}
        ],
        "exam_types": [{"label": "bioquimica", "typical_parameters": ["Glicose"]}]
    }"#;

    #[test]
    fn bundled_catalogue_loads() {
        let dict = bundled();
        assert!(dict.definitions().len() >= 40);
        assert!(dict.exam_types().iter().any(|e| e.label == "hemograma"));
        assert_eq!(dict.category_weight(ClinicalCategory::Biochemistry), 0.8);
    }

    #[test]
    fn minimal_catalogue_gets_canonical_unit_and_default_weight() {
        let dict = ParameterDictionary::from_json(MINIMAL).unwrap();
        assert_eq!(dict.unit_factor(0, "mg/dl"), Some(1.0));
        assert_eq!(dict.category_weight(ClinicalCategory::Hematology), 1.0);
        assert_eq!(dict.version(), "test");
    }

    #[test]
    fn exact_lookup_folds_case_accents_and_punctuation() {
        let dict = bundled();
        assert_eq!(name_of(&dict, dict.lookup("HEMATÓCRITO", 0.8)).as_deref(), Some("Hematócrito"));
        assert_eq!(name_of(&dict, dict.lookup("leucocitos", 0.8)).as_deref(), Some("Leucócitos"));
        assert_eq!(name_of(&dict, dict.lookup("HDL-C", 0.8)).as_deref(), Some("HDL"));
        assert_eq!(name_of(&dict, dict.lookup("Hb", 0.8)).as_deref(), Some("Hemoglobina"));
        assert_eq!(dict.lookup("Hemoglobina", 0.8).unwrap().similarity, 1.0);
    }

    #[test]
    fn fuzzy_lookup_tolerates_ocr_noise() {
        let dict = bundled();
        let m = dict.lookup("Hemoglobma", 0.8).expect("one substitution away");
        assert_eq!(dict.definitions()[m.index].canonical_name, "Hemoglobina");
        assert!(m.similarity < 1.0 && m.similarity >= 0.8);
    }

    #[test]
    fn fuzzy_lookup_respects_floor_and_length() {
        let dict = bundled();
        assert!(dict.lookup("Hemograma", 0.8).is_none());
        // Short names never match fuzzily
        assert!(dict.lookup("Hbx", 0.1).is_none());
        assert!(dict.lookup("Paciente", 0.8).is_none());
    }

    #[test]
    fn ambiguous_fuzzy_match_is_rejected() {
        let raw = r#"{
            "version": "t",
            "parameters": [
                {"canonical_name": "Alfa", "aliases": ["abcdex"], "canonical_unit": "U", "category": "outros"},
                {"canonical_name": "Beta", "aliases": ["abcdey"], "canonical_unit": "U", "category": "outros"}
            ]
        }"#;
        let dict = ParameterDictionary::from_json(raw).unwrap();
        assert!(dict.lookup("abcdez", 0.5).is_none());
        assert!(dict.lookup("abcdex", 0.5).is_some());
    }

    #[test]
    fn unit_factors_are_per_parameter() {
        let dict = bundled();
        let glucose = dict.lookup("glicose", 0.8).unwrap().index;
        let hb = dict.lookup("hemoglobina", 0.8).unwrap().index;
        assert_eq!(dict.unit_factor(glucose, "mmol/L"), Some(18.016));
        assert_eq!(dict.unit_factor(hb, "mg/dL"), None);
        assert!(dict.is_known_unit("mg/dL"));
        assert!(!dict.is_known_unit("furlongs"));
        let wbc = dict.lookup("leucocitos", 0.8).unwrap().index;
        assert_eq!(dict.unit_factor(wbc, "mil/mm3"), Some(1000.0));
        assert_eq!(dict.unit_factor(wbc, "x10³/µL"), Some(1000.0));
        assert!(dict.is_canonical_unit(wbc, "/mm³"));
    }

    #[test]
    fn range_variants_follow_patient() {
        let dict = bundled();
        let creat = &dict.definitions()[dict.lookup("creatinina", 0.8).unwrap().index];
        let male = creat.default_range_for(Some(Sex::Male), Some(40)).unwrap();
        assert_eq!((male.min, male.max), (Some(0.7), Some(1.3)));
        let unknown = creat.default_range_for(None, None).unwrap();
        assert_eq!((unknown.min, unknown.max), (Some(0.6), Some(1.2)));
        // Adult variants do not apply without an age
        let no_age = creat.default_range_for(Some(Sex::Female), None).unwrap();
        assert_eq!(no_age.max, Some(1.2));
    }

    #[test]
    fn normalizers() {
        assert_eq!(normalize_name("  Ácido  Úrico: "), "acido urico");
        assert_eq!(normalize_name("25-OH Vitamina D"), "25 oh vitamina d");
        assert_eq!(normalize_unit("µg/dL"), normalize_unit("mcg/dl"));
        assert_eq!(normalize_unit("x10^3/uL"), "103/ul");
        assert_eq!(normalize_unit("/mm³"), "/mm3");
        assert_eq!(normalize_unit("mg/dL."), "mg/dl");
    }

    #[test]
    fn rejects_shared_alias() {
        let raw = r#"{"version": "t", "parameters": [
            {"canonical_name": "A", "aliases": ["shared"], "canonical_unit": "U", "category": "outros"},
            {"canonical_name": "B", "aliases": ["Shared"], "canonical_unit": "U", "category": "outros"}
        ]}"#;
        assert!(matches!(
            ParameterDictionary::from_json(raw),
            Err(DictionaryError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_inverted_range_and_bad_factor() {
        let inverted = MINIMAL.replace(r#""min": 70, "max": 99"#, r#""min": 99, "max": 70"#);
        assert!(matches!(
            ParameterDictionary::from_json(&inverted),
            Err(DictionaryError::Invalid(_))
        ));
        let bad_factor = r#"{"version": "t", "parameters": [
            {"canonical_name": "A", "aliases": [], "canonical_unit": "U", "category": "outros",
             "accepted_units": [{"unit": "kU", "factor_to_canonical": 0}]}
        ]}"#;
        assert!(ParameterDictionary::from_json(bad_factor).is_err());
    }

    #[test]
    fn rejects_unknown_exam_parameter_and_reserved_label() {
        let unknown = MINIMAL.replace(r#"["Glicose"]"#, r#"["Insulina"]"#);
        assert!(ParameterDictionary::from_json(&unknown).is_err());
        let reserved = MINIMAL.replace(r#""label": "bioquimica""#, r#""label": "unknown""#);
        assert!(ParameterDictionary::from_json(&reserved).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            ParameterDictionary::from_json("{not json"),
            Err(DictionaryError::Parse(_))
        ));
    }

    #[test]
    fn load_reads_external_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalogue.json");
        std::fs::write(&path, MINIMAL).unwrap();
        let dict = ParameterDictionary::load_or_bundled(Some(&path)).unwrap();
        assert_eq!(dict.definitions().len(), 1);

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            ParameterDictionary::load(&missing),
            Err(DictionaryError::Io { .. })
        ));
    }
}
