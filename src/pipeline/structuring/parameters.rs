use std::collections::HashSet;

use super::dictionary::{normalize_name, ParameterDefinition, ParameterDictionary};
use super::numbers::{parse_reference_range, split_numeric_token, PrintedNumber, PrintedRange, Reading};
use super::types::{ExtractOptions, ExtractedParameter, LogicalLine, ReferenceRange, UnclassifiedEntry};
use crate::models::enums::{LineSource, ParameterStatus, RangeSource, Sex, UnitResolution};

/// Multipliers applied to a parameter's confidence.
pub mod factors {
    /// No unit printed; the value is taken to be in the canonical unit.
    pub const UNIT_ASSUMED: f32 = 0.90;
    /// Unit not found anywhere in the dictionary.
    pub const UNIT_UNRECOGNIZED: f32 = 0.80;
    /// Known unit that the matched parameter does not accept. A clean read
    /// still clears the default threshold so the conflict stays visible.
    pub const UNIT_CONFLICT: f32 = 0.75;
    pub const RANGE_DICTIONARY: f32 = 0.95;
    pub const RANGE_ABSENT: f32 = 0.85;
    /// Line rebuilt from text without layout.
    pub const TEXT_SOURCE: f32 = 0.90;
    /// Canonical value outside the parameter's plausible bounds.
    pub const IMPLAUSIBLE: f32 = 0.50;
    /// Entries whose name is not in the dictionary.
    pub const UNCLASSIFIED: f32 = 0.30;
}

/// Longest token still considered a unit when it carries no unit symbol.
const MAX_BARE_UNIT_CHARS: usize = 5;

/// Words that follow values on report lines but are never units.
const NOT_UNITS: &[&str] = &[
    "a", "ate", "de", "to", "up", "h", "l", "n", "alto", "alta", "baixo", "baixa", "normal",
    "ref", "vr", "valor", "anos", "acima", "abaixo", "menor", "maior", "nd", "obs",
];

/// Patient facts used to pick sex/age-specific dictionary ranges.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeContext {
    pub sex: Option<Sex>,
    pub age: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterExtraction {
    /// Document order; at most one entry per canonical name.
    pub parameters: Vec<ExtractedParameter>,
    pub unclassified: Vec<UnclassifiedEntry>,
    /// Per line index: a dictionary parameter was read from the line.
    pub consumed: Vec<bool>,
}

/// Measurement-shaped content of one line, before dictionary matching.
#[derive(Debug, Clone, PartialEq)]
struct LineReading {
    name: String,
    number: PrintedNumber,
    raw_unit: Option<String>,
    range: Option<PrintedRange>,
}

/// Read test results from reconstructed lines.
///
/// `skip_unclassified` marks lines (usually identity-field lines) that never
/// produce unclassified entries.
pub fn extract_parameters(
    lines: &[LogicalLine],
    dictionary: &ParameterDictionary,
    context: &RangeContext,
    options: &ExtractOptions,
    skip_unclassified: &[bool],
) -> ParameterExtraction {
    let mut result = ParameterExtraction {
        consumed: vec![false; lines.len()],
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(reading) = read_line(&line.text, dictionary) else {
            continue;
        };

        match lookup_name(&reading.name, dictionary, options.fuzzy_floor) {
            Some((index, similarity)) => {
                let Some(def) = dictionary.definition(index) else {
                    continue;
                };
                result.consumed[i] = true;
                if !seen.insert(def.canonical_name.clone()) {
                    tracing::debug!(
                        parameter = def.canonical_name.as_str(),
                        line = line.index,
                        "Duplicate parameter dropped"
                    );
                    continue;
                }
                result.parameters.push(build_parameter(
                    line, &reading, index, def, similarity, dictionary, context,
                ));
            }
            None => {
                let skip = skip_unclassified.get(i).copied().unwrap_or(false);
                if options.include_unclassified
                    && !skip
                    && reading.name.chars().filter(|c| c.is_alphabetic()).count() >= 2
                {
                    result.unclassified.push(UnclassifiedEntry {
                        raw_name: reading.name.clone(),
                        value: reading.number.value,
                        raw_unit: reading.raw_unit.clone(),
                        reference_range: reading.range.and_then(|r| r.resolve(Reading::Decimal)),
                        confidence: (line.min_confidence * factors::UNCLASSIFIED * source_factor(line))
                            .clamp(0.0, 1.0),
                        line_index: line.index,
                        source_text: line.text.clone(),
                    });
                }
            }
        }
    }

    tracing::debug!(
        parameters = result.parameters.len(),
        unclassified = result.unclassified.len(),
        lines = lines.len(),
        "Parameters extracted"
    );
    result
}

/// Exact or fuzzy match of the printed name; a parenthesized suffix
/// ("Hemoglobina Glicada (HbA1c)") is retried without it.
fn lookup_name(name: &str, dictionary: &ParameterDictionary, floor: f64) -> Option<(usize, f64)> {
    let found = dictionary.lookup(name, floor).or_else(|| {
        let head = name.split('(').next().unwrap_or_default();
        (head.len() < name.len()).then(|| dictionary.lookup(head, floor)).flatten()
    })?;
    Some((found.index, found.similarity))
}

fn source_factor(line: &LogicalLine) -> f32 {
    if line.source == LineSource::Text {
        factors::TEXT_SOURCE
    } else {
        1.0
    }
}

fn build_parameter(
    line: &LogicalLine,
    reading: &LineReading,
    index: usize,
    def: &ParameterDefinition,
    similarity: f64,
    dictionary: &ParameterDictionary,
    context: &RangeContext,
) -> ExtractedParameter {
    let (resolution, scale) = match reading.raw_unit.as_deref() {
        None => (UnitResolution::Assumed, Some(1.0)),
        Some(unit) => match dictionary.unit_factor(index, unit) {
            Some(_) if dictionary.is_canonical_unit(index, unit) => (UnitResolution::Canonical, Some(1.0)),
            Some(factor) => (UnitResolution::Converted, Some(factor)),
            None if dictionary.is_known_unit(unit) => (UnitResolution::Conflict, None),
            None => (UnitResolution::Unrecognized, None),
        },
    };
    let unit_factor = match resolution {
        UnitResolution::Canonical | UnitResolution::Converted => 1.0,
        UnitResolution::Assumed => factors::UNIT_ASSUMED,
        UnitResolution::Unrecognized => factors::UNIT_UNRECOGNIZED,
        UnitResolution::Conflict => factors::UNIT_CONFLICT,
    };

    let value_reading = choose_reading(&reading.number, def, scale);
    let number = reading.number.reading(value_reading);
    let value = scale.map_or(number, |s| number * s);

    let document_range = reading.range.and_then(|printed| {
        let range_reading = if value_reading == Reading::Grouped {
            Reading::Grouped
        } else {
            choose_range_reading(&printed, def, scale)
        };
        printed
            .resolve(range_reading)
            .map(|r| scale.map_or(r, |s| r.scaled(s)))
    });
    let (reference_range, range_source) = match document_range {
        Some(range) => (Some(range), RangeSource::Document),
        // Dictionary ranges are in canonical units; never apply them to raw values.
        None if scale.is_some() => match def.default_range_for(context.sex, context.age) {
            Some(range) => (Some(range), RangeSource::Dictionary),
            None => (None, RangeSource::Absent),
        },
        None => (None, RangeSource::Absent),
    };
    let range_factor = match range_source {
        RangeSource::Document => 1.0,
        RangeSource::Dictionary => factors::RANGE_DICTIONARY,
        RangeSource::Absent => factors::RANGE_ABSENT,
    };

    let plausibility_factor = if scale.is_some() && !def.is_plausible(value) {
        tracing::debug!(
            parameter = def.canonical_name.as_str(),
            value,
            "Value outside plausible bounds"
        );
        factors::IMPLAUSIBLE
    } else {
        1.0
    };

    let confidence = (line.min_confidence
        * similarity as f32
        * unit_factor
        * range_factor
        * source_factor(line)
        * plausibility_factor)
        .clamp(0.0, 1.0);

    let unit = if scale.is_some() {
        def.canonical_unit.clone()
    } else {
        reading.raw_unit.clone().unwrap_or_else(|| def.canonical_unit.clone())
    };

    // With a conflicting unit the printed range may belong to another unit
    // on the same line, so it is reported but not judged against.
    let judged_range = reference_range.filter(|_| resolution != UnitResolution::Conflict);

    ExtractedParameter {
        name: def.canonical_name.clone(),
        value,
        unit,
        raw_unit: reading.raw_unit.clone(),
        unit_resolution: resolution,
        reference_range,
        range_source,
        status: judged_range.map_or(ParameterStatus::Indeterminate, |r| r.status(value)),
        critical: judged_range.is_some_and(|r| r.is_critical(value)),
        category: def.category,
        confidence,
        line_index: line.index,
        source_text: line.text.clone(),
    }
}

/// Thousands reading only when it is the plausible one.
fn choose_reading(number: &PrintedNumber, def: &ParameterDefinition, scale: Option<f64>) -> Reading {
    match (number.grouped, scale) {
        (Some(grouped), Some(s)) if !def.is_plausible(number.value * s) && def.is_plausible(grouped * s) => {
            Reading::Grouped
        }
        _ => Reading::Decimal,
    }
}

fn choose_range_reading(range: &PrintedRange, def: &ParameterDefinition, scale: Option<f64>) -> Reading {
    let Some(s) = scale else {
        return Reading::Decimal;
    };
    if !range.is_ambiguous() {
        return Reading::Decimal;
    }
    let plausible = |r: Option<ReferenceRange>| {
        r.is_some_and(|r| {
            [r.min, r.max]
                .into_iter()
                .flatten()
                .all(|bound| def.is_plausible(bound * s))
        })
    };
    if !plausible(range.resolve(Reading::Decimal)) && plausible(range.resolve(Reading::Grouped)) {
        Reading::Grouped
    } else {
        Reading::Decimal
    }
}

// ═══════════════════════════════════════════════════════════
// Line tokenization
// ═══════════════════════════════════════════════════════════

fn trim_unit(token: &str) -> &str {
    token
        .trim_start_matches('(')
        .trim_end_matches([',', ';', ')', '.'])
}

/// Token shaped like a unit: a letter or unit symbol, only unit characters,
/// and either a unit symbol or a short length.
fn looks_like_unit(token: &str) -> bool {
    let t = trim_unit(token);
    if t.is_empty() || t.starts_with(['.', '-']) {
        return false;
    }
    let symbols = ['/', '%', '^', '³', '²', 'µ', 'μ', '×'];
    let has_symbol = t.contains(symbols);
    let has_letter = t.chars().any(char::is_alphabetic);
    let charset_ok = t
        .chars()
        .all(|c| c.is_alphanumeric() || symbols.contains(&c) || c == '.');
    charset_ok
        && (has_letter || t == "%")
        && (has_symbol || t.chars().count() <= MAX_BARE_UNIT_CHARS)
        && !NOT_UNITS.contains(&normalize_name(t).as_str())
}

fn acceptable_suffix(suffix: &str) -> bool {
    suffix.is_empty() || suffix.chars().all(|c| matches!(c, ',' | ';' | '.' | ')')) || looks_like_unit(suffix)
}

/// Split a line into name, first value, unit and reference range.
fn read_line(text: &str, dictionary: &ParameterDictionary) -> Option<LineReading> {
    let normalized: String = text
        .chars()
        .map(|c| if matches!(c, '|' | ':' | ';' | '\t' | '=') { ' ' } else { c })
        .collect();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    let (value_at, token) = tokens
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(i, t)| {
            split_numeric_token(t)
                .filter(|n| acceptable_suffix(n.suffix))
                .map(|n| (i, n))
        })?;

    let mut name_tokens = &tokens[..value_at];
    while let Some((last, rest)) = name_tokens.split_last() {
        if last.chars().any(char::is_alphanumeric) {
            break;
        }
        name_tokens = rest;
    }
    let name = name_tokens.join(" ");
    if !name.chars().any(char::is_alphabetic) {
        return None;
    }
    if token.flagged {
        tracing::debug!(name = name.as_str(), "Value printed with an abnormal marker");
    }

    // Unit: glued suffix, then the next token or two, then any known unit later on.
    let glued = trim_unit(token.suffix);
    let mut range_from = value_at + 1;
    let raw_unit = if !glued.is_empty() && looks_like_unit(glued) {
        Some(glued.to_string())
    } else if let Some(next) = tokens.get(value_at + 1).map(|t| trim_unit(t)) {
        let pair = tokens
            .get(value_at + 2)
            .map(|t| format!("{next}{}", trim_unit(t)));
        if dictionary.is_known_unit(next) {
            range_from += 1;
            Some(next.to_string())
        } else if let Some(pair) = pair.filter(|p| dictionary.is_known_unit(p)) {
            range_from += 2;
            Some(pair)
        } else if looks_like_unit(next) {
            range_from += 1;
            Some(next.to_string())
        } else {
            tokens[value_at + 1..]
                .iter()
                .map(|t| trim_unit(t))
                .find(|t| dictionary.is_known_unit(t))
                .map(str::to_string)
        }
    } else {
        None
    };

    let rest = tokens.get(range_from..).unwrap_or_default().join(" ");
    Some(LineReading {
        name,
        number: token.number,
        raw_unit,
        range: parse_reference_range(&rest),
    })
}
