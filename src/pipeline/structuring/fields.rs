//! Patient and laboratory identity fields.
//!
//! Labels are found with a static rule table. Each rule carries a strength:
//! a field keeps the first value it receives unless a strictly stronger rule
//! offers another one later in the document.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use super::types::{LaboratoryInfo, LogicalLine, PatientInfo};
use crate::models::enums::Sex;

/// Oldest age accepted from a report.
const MAX_AGE: u32 = 130;

/// Shortest accepted person name, in characters.
const MIN_NAME_CHARS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    PatientName,
    Age,
    Sex,
    DocumentId,
    BirthDate,
    LabName,
    Responsible,
    CollectionDate,
}

struct FieldRule {
    field: Field,
    strength: u8,
    label: Regex,
}

/// Label followed by an optional `:` / `-` separator.
fn label(field: Field, strength: u8, alternatives: &str) -> FieldRule {
    FieldRule {
        field,
        strength,
        label: Regex::new(&format!(r"(?i)\b(?:{alternatives})(?:\.|\b)\s*[:\-–]?\s*")).unwrap(),
    }
}

/// Label that only counts when followed by a colon.
fn colon_label(field: Field, strength: u8, alternatives: &str) -> FieldRule {
    FieldRule {
        field,
        strength,
        label: Regex::new(&format!(r"(?i)\b(?:{alternatives})\s*:\s*")).unwrap(),
    }
}

static FIELD_RULES: LazyLock<Vec<FieldRule>> = LazyLock::new(|| {
    vec![
        label(
            Field::PatientName,
            3,
            r"nome\s+d[oa]\s+paciente|paciente|patient\s+name|patient|nombre|nome|cliente",
        ),
        label(Field::Age, 3, r"idade|edad|age"),
        label(Field::Sex, 3, r"sexo|g[eê]nero|gender|sex"),
        label(Field::DocumentId, 3, r"rg|cpf|documento|prontu[aá]rio|registro"),
        label(
            Field::BirthDate,
            3,
            r"data\s+de\s+nascimento|data\s+nasc|dt\.?\s*nasc|nascimento|nascido\s+em|date\s+of\s+birth|dob|fecha\s+de\s+nacimiento",
        ),
        colon_label(Field::LabName, 3, r"laborat[oó]rio|laboratory|unidade|lab"),
        label(
            Field::Responsible,
            3,
            r"respons[aá]vel\s+t[eé]cnic[oa]|respons[aá]vel|m[eé]dic[oa]\s+solicitante|m[eé]dic[oa]|solicitante|bioqu[ií]mic[oa]|physician",
        ),
        label(Field::Responsible, 2, r"dra|dr"),
        label(
            Field::CollectionDate,
            3,
            r"data\s+d[ae]\s+coleta|coletado\s+em|coleta|collection\s+date|data\s+do\s+exame|fecha\s+de\s+toma",
        ),
        label(Field::CollectionDate, 2, r"data|date|fecha"),
    ]
});

/// "45 anos" anywhere on a line.
static AGE_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,3})\s*(?:anos?|años?|years?)\b").unwrap());

/// Report header naming the laboratory, without a separator.
static LAB_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*laborat[oó]rio\b[^:]*$").unwrap());

const INFERRED: u8 = 1;

static FIRST_INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{1,3}").unwrap());

static DOCUMENT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.\-/]*[\dXx]").unwrap());

static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/.\-]\d{1,2}[/.\-](?:\d{4}|\d{2}))\b").unwrap()
});

static TEXTUAL_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*[º°o]?\s+de\s+([a-zç]+)\s+de\s+(\d{4})\b").unwrap()
});

/// Identity fields found in a document, plus which lines they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldExtraction {
    pub patient: PatientInfo,
    pub laboratory: LaboratoryInfo,
    /// Per line index: the line carried a field label or a labelled value.
    pub labelled_lines: Vec<bool>,
}

struct Slot<T> {
    value: Option<T>,
    strength: u8,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: None,
            strength: 0,
        }
    }
}

impl<T> Slot<T> {
    fn offer(&mut self, value: Option<T>, strength: u8) -> bool {
        match value {
            Some(v) if self.value.is_none() || strength > self.strength => {
                self.value = Some(v);
                self.strength = strength;
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
struct FieldSlots {
    name: Slot<String>,
    age: Slot<u32>,
    sex: Slot<Sex>,
    document_id: Slot<String>,
    birth_date: Slot<NaiveDate>,
    lab_name: Slot<String>,
    responsible: Slot<String>,
    collection_date: Slot<NaiveDate>,
}

impl FieldSlots {
    fn offer(&mut self, field: Field, raw: &str, strength: u8) -> bool {
        match field {
            Field::PatientName => self.name.offer(normalize_person_name(raw), strength),
            Field::Age => self.age.offer(parse_age(raw), strength),
            Field::Sex => self.sex.offer(Sex::parse_label(raw), strength),
            Field::DocumentId => self.document_id.offer(parse_document_id(raw), strength),
            Field::BirthDate => self.birth_date.offer(parse_report_date(raw), strength),
            Field::LabName => self.lab_name.offer(normalize_lab_name(raw), strength),
            Field::Responsible => self.responsible.offer(normalize_person_name(raw), strength),
            Field::CollectionDate => self.collection_date.offer(parse_report_date(raw), strength),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LabelHit {
    start: usize,
    end: usize,
    field: Field,
    strength: u8,
}

/// Non-overlapping label occurrences in line order; longer labels win overlaps.
fn find_labels(text: &str) -> Vec<LabelHit> {
    let mut hits: Vec<LabelHit> = FIELD_RULES
        .iter()
        .flat_map(|rule| {
            rule.label.find_iter(text).map(move |m| LabelHit {
                start: m.start(),
                end: m.end(),
                field: rule.field,
                strength: rule.strength,
            })
        })
        .collect();
    hits.sort_by(|a, b| (b.end - b.start).cmp(&(a.end - a.start)).then(a.start.cmp(&b.start)));

    let mut accepted: Vec<LabelHit> = Vec::new();
    for hit in hits {
        if accepted.iter().all(|a| hit.end <= a.start || hit.start >= a.end) {
            accepted.push(hit);
        }
    }
    accepted.sort_by_key(|h| h.start);
    accepted
}

/// Read patient and laboratory fields from reconstructed lines.
pub fn extract_fields(lines: &[LogicalLine]) -> FieldExtraction {
    let mut slots = FieldSlots::default();
    let mut labelled = vec![false; lines.len()];
    let label_hits: Vec<Vec<LabelHit>> = lines.iter().map(|l| find_labels(&l.text)).collect();

    for (i, line) in lines.iter().enumerate() {
        let hits = &label_hits[i];
        if !hits.is_empty() {
            labelled[i] = true;
        }

        let mut k = 0;
        while k < hits.len() {
            let hit = hits[k];
            // Same-field labels inside a value belong to it ("Médico: Dr. ...").
            let mut next = k + 1;
            while next < hits.len() && hits[next].field == hit.field {
                next += 1;
            }
            let end = hits.get(next).map_or(line.text.len(), |h| h.start);
            let value = line.text[hit.end..end].trim().trim_matches([':', '-', '–']).trim();

            if !value.is_empty() {
                slots.offer(hit.field, value, hit.strength);
            } else if next == hits.len() {
                // Label alone at the end of the line: the value is on the next one.
                if let Some(following) = lines.get(i + 1) {
                    if label_hits[i + 1].is_empty() {
                        slots.offer(hit.field, following.text.trim(), hit.strength);
                        labelled[i + 1] = true;
                    }
                }
            }
            k = next;
        }

        if let Some(caps) = AGE_IN_TEXT.captures(&line.text) {
            slots.age.offer(caps.get(1).and_then(|m| parse_age(m.as_str())), INFERRED);
        }
        if hits.is_empty()
            && LAB_HEADER.is_match(&line.text)
            && slots.lab_name.offer(normalize_lab_name(&line.text), INFERRED)
        {
            labelled[i] = true;
        }
    }

    if slots.age.value.is_none() {
        if let (Some(birth), Some(collected)) = (slots.birth_date.value, slots.collection_date.value) {
            slots.age.offer(age_at(birth, collected), INFERRED);
        }
    }

    tracing::debug!(
        patient_name = slots.name.value.is_some(),
        age = slots.age.value.is_some(),
        sex = slots.sex.value.is_some(),
        lab_name = slots.lab_name.value.is_some(),
        collection_date = slots.collection_date.value.is_some(),
        "Identity fields extracted"
    );

    FieldExtraction {
        patient: PatientInfo {
            name: slots.name.value,
            age: slots.age.value,
            sex: slots.sex.value,
            document_id: slots.document_id.value,
            birth_date: slots.birth_date.value,
        },
        laboratory: LaboratoryInfo {
            name: slots.lab_name.value,
            responsible: slots.responsible.value,
            date: slots.collection_date.value,
        },
        labelled_lines: labelled,
    }
}

// ═══════════════════════════════════════════════════════════
// Value normalization
// ═══════════════════════════════════════════════════════════

const HONORIFICS: &[&str] = &["sr", "sra", "srta", "dr", "dra", "prof", "profa", "mr", "mrs", "ms"];

const NAME_PARTICLES: &[&str] = &["da", "de", "do", "das", "dos", "e", "del", "la"];

/// Professional council registrations printed after a signer's name.
const REGISTRY_TOKENS: &[&str] = &["crm", "crf", "crbm", "crbio", "coren", "cro", "crn"];

/// `CRM`, `CRM-SP`, `CRBio/RJ`, `CRF:`.
fn is_registry_token(word: &str) -> bool {
    let head = word
        .split(['-', '/', ':'])
        .next()
        .unwrap_or(word)
        .trim_end_matches('.')
        .to_lowercase();
    REGISTRY_TOKENS.contains(&head.as_str())
}

fn is_name_word(word: &str) -> bool {
    word.chars().any(char::is_alphabetic)
        && word
            .chars()
            .all(|c| c.is_alphabetic() || c == '-' || c == '\'' || c == '.')
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title_case(words: &[&str]) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let lower = w.to_lowercase();
            if i > 0 && NAME_PARTICLES.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(w)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Person name: honorifics stripped, title-cased, at least two words.
/// Reading stops at a council registration or the first token that is
/// not a word ("CRM 1234", "CRM-SP", "12345").
pub fn normalize_person_name(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw
        .split_whitespace()
        .map(|w| w.trim_matches([',', ';']))
        .take_while(|w| is_name_word(w) && !is_registry_token(w))
        .map(|w| w.trim_end_matches('.'))
        .filter(|w| !w.is_empty())
        .skip_while(|w| HONORIFICS.contains(&w.to_lowercase().as_str()))
        .collect();
    if words.len() < 2 {
        return None;
    }
    let name = title_case(&words);
    (name.chars().count() >= MIN_NAME_CHARS).then_some(name)
}

fn normalize_lab_name(raw: &str) -> Option<String> {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>();
    let joined = cleaned.join(" ");
    let joined = joined.trim_matches(['.', ',', ';', '-', ':']).trim();
    if joined.chars().filter(|c| c.is_alphabetic()).count() < 3 {
        return None;
    }
    if joined.chars().any(char::is_lowercase) {
        Some(joined.to_string())
    } else {
        Some(title_case(&joined.split(' ').collect::<Vec<_>>()))
    }
}

fn parse_age(raw: &str) -> Option<u32> {
    let age: u32 = FIRST_INTEGER.find(raw)?.as_str().parse().ok()?;
    (age <= MAX_AGE).then_some(age)
}

fn parse_document_id(raw: &str) -> Option<String> {
    DOCUMENT_NUMBER
        .find_iter(raw)
        .map(|m| m.as_str())
        .find(|s| s.chars().filter(char::is_ascii_digit).count() >= 4)
        .map(str::to_string)
}

fn age_at(birth: NaiveDate, on: NaiveDate) -> Option<u32> {
    let mut years = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok().filter(|a| *a <= MAX_AGE)
}

/// First date printed in `text`.
///
/// Supports ISO `YYYY-MM-DD`, day-first numeric dates with `/`, `-` or `.`
/// and two- or four-digit years, and Portuguese textual dates such as
/// "15 de junho de 2024".
pub fn parse_report_date(text: &str) -> Option<NaiveDate> {
    for m in NUMERIC_DATE.find_iter(text) {
        if let Some(date) = parse_numeric_date(m.as_str()) {
            return Some(date);
        }
    }
    let caps = TEXTUAL_DATE.captures(text)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month = portuguese_month(&caps.get(2)?.as_str().to_lowercase())?;
    let year: i32 = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_numeric_date(token: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Some(d);
    }
    let unified = token.replace(['.', '-'], "/");
    let year_digits = unified.rsplit('/').next().map_or(0, str::len);
    let format = if year_digits == 2 { "%d/%m/%y" } else { "%d/%m/%Y" };
    NaiveDate::parse_from_str(&unified, format).ok()
}

fn portuguese_month(name: &str) -> Option<u32> {
    let month = match name {
        "janeiro" => 1,
        "fevereiro" => 2,
        "março" | "marco" => 3,
        "abril" => 4,
        "maio" => 5,
        "junho" => 6,
        "julho" => 7,
        "agosto" => 8,
        "setembro" => 9,
        "outubro" => 10,
        "novembro" => 11,
        "dezembro" => 12,
        _ => return None,
    };
    Some(month)
}
