//! Numbers and reference intervals as printed on lab reports.
//!
//! Reports mix Brazilian (`1.234,5`) and international (`1,234.5`) notation.
//! A lone separator followed by exactly three digits (`7.200`) cannot be
//! decided from the text alone; both readings are kept and the caller picks
//! one against the parameter's plausible bounds.

use std::sync::LazyLock;

use regex::Regex;

use super::types::ReferenceRange;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintedNumber {
    /// Reading with the last separator as decimal mark.
    pub value: f64,
    /// Thousands reading, only for ambiguous `d.ddd` / `d,ddd` forms.
    pub grouped: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Decimal,
    Grouped,
}

impl PrintedNumber {
    fn exact(value: f64) -> Self {
        Self {
            value,
            grouped: None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.grouped.is_some()
    }

    pub fn reading(&self, reading: Reading) -> f64 {
        match reading {
            Reading::Decimal => self.value,
            Reading::Grouped => self.grouped.unwrap_or(self.value),
        }
    }
}

/// Parse a bare number made of digits, `.` and `,`.
pub fn parse_number(raw: &str) -> Option<PrintedNumber> {
    let s = raw.trim();
    if !s.starts_with(|c: char| c.is_ascii_digit() || c == '.' || c == ',')
        || !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',')
        || !s.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }

    let dots = s.matches('.').count();
    let commas = s.matches(',').count();
    match (dots, commas) {
        (0, 0) => s.parse().ok().map(PrintedNumber::exact),
        (d, c) if d > 0 && c > 0 => {
            // Mixed separators: the last one is the decimal mark.
            let last = s.rfind(['.', ','])?;
            let mark = if s[last..].starts_with('.') { '.' } else { ',' };
            let group_mark = if mark == '.' { ',' } else { '.' };
            let (int_part, frac) = (&s[..last], &s[last + 1..]);
            if int_part.contains(mark) || frac.is_empty() {
                return None;
            }
            let digits = ungroup(int_part, group_mark)?;
            format!("{digits}.{frac}").parse().ok().map(PrintedNumber::exact)
        }
        (1, 0) | (0, 1) => {
            let mark = if dots == 1 { '.' } else { ',' };
            let (int_part, frac) = s.split_once(mark)?;
            let int_digits = if int_part.is_empty() { "0" } else { int_part };
            let value: f64 = if frac.is_empty() {
                int_digits.parse().ok()?
            } else {
                format!("{int_digits}.{frac}").parse().ok()?
            };
            let grouped = if frac.len() == 3
                && (1..=3).contains(&int_part.len())
                && !int_part.starts_with('0')
            {
                format!("{int_part}{frac}").parse().ok()
            } else {
                None
            };
            Some(PrintedNumber { value, grouped })
        }
        _ => {
            // Repeated separator of one kind can only be grouping.
            let mark = if dots > 0 { '.' } else { ',' };
            ungroup(s, mark)?.parse().ok().map(PrintedNumber::exact)
        }
    }
}

/// Digits of a thousands-grouped integer, if the grouping is well formed.
fn ungroup(s: &str, mark: char) -> Option<String> {
    let mut groups = s.split(mark);
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return if s.contains(mark) { None } else { Some(s.to_string()) };
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 {
            return None;
        }
        digits.push_str(group);
    }
    Some(digits)
}

/// A token that starts with a number, possibly with a unit glued on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericToken<'a> {
    pub number: PrintedNumber,
    /// Text after the number (`g/dL` in `14.2g/dL`).
    pub suffix: &'a str,
    /// A `<`, `>`, `≤` or `≥` preceded the number.
    pub qualified: bool,
    /// The lab marked the result as abnormal (`10,2*`, `180↑`).
    pub flagged: bool,
}

/// Abnormal-result markers printed right after a value.
const FLAG_MARKERS: &[char] = &['*', '↑', '↓', '!', '+'];

pub fn split_numeric_token(token: &str) -> Option<NumericToken<'_>> {
    let rest = token.trim_start_matches(['<', '>', '≤', '≥', '=']);
    let qualified = rest.len() != token.len();
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(rest.len());
    // Sentence punctuation after the number is not part of it.
    let number = rest[..end].trim_end_matches(['.', ',']);
    if !number.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let after = &rest[number.len()..];
    let suffix = after.trim_start_matches(FLAG_MARKERS);
    Some(NumericToken {
        number: parse_number(number)?,
        suffix,
        qualified,
        flagged: suffix.len() != after.len(),
    })
}

// ═══════════════════════════════════════════════════════════
// Reference intervals
// ═══════════════════════════════════════════════════════════

const NUM: &str = r"(\d+(?:[.,]\d+)*)";

static TWO_SIDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){NUM}\s*(?:[-–—]|\baté\b|\bate\b|\ba\b|\bto\b)\s*{NUM}"
    ))
    .unwrap()
});

static UPPER_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:<=|≤|<|\binferior\s+ou\s+igual\s+a\b|\binferior\s+a\b|\bmenor\s+que\b|\baté\b|\bate\b|\bup\s+to\b|\bbelow\b)\s*{NUM}"
    ))
    .unwrap()
});

static LOWER_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(?:>=|≥|>|\bsuperior\s+ou\s+igual\s+a\b|\bsuperior\s+a\b|\bmaior\s+que\b|\bacima\s+de\b|\babove\b)\s*{NUM}"
    ))
    .unwrap()
});

/// Bounds as printed, before a reading is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintedRange {
    pub min: Option<PrintedNumber>,
    pub max: Option<PrintedNumber>,
}

impl PrintedRange {
    pub fn is_ambiguous(&self) -> bool {
        self.min.is_some_and(|n| n.is_ambiguous()) || self.max.is_some_and(|n| n.is_ambiguous())
    }

    /// `None` when the chosen reading gives `min > max`.
    pub fn resolve(&self, reading: Reading) -> Option<ReferenceRange> {
        ReferenceRange::new(
            self.min.map(|n| n.reading(reading)),
            self.max.map(|n| n.reading(reading)),
        )
    }
}

/// First reference interval in `text`: `min–max`, `< max` or `> min` forms.
/// At equal positions the two-sided form wins.
pub fn parse_reference_range(text: &str) -> Option<PrintedRange> {
    let mut best: Option<(usize, PrintedRange)> = None;
    let mut consider = |start: usize, range: PrintedRange| {
        if best.map_or(true, |(s, _)| start < s) {
            best = Some((start, range));
        }
    };

    for caps in TWO_SIDED.captures_iter(text) {
        let (Some(whole), Some(lo), Some(hi)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if let (Some(min), Some(max)) = (parse_number(lo.as_str()), parse_number(hi.as_str())) {
            consider(whole.start(), PrintedRange { min: Some(min), max: Some(max) });
            break;
        }
    }
    for (regex, upper) in [(&*UPPER_ONLY, true), (&*LOWER_ONLY, false)] {
        for caps in regex.captures_iter(text) {
            let (Some(whole), Some(n)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if let Some(bound) = parse_number(n.as_str()) {
                let range = if upper {
                    PrintedRange { min: None, max: Some(bound) }
                } else {
                    PrintedRange { min: Some(bound), max: None }
                };
                consider(whole.start(), range);
                break;
            }
        }
    }

    best.map(|(_, range)| range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> PrintedNumber {
        parse_number(s).unwrap()
    }

    #[test]
    fn plain_and_decimal_numbers() {
        assert_eq!(num("14").value, 14.0);
        assert_eq!(num("14.2").value, 14.2);
        assert_eq!(num("14,2").value, 14.2);
        assert_eq!(num("0,85").value, 0.85);
        assert!(!num("14.2").is_ambiguous());
    }

    #[test]
    fn mixed_separators_use_last_as_decimal() {
        assert_eq!(num("1.234,5").value, 1234.5);
        assert_eq!(num("1,234.5").value, 1234.5);
        assert_eq!(num("250.000,00").value, 250000.0);
        assert!(parse_number("1.23,4.5").is_none());
        assert!(parse_number("12.34,5").is_none());
    }

    #[test]
    fn single_three_digit_group_is_ambiguous() {
        let n = num("7.200");
        assert_eq!(n.value, 7.2);
        assert_eq!(n.grouped, Some(7200.0));
        assert_eq!(num("150,000").reading(Reading::Grouped), 150000.0);
        // Leading zero and long integer parts are always decimal
        assert!(!num("0.500").is_ambiguous());
        assert!(!num("1234.567").is_ambiguous());
    }

    #[test]
    fn repeated_separator_is_grouping() {
        assert_eq!(num("1.250.000").value, 1250000.0);
        assert_eq!(num("1,250,000").value, 1250000.0);
        assert!(parse_number("1.25.000").is_none());
    }

    #[test]
    fn rejects_non_numbers() {
        assert!(parse_number("").is_none());
        assert!(parse_number("abc").is_none());
        assert!(parse_number(".,").is_none());
        assert!(parse_number("12a").is_none());
    }

    #[test]
    fn numeric_token_with_glued_unit() {
        let t = split_numeric_token("14.2g/dL").unwrap();
        assert_eq!(t.number.value, 14.2);
        assert_eq!(t.suffix, "g/dL");
        assert!(!t.qualified);

        let t = split_numeric_token("<0,5").unwrap();
        assert_eq!(t.number.value, 0.5);
        assert!(t.qualified);

        let t = split_numeric_token("98,").unwrap();
        assert_eq!(t.number.value, 98.0);
        assert_eq!(t.suffix, ",");

        assert!(split_numeric_token("(12.0-16.0)").is_none());
        assert!(split_numeric_token("g/dL").is_none());
    }

    #[test]
    fn numeric_token_drops_abnormal_marker() {
        let t = split_numeric_token("10,2*").unwrap();
        assert_eq!(t.number.value, 10.2);
        assert_eq!(t.suffix, "");
        assert!(t.flagged);

        let t = split_numeric_token("180↑mg/dL").unwrap();
        assert_eq!(t.number.value, 180.0);
        assert_eq!(t.suffix, "mg/dL");
        assert!(t.flagged);

        assert!(!split_numeric_token("14.2g/dL").unwrap().flagged);
    }

    #[test]
    fn two_sided_ranges() {
        for text in ["(12.0-16.0)", "12,0 a 16,0", "12 até 16", "12 – 16", "12 to 16"] {
            let r = parse_reference_range(text).unwrap().resolve(Reading::Decimal).unwrap();
            assert_eq!((r.min, r.max), (Some(12.0), Some(16.0)), "{text}");
        }
    }

    #[test]
    fn one_sided_ranges() {
        let r = parse_reference_range("Desejável: < 200").unwrap();
        assert_eq!(r.max.map(|n| n.value), Some(200.0));
        assert!(r.min.is_none());

        let r = parse_reference_range("até 40 U/L").unwrap();
        assert_eq!(r.max.map(|n| n.value), Some(40.0));

        let r = parse_reference_range("acima de 40").unwrap();
        assert_eq!(r.min.map(|n| n.value), Some(40.0));
        assert!(r.max.is_none());

        let r = parse_reference_range("> 60 mL/min").unwrap();
        assert_eq!(r.min.map(|n| n.value), Some(60.0));
    }

    #[test]
    fn earliest_form_wins() {
        let r = parse_reference_range("< 100 (ideal 70-99)").unwrap();
        assert!(r.min.is_none());
        assert_eq!(r.max.map(|n| n.value), Some(100.0));
    }

    #[test]
    fn grouped_range_reading() {
        let r = parse_reference_range("(4.000-11.000)").unwrap();
        assert!(r.is_ambiguous());
        let grouped = r.resolve(Reading::Grouped).unwrap();
        assert_eq!((grouped.min, grouped.max), (Some(4000.0), Some(11000.0)));
    }

    #[test]
    fn inverted_range_does_not_resolve() {
        let r = parse_reference_range("16-12").unwrap();
        assert!(r.resolve(Reading::Decimal).is_none());
        assert!(parse_reference_range("sem referência").is_none());
    }
}
