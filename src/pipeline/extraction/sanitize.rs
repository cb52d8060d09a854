/// Sanitize recognized text before layout reconstruction.
/// Strips control characters, keeps line breaks and the punctuation that
/// carries meaning in lab reports (units, ranges, qualifiers).
pub fn sanitize_fragment_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '\t' || *c == '\n' || is_medical_symbol(*c))
        .collect::<String>()
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse every whitespace run (line breaks included) into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_medical_symbol(c: char) -> bool {
    matches!(
        c,
        '.' | ','
            | ';'
            | ':'
            | '-'
            | '/'
            | '('
            | ')'
            | '['
            | ']'
            | '+'
            | '='
            | '%'
            | '#'
            | '&'
            | '\''
            | '"'
            | '<'
            | '>'
            | '*'
            | '_'
            | '|'
            | '^'
            | '°'
            | 'º'
            | '²'
            | '³'
            | 'µ'
            | 'μ' // Greek small mu, emitted by some engines instead of the micro sign
            | '≤'
            | '≥'
            | '×'
            | '\u{2013}' // En-dash
            | '\u{2014}' // Em-dash
            | '\u{2019}'
            | '\u{2018}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let raw = "Glicose: 90\x01\x02\x03 mg/dL\nData: 15/06/2024";
        let clean = sanitize_fragment_text(raw);
        assert!(!clean.contains('\x01'));
        assert!(clean.contains("90 mg/dL"));
        assert!(clean.contains("15/06/2024"));
    }

    #[test]
    fn preserves_units_and_ranges() {
        let raw = "Leucócitos: 7.200 /mm³ (4.000–11.000)";
        assert_eq!(sanitize_fragment_text(raw), raw);
        let raw = "TSH 2,1 μUI/mL ≤ 4,0";
        assert_eq!(sanitize_fragment_text(raw), raw);
    }

    #[test]
    fn keeps_table_separators() {
        let raw = "Hemoglobina\t14,2\tg/dL | 12,0 - 16,0";
        assert_eq!(sanitize_fragment_text(raw), raw);
    }

    #[test]
    fn collapses_blank_lines() {
        let raw = "Linha um\n\n\n\nLinha dois\n\n\nLinha três";
        assert_eq!(sanitize_fragment_text(raw), "Linha um\nLinha dois\nLinha três");
    }

    #[test]
    fn only_control_chars_returns_empty() {
        assert_eq!(sanitize_fragment_text("\x00\x01\x02"), "");
        assert_eq!(sanitize_fragment_text(""), "");
    }

    #[test]
    fn preserves_portuguese_characters() {
        let raw = "Hematócrito ção ã õ ê ü";
        assert_eq!(sanitize_fragment_text(raw), raw);
    }

    #[test]
    fn collapse_joins_lines() {
        assert_eq!(collapse_whitespace("  a\t b\n c  "), "a b c");
    }
}
