//! Column detection for plain-text OCR output.
//!
//! Engines that return text without layout still keep the column structure
//! of a results table as tabs, pipes or aligned runs of spaces. These helpers
//! recover the cells of such a row.

/// Check if a line looks like a table row (has column structure).
///
/// Patterns detected:
/// - Tab-separated: "Hemoglobina\t14,2\tg/dL"
/// - Pipe-separated: "Hemoglobina | 14,2 | g/dL"
/// - Multi-space aligned: "Hemoglobina    14,2    g/dL"
pub fn is_tabular_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.chars().count() < 5 {
        return false;
    }

    // Three columns at least: name, value and unit or range
    trimmed.matches('\t').count() >= 2
        || trimmed.matches('|').count() >= 2
        || count_multi_space_gaps(trimmed) >= 2
}

/// Split a tabular line into trimmed, non-empty cells.
/// Non-tabular lines come back as a single cell.
pub fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    if !is_tabular_line(trimmed) {
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;

    for ch in trimmed.chars() {
        match ch {
            '\t' | '|' => {
                push_cell(&mut cells, &current);
                current.clear();
                spaces = 0;
            }
            ' ' => {
                spaces += 1;
                if spaces == 3 {
                    push_cell(&mut cells, &current);
                    current.clear();
                } else if spaces < 3 {
                    current.push(ch);
                }
            }
            _ => {
                spaces = 0;
                current.push(ch);
            }
        }
    }
    push_cell(&mut cells, &current);
    cells
}

fn push_cell(cells: &mut Vec<String>, raw: &str) {
    let cell = raw.trim();
    if !cell.is_empty() {
        cells.push(cell.to_string());
    }
}

/// Runs of three or more spaces with text on both sides.
fn count_multi_space_gaps(text: &str) -> usize {
    let mut count = 0;
    let mut in_gap = false;
    let mut gap_len = 0;

    for ch in text.chars() {
        if ch == ' ' {
            gap_len += 1;
            if gap_len >= 3 && !in_gap {
                in_gap = true;
                count += 1;
            }
        } else {
            in_gap = false;
            gap_len = 0;
        }
    }

    count
}
