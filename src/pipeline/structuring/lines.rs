use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::types::LogicalLine;
use super::StructuringError;
use crate::models::enums::LineSource;
use crate::pipeline::extraction::confidence::is_valid_confidence;
use crate::pipeline::extraction::sanitize::{collapse_whitespace, sanitize_fragment_text};
use crate::pipeline::extraction::table_detect::split_cells;
use crate::pipeline::extraction::{BoundingBox, TextFragment};

/// Half-height of the band around an anchor's vertical center that joins
/// other fragments to its line, as a fraction of the anchor height.
const ANCHOR_BAND: f32 = 0.5;

/// Rebuild reading lines from OCR fragments.
///
/// Per page, table rows and geometric lines are ordered top to bottom, then
/// left to right; fragments without geometry follow as text lines in input
/// order. Pages come out in ascending order.
pub fn reconstruct_lines(fragments: &[TextFragment]) -> Result<Vec<LogicalLine>, StructuringError> {
    if fragments.is_empty() {
        return Err(StructuringError::EmptyInput);
    }
    validate_fragments(fragments)?;

    let mut pages: BTreeMap<u32, PageFragments> = BTreeMap::new();
    for (index, fragment) in fragments.iter().enumerate() {
        let clean = sanitize_fragment_text(&fragment.text);
        if clean.is_empty() {
            continue;
        }
        let page = pages.entry(fragment.page).or_default();
        match (fragment.table, fragment.bbox) {
            (Some(_), _) => page.table.push(index),
            (None, Some(_)) => page.geometric.push(index),
            (None, None) => page.plain.push(index),
        }
        page.texts.insert(index, clean);
    }

    let mut lines = Vec::new();
    for (page_number, page) in pages {
        let mut drafts = table_rows(&page, fragments);
        drafts.extend(geometric_rows(&page, fragments));
        drafts.sort_by(|a, b| compare_positions(a.position, b.position));
        drafts.extend(text_rows(&page, fragments));

        tracing::debug!(
            page = page_number,
            table = page.table.len(),
            geometric = page.geometric.len(),
            plain = page.plain.len(),
            lines = drafts.len(),
            "Page lines reconstructed"
        );

        for draft in drafts {
            lines.push(draft.finish(lines.len(), page_number));
        }
    }
    Ok(lines)
}

fn validate_fragments(fragments: &[TextFragment]) -> Result<(), StructuringError> {
    for (index, fragment) in fragments.iter().enumerate() {
        if !is_valid_confidence(fragment.confidence) {
            return Err(StructuringError::CorruptGeometry {
                index,
                reason: format!("confidence {} outside [0, 1]", fragment.confidence),
            });
        }
        if let Some(reason) = fragment.bbox.as_ref().and_then(BoundingBox::defect) {
            return Err(StructuringError::CorruptGeometry {
                index,
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Default)]
struct PageFragments {
    table: Vec<usize>,
    geometric: Vec<usize>,
    plain: Vec<usize>,
    /// Sanitized text per fragment index.
    texts: BTreeMap<usize, String>,
}

impl PageFragments {
    fn text(&self, index: usize) -> &str {
        self.texts.get(&index).map(String::as_str).unwrap_or_default()
    }
}

struct LineDraft {
    cells: Vec<String>,
    confidences: Vec<f32>,
    envelope: Option<BoundingBox>,
    /// (center y, left x); rows without geometry sort last.
    position: Option<(f32, f32)>,
    source: LineSource,
}

impl LineDraft {
    fn from_members(members: &[usize], page: &PageFragments, fragments: &[TextFragment], source: LineSource) -> Self {
        let envelope = members
            .iter()
            .filter_map(|&i| fragments[i].bbox)
            .reduce(|acc, b| acc.union(&b));
        Self {
            cells: members
                .iter()
                .map(|&i| collapse_whitespace(page.text(i)))
                .collect(),
            confidences: members.iter().map(|&i| fragments[i].confidence).collect(),
            envelope,
            position: envelope.map(|e| (e.center_y(), e.x)),
            source,
        }
    }

    fn finish(self, index: usize, page: u32) -> LogicalLine {
        let min_confidence = self.confidences.iter().copied().fold(1.0, f32::min);
        let avg_confidence = if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
        };
        LogicalLine {
            index,
            page,
            text: self.cells.join(" "),
            cells: self.cells,
            min_confidence,
            avg_confidence,
            envelope: self.envelope,
            source: self.source,
        }
    }
}

fn compare_positions(a: Option<(f32, f32)>, b: Option<(f32, f32)>) -> Ordering {
    match (a, b) {
        (Some((ay, ax)), Some((by, bx))) => ay.total_cmp(&by).then(ax.total_cmp(&bx)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// One line per (table, row), cells in column order.
fn table_rows(page: &PageFragments, fragments: &[TextFragment]) -> Vec<LineDraft> {
    let mut rows: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
    for &i in &page.table {
        if let Some(cell) = fragments[i].table {
            rows.entry((cell.table, cell.row)).or_default().push(i);
        }
    }
    rows.into_values()
        .map(|mut members| {
            members.sort_by(|&a, &b| {
                let (ca, cb) = (fragments[a].table, fragments[b].table);
                let col = ca.map(|c| c.column).cmp(&cb.map(|c| c.column));
                let x = |i: usize| fragments[i].bbox.map_or(f32::INFINITY, |b| b.x);
                col.then(x(a).total_cmp(&x(b))).then(a.cmp(&b))
            });
            LineDraft::from_members(&members, page, fragments, LineSource::Table)
        })
        .collect()
}

/// Cluster positioned fragments into lines by vertical center.
///
/// Fragments are visited tallest first. A fragment whose center lies within
/// an existing anchor's band joins the nearest such anchor's line; otherwise
/// it anchors a new line. Superscripts and subscripts therefore attach to
/// the full-height text beside them.
fn geometric_rows(page: &PageFragments, fragments: &[TextFragment]) -> Vec<LineDraft> {
    struct Cluster {
        anchor: BoundingBox,
        members: Vec<usize>,
    }

    let mut order: Vec<(usize, BoundingBox)> = page
        .geometric
        .iter()
        .filter_map(|&i| fragments[i].bbox.map(|b| (i, b)))
        .collect();
    order.sort_by(|(ia, a), (ib, b)| b.height.total_cmp(&a.height).then(ia.cmp(ib)));

    let mut clusters: Vec<Cluster> = Vec::new();
    for (index, bbox) in order {
        let center = bbox.center_y();
        let nearest = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| (center - c.anchor.center_y()).abs() <= c.anchor.height * ANCHOR_BAND)
            .min_by(|(_, a), (_, b)| {
                let da = (center - a.anchor.center_y()).abs();
                let db = (center - b.anchor.center_y()).abs();
                da.total_cmp(&db)
            })
            .map(|(k, _)| k);
        match nearest {
            Some(k) => clusters[k].members.push(index),
            None => clusters.push(Cluster {
                anchor: bbox,
                members: vec![index],
            }),
        }
    }

    clusters
        .into_iter()
        .map(|mut cluster| {
            cluster.members.sort_by(|&a, &b| {
                let x = |i: usize| fragments[i].bbox.map_or(0.0, |b| b.x);
                x(a).total_cmp(&x(b)).then(a.cmp(&b))
            });
            LineDraft::from_members(&cluster.members, page, fragments, LineSource::Geometry)
        })
        .collect()
}

/// Fragments without layout, split on the engine's own line breaks.
fn text_rows(page: &PageFragments, fragments: &[TextFragment]) -> Vec<LineDraft> {
    let mut drafts = Vec::new();
    for &i in &page.plain {
        for raw_line in page.text(i).lines() {
            let cells: Vec<String> = split_cells(raw_line)
                .iter()
                .map(|c| collapse_whitespace(c))
                .filter(|c| !c.is_empty())
                .collect();
            if cells.is_empty() {
                continue;
            }
            drafts.push(LineDraft {
                cells,
                confidences: vec![fragments[i].confidence],
                envelope: None,
                position: None,
                source: LineSource::Text,
            });
        }
    }
    drafts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[LogicalLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(reconstruct_lines(&[]), Err(StructuringError::EmptyInput));
    }

    #[test]
    fn corrupt_geometry_is_an_error() {
        let frags = vec![
            TextFragment::new("ok", 0.9).with_bbox(0.0, 0.0, 10.0, 10.0),
            TextFragment::new("bad", 0.9).with_bbox(0.0, 0.0, 0.0, 10.0),
        ];
        assert!(matches!(
            reconstruct_lines(&frags),
            Err(StructuringError::CorruptGeometry { index: 1, .. })
        ));

        let nan = vec![TextFragment::new("x", 0.9).with_bbox(f32::NAN, 0.0, 5.0, 5.0)];
        assert!(reconstruct_lines(&nan).is_err());
    }

    #[test]
    fn bad_confidence_is_an_error() {
        let frags = vec![TextFragment::new("x", 1.5)];
        assert!(matches!(
            reconstruct_lines(&frags),
            Err(StructuringError::CorruptGeometry { index: 0, .. })
        ));
    }

    #[test]
    fn geometric_fragments_cluster_into_rows() {
        let frags = vec![
            TextFragment::new("14,2", 0.9).with_bbox(200.0, 100.0, 40.0, 20.0),
            TextFragment::new("Hemoglobina", 0.95).with_bbox(10.0, 102.0, 120.0, 20.0),
            TextFragment::new("Glicose", 0.8).with_bbox(10.0, 140.0, 80.0, 20.0),
            TextFragment::new("g/dL", 0.85).with_bbox(260.0, 99.0, 40.0, 20.0),
            TextFragment::new("92", 0.9).with_bbox(200.0, 141.0, 30.0, 20.0),
        ];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(texts(&lines), vec!["Hemoglobina 14,2 g/dL", "Glicose 92"]);
        assert_eq!(lines[0].cells.len(), 3);
        assert_eq!(lines[0].min_confidence, 0.85);
        assert!((lines[0].avg_confidence - 0.9).abs() < 1e-6);
        assert_eq!(lines[0].source, LineSource::Geometry);
        assert_eq!(lines[1].index, 1);
        let env = lines[0].envelope.unwrap();
        assert_eq!(env.x, 10.0);
        assert_eq!(env.right(), 300.0);
    }

    #[test]
    fn superscript_attaches_to_tall_line() {
        let frags = vec![
            TextFragment::new("Plaquetas", 0.9).with_bbox(10.0, 100.0, 100.0, 24.0),
            TextFragment::new("280.000", 0.9).with_bbox(150.0, 100.0, 80.0, 24.0),
            TextFragment::new("/mm", 0.9).with_bbox(240.0, 100.0, 40.0, 24.0),
            // Small exponent sitting high, centered above the text's center
            TextFragment::new("³", 0.9).with_bbox(282.0, 96.0, 6.0, 10.0),
        ];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(texts(&lines), vec!["Plaquetas 280.000 /mm ³"]);
    }

    #[test]
    fn table_rows_follow_column_order() {
        let frags = vec![
            TextFragment::new("g/dL", 0.9).in_table(0, 0, 2),
            TextFragment::new("Hemoglobina", 0.9).in_table(0, 0, 0),
            TextFragment::new("14,2", 0.9).in_table(0, 0, 1),
            TextFragment::new("Glicose", 0.9).in_table(0, 1, 0),
            TextFragment::new("92", 0.9).in_table(0, 1, 1),
        ];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(texts(&lines), vec!["Hemoglobina 14,2 g/dL", "Glicose 92"]);
        assert!(lines.iter().all(|l| l.source == LineSource::Table));
        assert!(lines[0].envelope.is_none());
    }

    #[test]
    fn table_rows_interleave_with_geometry() {
        let frags = vec![
            TextFragment::new("Hemoglobina", 0.9)
                .with_bbox(10.0, 200.0, 100.0, 20.0)
                .in_table(0, 0, 0),
            TextFragment::new("14,2", 0.9)
                .with_bbox(150.0, 200.0, 40.0, 20.0)
                .in_table(0, 0, 1),
            TextFragment::new("HEMOGRAMA", 0.9).with_bbox(10.0, 100.0, 120.0, 24.0),
            TextFragment::new("Assinatura", 0.9).with_bbox(10.0, 400.0, 120.0, 20.0),
        ];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(texts(&lines), vec!["HEMOGRAMA", "Hemoglobina 14,2", "Assinatura"]);
    }

    #[test]
    fn text_fallback_splits_lines_and_cells() {
        let frags = vec![TextFragment::new("Paciente: Ana Souza\nGlicose\t92\tmg/dL\n\n", 0.8)];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(texts(&lines), vec!["Paciente: Ana Souza", "Glicose 92 mg/dL"]);
        assert_eq!(lines[1].cells, vec!["Glicose", "92", "mg/dL"]);
        assert!(lines.iter().all(|l| l.source == LineSource::Text && l.envelope.is_none()));
        assert_eq!(lines[0].min_confidence, 0.8);
    }

    #[test]
    fn text_lines_follow_geometry_on_each_page() {
        let frags = vec![
            TextFragment::new("second page text", 0.7).on_page(1),
            TextFragment::new("page zero text", 0.7),
            TextFragment::new("Geometric", 0.9).with_bbox(0.0, 500.0, 50.0, 10.0),
            TextFragment::new("Page one geometric", 0.9)
                .with_bbox(0.0, 10.0, 50.0, 10.0)
                .on_page(1),
        ];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(
            texts(&lines),
            vec!["Geometric", "page zero text", "Page one geometric", "second page text"]
        );
        assert_eq!(lines[3].page, 1);
        assert_eq!(lines[3].index, 3);
    }

    #[test]
    fn blank_fragments_are_skipped() {
        let frags = vec![
            TextFragment::new("\u{0007}\u{0001}", 0.9).with_bbox(0.0, 0.0, 10.0, 10.0),
            TextFragment::new("Glicose  92", 0.9).with_bbox(0.0, 40.0, 10.0, 10.0),
        ];
        let lines = reconstruct_lines(&frags).unwrap();
        assert_eq!(texts(&lines), vec!["Glicose 92"]);

        // Only blank text yields no lines, not an error
        let blank = vec![TextFragment::new("   ", 0.9)];
        assert!(reconstruct_lines(&blank).unwrap().is_empty());
    }
}
