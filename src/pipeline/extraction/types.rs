use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Position of a fragment on its page, in page pixels (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Why this box cannot be used for layout, if it cannot.
    pub fn defect(&self) -> Option<&'static str> {
        if ![self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return Some("non-finite coordinate");
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Some("non-positive width or height");
        }
        None
    }
}

/// Cell of a table detected by the OCR engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableCellRef {
    pub table: u32,
    pub row: u32,
    pub column: u32,
}

/// One unit of recognized text as returned by the OCR engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    pub text: String,
    /// Zero-based page index.
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    /// Recognition confidence, 0.0-1.0.
    pub confidence: f32,
    #[serde(default)]
    pub table: Option<TableCellRef>,
}

impl TextFragment {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            page: 0,
            bbox: None,
            confidence,
            table: None,
        }
    }

    pub fn with_bbox(mut self, x: f32, y: f32, width: f32, height: f32) -> Self {
        self.bbox = Some(BoundingBox::new(x, y, width, height));
        self
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn in_table(mut self, table: u32, row: u32, column: u32) -> Self {
        self.table = Some(TableCellRef { table, row, column });
        self
    }
}

/// A table the engine detected, as cells pointing into the fragment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTable {
    pub cells: Vec<DetectedCell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedCell {
    pub row: u32,
    pub column: u32,
    /// Index into [`OcrOutput::fragments`].
    pub fragment: usize,
}

/// Raw result of one OCR engine call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub fragments: Vec<TextFragment>,
    #[serde(default)]
    pub tables: Vec<DetectedTable>,
}

impl OcrOutput {
    /// Fold detected tables into the fragments as table references.
    ///
    /// Table ids are the positions in `tables`. A cell pointing outside the
    /// fragment list means the engine output is unusable.
    pub fn into_fragments(self) -> Result<Vec<TextFragment>, ExtractionError> {
        let mut fragments = self.fragments;
        for (table_id, table) in self.tables.iter().enumerate() {
            for cell in &table.cells {
                let count = fragments.len();
                let fragment = fragments.get_mut(cell.fragment).ok_or_else(|| {
                    ExtractionError::MalformedOutput(format!(
                        "table {table_id} cell ({}, {}) points at fragment {} of {count}",
                        cell.row, cell.column, cell.fragment
                    ))
                })?;
                fragment.table = Some(TableCellRef {
                    table: table_id as u32,
                    row: cell.row,
                    column: cell.column,
                });
            }
        }
        Ok(fragments)
    }
}

/// Warnings about page image quality, reported alongside the normalized page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtractionWarning {
    BlurryImage,
    SkewedDocument { angle_degrees: f32 },
    PoorContrast,
    BlankPage,
    DarkImage,
}

/// OCR engine abstraction (allows mocking for tests).
///
/// Implementations are blocking; the processor runs them on the blocking pool
/// under a timeout.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_png: &[u8], language: &str) -> Result<OcrOutput, ExtractionError>;
}
