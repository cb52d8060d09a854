use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::types::{BoundingBox, OcrEngine, OcrOutput, TextFragment};
use super::ExtractionError;

/// Tesseract driven through its command-line binary (`tesseract stdin stdout tsv`).
///
/// The binary must be on `PATH` (or given explicitly) with the traineddata
/// for the requested language installed.
pub struct TesseractCli {
    binary: String,
}

impl TesseractCli {
    pub fn new() -> Self {
        Self {
            binary: "tesseract".into(),
        }
    }

    pub fn with_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image_png: &[u8], language: &str) -> Result<OcrOutput, ExtractionError> {
        let lang = tesseract_language(language);
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", lang, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExtractionError::EngineUnavailable(format!("cannot start {}: {e}", self.binary))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(image_png) {
                // The process may still be alive; reap it before reporting.
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExtractionError::EngineUnavailable(format!(
                    "cannot feed image to tesseract: {e}"
                )));
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ExtractionError::EngineUnavailable(format!("tesseract failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::EngineUnavailable(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8(output.stdout)
            .map_err(|e| ExtractionError::MalformedOutput(format!("non UTF-8 TSV: {e}")))?;
        let fragments = fragments_from_tsv(&tsv);
        tracing::debug!(fragments = fragments.len(), lang, "Tesseract recognition done");

        Ok(OcrOutput {
            fragments,
            tables: Vec::new(),
        })
    }
}

/// Map a short language hint to Tesseract traineddata names.
fn tesseract_language(language: &str) -> &str {
    match language {
        "pt" | "pt-BR" | "pt_BR" => "por",
        "en" => "eng",
        "es" => "spa",
        "fr" => "fra",
        "de" => "deu",
        other => other,
    }
}

/// Parse Tesseract TSV output into word fragments.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence is 0-100, scaled to 0.0-1.0.
/// `page_num` is one-based in the TSV and zero-based in the fragment.
pub fn fragments_from_tsv(tsv: &str) -> Vec<TextFragment> {
    let mut fragments = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header row
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Level 5 = word
        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let conf: f32 = match fields[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        // Tesseract returns -1 for words it can't assign confidence to
        let confidence = if conf < 0.0 {
            0.0
        } else {
            (conf / 100.0).min(1.0)
        };
        let page = fields[1].parse::<u32>().unwrap_or(1).saturating_sub(1);

        fragments.push(TextFragment {
            text: word.to_string(),
            page,
            bbox: parse_bounding_box(fields[6], fields[7], fields[8], fields[9]),
            confidence,
            table: None,
        });
    }

    fragments
}

/// Parse bounding box coordinates from TSV string fields.
/// Returns None if any field fails to parse or the box is degenerate.
fn parse_bounding_box(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    let bbox = BoundingBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    };
    bbox.defect().is_none().then_some(bbox)
}

/// Wrap text from an engine without layout output as a geometry-less fragment.
pub fn fragments_from_plain_text(text: &str, confidence: f32, page: u32) -> Vec<TextFragment> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    vec![TextFragment {
        text: text.to_string(),
        page,
        bbox: None,
        confidence: confidence.clamp(0.0, 1.0),
        table: None,
    }]
}

/// Run a blocking engine on the blocking pool, bounded by `timeout`.
///
/// On expiry the engine call keeps running on its thread; its result is
/// discarded.
pub async fn recognize_with_timeout(
    engine: Arc<dyn OcrEngine>,
    image_png: Vec<u8>,
    language: String,
    timeout: Duration,
) -> Result<OcrOutput, ExtractionError> {
    let task = tokio::task::spawn_blocking(move || engine.recognize(&image_png, &language));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ExtractionError::EngineUnavailable(format!(
            "OCR task aborted: {join_error}"
        ))),
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs(), "OCR engine timed out");
            Err(ExtractionError::EngineTimeout {
                secs: timeout.as_secs(),
            })
        }
    }
}

enum MockBehavior {
    Answer,
    Fail(String),
    Delay(Duration),
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockOcrEngine {
    output: OcrOutput,
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new(output: OcrOutput) -> Self {
        Self {
            output,
            behavior: MockBehavior::Answer,
            calls: AtomicUsize::new(0),
        }
    }

    /// One fragment per non-empty line, laid out top to bottom on page 0.
    pub fn from_text(text: &str, confidence: f32) -> Self {
        let fragments = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                TextFragment::new(line.trim(), confidence).with_bbox(
                    40.0,
                    40.0 + i as f32 * 30.0,
                    12.0 * line.trim().chars().count() as f32,
                    20.0,
                )
            })
            .collect();
        Self::new(OcrOutput {
            fragments,
            tables: Vec::new(),
        })
    }

    pub fn failing(message: &str) -> Self {
        Self {
            behavior: MockBehavior::Fail(message.to_string()),
            ..Self::new(OcrOutput::default())
        }
    }

    /// Answers with `output` after sleeping for `delay`.
    pub fn slow(output: OcrOutput, delay: Duration) -> Self {
        Self {
            behavior: MockBehavior::Delay(delay),
            ..Self::new(output)
        }
    }

    /// Number of `recognize` calls received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _image_png: &[u8], _language: &str) -> Result<OcrOutput, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Answer => Ok(self.output.clone()),
            MockBehavior::Fail(message) => Err(ExtractionError::EngineUnavailable(message.clone())),
            MockBehavior::Delay(delay) => {
                std::thread::sleep(*delay);
                Ok(self.output.clone())
            }
        }
    }
}
