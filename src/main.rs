//! Command-line front end.
//!
//! ```text
//! medlab-ocr [--config <file>] [--threshold <0..1>] [--sex <masculino|feminino>] [--age <years>] <input>
//! ```
//!
//! `<input>` is a page image (png, jpg, tif), a JSON file holding OCR output
//! (`{"fragments": [...], "tables": [...]}` or a bare fragment array), or
//! plain text with one report line per line. The structured record is
//! printed to stdout as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use medlab_ocr::config::{ConfigError, EngineConfig, APP_NAME, APP_VERSION};
use medlab_ocr::models::enums::Sex;
use medlab_ocr::pipeline::extraction::{fragments_from_plain_text, OcrOutput, TextFragment};
use medlab_ocr::pipeline::structuring::{extract, ExtractOptions, PatientHint};
use medlab_ocr::{LabReportProcessor, ParameterDictionary, ProcessRequest, ProcessingError, StructuredRecord};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid OCR JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),
}

/// Structure a laboratory report into a JSON medical record
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version)]
#[command(about = "Structures OCR output of laboratory reports into typed medical records")]
struct Args {
    /// Page image, OCR JSON or plain text report
    input: PathBuf,

    /// JSON configuration file; MEDLAB_* variables still override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drop parameters below this confidence
    #[arg(short, long, value_parser = parse_threshold)]
    threshold: Option<f32>,

    /// Patient sex used to pick reference ranges (masculino, feminino, M, F)
    #[arg(short, long, value_parser = parse_sex)]
    sex: Option<Sex>,

    /// Patient age in years
    #[arg(short, long)]
    age: Option<u32>,
}

impl Args {
    fn hint(&self) -> Option<PatientHint> {
        let hint = PatientHint {
            age: self.age,
            sex: self.sex,
        };
        (hint != PatientHint::default()).then_some(hint)
    }
}

fn parse_threshold(raw: &str) -> Result<f32, String> {
    let v: f32 = raw.parse().map_err(|_| format!("not a number: {raw}"))?;
    if (0.0..=1.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("{v} outside [0, 1]"))
    }
}

fn parse_sex(raw: &str) -> Result<Sex, String> {
    Sex::parse_label(raw).ok_or_else(|| format!("unknown sex: {raw}"))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// OCR output as JSON, either the engine envelope or a bare fragment list.
fn fragments_from_json(content: &str) -> Result<Vec<TextFragment>, CliError> {
    if let Ok(output) = serde_json::from_str::<OcrOutput>(content) {
        return output
            .into_fragments()
            .map_err(|e| CliError::Processing(ProcessingError::Extraction(e)));
    }
    Ok(serde_json::from_str::<Vec<TextFragment>>(content)?)
}

fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

async fn run(args: Args) -> Result<StructuredRecord, CliError> {
    let config = EngineConfig::load(args.config.as_deref())?;
    let hint = args.hint();

    if is_image(&args.input) {
        let bytes = read(&args.input)?;
        let processor = LabReportProcessor::from_config(config)?;
        let mut request = ProcessRequest::from_config(processor.config());
        if let Some(t) = args.threshold {
            request = request.with_threshold(t);
        }
        request.patient_hint = hint;
        return Ok(processor.process(&bytes, &request).await?);
    }

    let content = String::from_utf8_lossy(&read(&args.input)?).into_owned();
    let is_json = args
        .input
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let fragments = if is_json {
        fragments_from_json(&content)?
    } else {
        fragments_from_plain_text(&content, 1.0, 0)
    };

    let dictionary = ParameterDictionary::load_or_bundled(config.dictionary_path.as_deref())
        .map_err(ProcessingError::from)?;
    let threshold = args.threshold.unwrap_or(config.confidence_threshold);
    let record = extract(
        &fragments,
        hint.as_ref(),
        threshold,
        &dictionary,
        &ExtractOptions::from_config(&config),
    )
    .map_err(ProcessingError::from)?;
    Ok(record)
}

#[tokio::main]
async fn main() -> ExitCode {
    medlab_ocr::init_tracing();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version land here with exit code 0.
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2));
        }
    };
    tracing::debug!(input = %args.input.display(), "{APP_NAME} v{APP_VERSION}");

    let record = match run(args).await {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(error = %e, "Processing failed");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&record) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
