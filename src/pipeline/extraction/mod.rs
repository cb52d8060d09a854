pub mod types;
pub mod confidence;
pub mod sanitize;
pub mod preprocess;
pub mod ocr;
pub mod table_detect;

pub use types::*;
pub use confidence::*;
pub use sanitize::*;
pub use preprocess::*;
pub use ocr::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("OCR engine did not answer within {secs}s")]
    EngineTimeout { secs: u64 },

    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Malformed OCR output: {0}")]
    MalformedOutput(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),
}
