pub mod extraction;
pub mod structuring;
pub mod cache;
pub mod processor; // Image → OCR → structured record
