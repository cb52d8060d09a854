//! Report processing orchestrator.
//!
//! Single entry point that drives one page image through the pipeline:
//! normalize → OCR → structure. Engines sit behind traits
//! (`ImageNormalizer`, `OcrEngine`, `RecordCache`) so the orchestrator is
//! testable with mock implementations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::pipeline::cache::{content_fingerprint, MemoryRecordCache, RecordCache};
use crate::pipeline::extraction::{
    low_confidence_ratio, mean_fragment_confidence, recognize_with_timeout, DocumentNormalizer,
    ExtractionError, ImageNormalizer, OcrEngine, TesseractCli,
};
use crate::pipeline::structuring::{
    extract, DictionaryError, ExtractOptions, ParameterDictionary, PatientHint, StructuredRecord,
    StructuringError,
};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while processing a report image.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Structuring failed: {0}")]
    Structuring(#[from] StructuringError),

    #[error("Parameter catalogue unavailable: {0}")]
    Dictionary(#[from] DictionaryError),
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Per-call parameters. Everything here takes part in the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub patient_hint: Option<PatientHint>,
    pub confidence_threshold: f32,
    /// Language hint for the OCR engine.
    pub language: String,
    pub include_unclassified: bool,
}

impl Default for ProcessRequest {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ProcessRequest {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            patient_hint: None,
            confidence_threshold: config.confidence_threshold,
            language: config.language.clone(),
            include_unclassified: config.include_unclassified,
        }
    }

    pub fn with_patient_hint(mut self, hint: PatientHint) -> Self {
        self.patient_hint = Some(hint);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Turns report page images into structured records.
pub struct LabReportProcessor {
    normalizer: Arc<dyn ImageNormalizer>,
    engine: Arc<dyn OcrEngine>,
    dictionary: Arc<ParameterDictionary>,
    config: EngineConfig,
    cache: Option<Arc<dyn RecordCache>>,
}

impl LabReportProcessor {
    /// Processor with the default page normalizer and no cache.
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        dictionary: Arc<ParameterDictionary>,
        config: EngineConfig,
    ) -> Self {
        Self {
            normalizer: Arc::new(DocumentNormalizer::new(config.max_image_bytes)),
            engine,
            dictionary,
            config,
            cache: None,
        }
    }

    /// Production wiring: Tesseract, the configured catalogue and an
    /// in-memory cache sized by `cache_capacity`.
    pub fn from_config(config: EngineConfig) -> Result<Self, ProcessingError> {
        let dictionary = ParameterDictionary::load_or_bundled(config.dictionary_path.as_deref())?;
        tracing::info!(
            version = dictionary.version(),
            parameters = dictionary.definitions().len(),
            exam_types = dictionary.exam_types().len(),
            "Parameter catalogue loaded"
        );
        let cache = Arc::new(MemoryRecordCache::new(config.cache_capacity));
        Ok(Self::new(Arc::new(TesseractCli::new()), Arc::new(dictionary), config).with_cache(cache))
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ImageNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn RecordCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Request carrying this processor's configured defaults.
    pub fn default_request(&self) -> ProcessRequest {
        ProcessRequest::from_config(&self.config)
    }

    /// Process one page image.
    ///
    /// With a cache attached, identical (image, request) pairs are computed
    /// at most once, also when they arrive concurrently. Failures are not
    /// cached.
    pub async fn process(
        &self,
        image_bytes: &[u8],
        request: &ProcessRequest,
    ) -> Result<StructuredRecord, ProcessingError> {
        let Some(cache) = &self.cache else {
            return self.run(image_bytes, request).await;
        };

        let key = content_fingerprint(image_bytes, request);
        let slot = cache.slot(&key);
        if let Some(record) = slot.get() {
            tracing::debug!(key = key.as_str(), "Record cache hit");
            return Ok(record.clone());
        }
        let record = slot.get_or_try_init(|| self.run(image_bytes, request)).await?;
        Ok(record.clone())
    }

    async fn run(
        &self,
        image_bytes: &[u8],
        request: &ProcessRequest,
    ) -> Result<StructuredRecord, ProcessingError> {
        let start = std::time::Instant::now();

        // Step 1: normalize the page (CPU-bound)
        let normalizer = Arc::clone(&self.normalizer);
        let bytes = image_bytes.to_vec();
        let page = tokio::task::spawn_blocking(move || normalizer.normalize(&bytes))
            .await
            .map_err(|e| {
                ExtractionError::ImageProcessing(format!("Normalization task aborted: {e}"))
            })??;
        for warning in &page.quality.warnings {
            tracing::warn!(?warning, "Page quality warning");
        }

        // Step 2: OCR, bounded by the configured timeout
        let output = recognize_with_timeout(
            Arc::clone(&self.engine),
            page.png_bytes,
            request.language.clone(),
            self.config.ocr_timeout(),
        )
        .await?;
        let fragments = output.into_fragments()?;
        tracing::info!(
            fragments = fragments.len(),
            mean_confidence = mean_fragment_confidence(&fragments),
            low_confidence_ratio = low_confidence_ratio(&fragments),
            "OCR complete"
        );

        // Step 3: structure
        let options = ExtractOptions {
            include_unclassified: request.include_unclassified,
            ..ExtractOptions::from_config(&self.config)
        };
        let record = extract(
            &fragments,
            request.patient_hint.as_ref(),
            request.confidence_threshold,
            &self.dictionary,
            &options,
        )?;

        tracing::info!(
            exam_type = record.exam_type.as_str(),
            parameters = record.total_parameters,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Report processed"
        );
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
