//! Page image normalization ahead of OCR.
//!
//! Each page goes through the same fixed sequence: validate, decode to
//! grayscale, pre-downscale, assess quality, then only the corrections the
//! assessment calls for (contrast stretch, edge-preserving denoise, deskew).
//! Clean documents are passed through untouched apart from the grayscale
//! conversion.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::ExtractionWarning;
use super::ExtractionError;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// No PNG, JPEG or TIFF page fits in fewer bytes.
const MIN_IMAGE_BYTES: usize = 67;

/// Longest edge kept before OCR; larger scans are downscaled.
const DEFAULT_MAX_DIMENSION: u32 = 4000;

/// Laplacian variance below this reads as blurry.
const BLUR_THRESHOLD: f32 = 100.0;

/// RMS contrast below this is reported as poor contrast.
const CONTRAST_THRESHOLD: f32 = 25.0;

/// Noise level (std dev in smooth regions) above which the page is denoised.
const NOISE_THRESHOLD: f32 = 12.0;

const BILATERAL_RADIUS: u32 = 3;
const BILATERAL_RANGE_SIGMA: f32 = 25.0;

/// Intensity histogram tails ignored when stretching contrast.
const STRETCH_TAIL: f32 = 0.01;

/// Pages whose intensity spread is narrower than this are left alone.
const MIN_STRETCH_SPREAD: u8 = 16;

const INK_THRESHOLD: u8 = 128;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Quality measurements of one page, taken before any correction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub blur_score: f32,
    pub contrast_score: f32,
    pub noise_score: f32,
    pub is_blank: bool,
    pub is_dark: bool,
    pub warnings: Vec<ExtractionWarning>,
}

/// A page ready for the OCR engine.
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    /// Grayscale PNG.
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: QualityReport,
    pub contrast_stretched: bool,
    pub denoised: bool,
    /// Skew angle that was corrected, in degrees.
    pub skew_corrected: Option<f32>,
}

/// Turns raw upload bytes into a page the OCR engine can read reliably.
pub trait ImageNormalizer: Send + Sync {
    fn normalize(&self, image_bytes: &[u8]) -> Result<NormalizedPage, ExtractionError>;
}

/// Default normalizer for photographed and scanned paper reports.
#[derive(Debug, Clone)]
pub struct DocumentNormalizer {
    max_image_bytes: usize,
    max_dimension: u32,
    noise_threshold: f32,
}

impl Default for DocumentNormalizer {
    fn default() -> Self {
        Self::new(10 * 1024 * 1024)
    }
}

impl DocumentNormalizer {
    pub fn new(max_image_bytes: usize) -> Self {
        Self {
            max_image_bytes,
            max_dimension: DEFAULT_MAX_DIMENSION,
            noise_threshold: NOISE_THRESHOLD,
        }
    }

    /// Noise level above which the bilateral filter runs.
    pub fn with_noise_threshold(mut self, threshold: f32) -> Self {
        self.noise_threshold = threshold;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.max(1);
        self
    }
}

impl ImageNormalizer for DocumentNormalizer {
    fn normalize(&self, image_bytes: &[u8]) -> Result<NormalizedPage, ExtractionError> {
        validate_image_bytes(image_bytes, self.max_image_bytes)?;

        let decoded = image::load_from_memory(image_bytes)
            .map_err(|e| ExtractionError::ImageProcessing(format!("Cannot decode image: {e}")))?;
        let gray = pre_downscale(decoded.to_luma8(), self.max_dimension);

        let quality = assess_quality(&gray);
        let mut page = gray;
        let mut contrast_stretched = false;
        let mut denoised = false;
        let mut skew_corrected = None;

        // Blank or dark pages carry nothing worth enhancing.
        if !quality.is_blank && !quality.is_dark {
            if let Some(stretched) = stretch_contrast(&page) {
                page = stretched;
                contrast_stretched = true;
            }

            if quality.noise_score >= self.noise_threshold {
                debug!(
                    noise = quality.noise_score,
                    threshold = self.noise_threshold,
                    "Degraded page, applying bilateral filter"
                );
                page = apply_bilateral_gray(&page, BILATERAL_RADIUS, BILATERAL_RANGE_SIGMA);
                denoised = true;
            }

            if let Some(angle) = detect_skew_angle(&page) {
                debug!(angle, "Correcting page skew");
                page = deskew(&page, angle);
                skew_corrected = Some(angle);
            }
        }

        let png_bytes = encode_png(&page)?;
        debug!(
            width = page.width(),
            height = page.height(),
            contrast_stretched,
            denoised,
            warnings = quality.warnings.len(),
            "Page normalized"
        );

        Ok(NormalizedPage {
            png_bytes,
            width: page.width(),
            height: page.height(),
            quality,
            contrast_stretched,
            denoised,
            skew_corrected,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Quality analysis
// ═══════════════════════════════════════════════════════════

/// Measure a grayscale page and derive the warnings the caller should see.
pub fn assess_quality(img: &GrayImage) -> QualityReport {
    let mut report = QualityReport::default();
    let pixel_count = (img.width() as usize) * (img.height() as usize);
    if pixel_count == 0 {
        return report;
    }

    // Mostly blank (>95% near-white)
    let white = img.pixels().filter(|p| p.0[0] > 240).count();
    if white as f32 / pixel_count as f32 > 0.95 {
        report.is_blank = true;
        report.warnings.push(ExtractionWarning::BlankPage);
    }

    // Mostly dark (>80% near-black)
    let dark = img.pixels().filter(|p| p.0[0] < 15).count();
    if dark as f32 / pixel_count as f32 > 0.80 {
        report.is_dark = true;
        report.warnings.push(ExtractionWarning::DarkImage);
    }

    report.contrast_score = rms_contrast(img);
    report.noise_score = estimate_noise(img);
    report.blur_score = laplacian_variance(img);

    if report.is_blank || report.is_dark {
        return report;
    }

    if report.contrast_score < CONTRAST_THRESHOLD {
        report.warnings.push(ExtractionWarning::PoorContrast);
    }
    if report.blur_score < BLUR_THRESHOLD {
        report.warnings.push(ExtractionWarning::BlurryImage);
    }
    if let Some(angle) = detect_skew_angle(img) {
        report
            .warnings
            .push(ExtractionWarning::SkewedDocument { angle_degrees: angle });
    }

    report
}

/// Sharpness as the variance of the 4-neighbour Laplacian response.
///
/// Photographed reports that are out of focus land well under 100; crisp
/// printed text scores several hundred.
pub fn laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = (img.width(), img.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let at = |px: u32, py: u32| img.get_pixel(px, py).0[0] as f64;
            let laplacian =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0) as f32
}

/// RMS contrast: standard deviation of the gray levels, 0 to 127.5.
pub fn rms_contrast(img: &GrayImage) -> f32 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for pixel in img.pixels() {
        let val = pixel.0[0] as f64;
        sum += val;
        sum_sq += val * val;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0).sqrt() as f32
}

/// Noise estimate from the flattest parts of the page.
///
/// Local variance in 5x5 blocks; the median of the lowest quartile (smooth
/// regions) is the noise estimate, returned as a standard deviation.
/// Clean scans: 2-8, degraded: 15-30, fax: 25-50.
pub fn estimate_noise(img: &GrayImage) -> f32 {
    let (w, h) = (img.width(), img.height());
    let block_size = 5u32;
    if w < block_size || h < block_size {
        return 0.0;
    }

    let mut variances = Vec::new();
    let count = (block_size * block_size) as f64;

    let mut y = 0;
    while y + block_size <= h {
        let mut x = 0;
        while x + block_size <= w {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for by in 0..block_size {
                for bx in 0..block_size {
                    let val = img.get_pixel(x + bx, y + by).0[0] as f64;
                    sum += val;
                    sum_sq += val * val;
                }
            }
            let mean = sum / count;
            variances.push(((sum_sq / count) - (mean * mean)).max(0.0) as f32);
            x += block_size;
        }
        y += block_size;
    }

    if variances.is_empty() {
        return 0.0;
    }

    variances.sort_by(|a, b| a.total_cmp(b));
    let quartile_end = (variances.len() / 4).max(1);
    let smooth_region = &variances[..quartile_end];
    smooth_region[smooth_region.len() / 2].sqrt()
}

/// Detect document skew via projection profiles.
///
/// Tests candidate angles from -5 to +5 degrees in 0.25 steps. For each
/// angle, rows are read along lines of that slope; the angle producing the
/// crispest row transitions is the skew estimate (positive = text descends
/// to the right).
///
/// Returns `None` if the image is too small, has insufficient content
/// (< 2% ink), or the detected angle is negligible (< 0.5 degrees).
pub fn detect_skew_angle(img: &GrayImage) -> Option<f32> {
    let (w, h) = (img.width(), img.height());
    if w < 50 || h < 50 {
        return None;
    }

    let dark_count = img.pixels().filter(|p| p.0[0] < INK_THRESHOLD).count();
    if (dark_count as f32 / (w as usize * h as usize) as f32) < 0.02 {
        return None;
    }

    let mut best_angle = 0.0f32;
    let mut best_score = projection_variance(img, 0.0);

    // 0 is scored first so that flat profiles keep the page as is
    for step in -20i32..=20 {
        let angle = step as f32 * 0.25;
        if step == 0 {
            continue;
        }
        let score = projection_variance(img, angle);
        if score > best_score {
            best_score = score;
            best_angle = angle;
        }
    }

    if best_angle.abs() < 0.5 {
        None
    } else {
        Some(best_angle)
    }
}

/// Sum of squared differences between adjacent row projections when rows
/// are read along a slope of `angle_deg`. Every 4th column is sampled.
fn projection_variance(img: &GrayImage, angle_deg: f32) -> f64 {
    let (w, h) = (img.width(), img.height());
    let tan_a = (angle_deg as f64).to_radians().tan();
    let mut projection = vec![0u32; h as usize];

    for y in 0..h {
        let mut count = 0u32;
        let mut x = 0u32;
        while x < w {
            let sy = y as i64 + (x as f64 * tan_a).round() as i64;
            if sy >= 0 && (sy as u32) < h && img.get_pixel(x, sy as u32).0[0] < INK_THRESHOLD {
                count += 1;
            }
            x += 4;
        }
        projection[y as usize] = count;
    }

    projection
        .windows(2)
        .map(|pair| {
            let diff = pair[1] as f64 - pair[0] as f64;
            diff * diff
        })
        .sum()
}

// ═══════════════════════════════════════════════════════════
// Corrections
// ═══════════════════════════════════════════════════════════

/// Stretch the intensity range so that the 1st and 99th percentiles map to
/// black and white. Returns `None` when the page already spans the range or
/// is too flat to stretch meaningfully.
pub fn stretch_contrast(img: &GrayImage) -> Option<GrayImage> {
    let total = (img.width() as usize) * (img.height() as usize);
    if total == 0 {
        return None;
    }

    let mut histogram = [0usize; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let tail = ((total as f32) * STRETCH_TAIL) as usize;
    let low = percentile_value(&histogram, tail);
    let high = percentile_value(&histogram, total.saturating_sub(tail + 1));

    if high.saturating_sub(low) < MIN_STRETCH_SPREAD || (low <= 10 && high >= 245) {
        return None;
    }

    let scale = 255.0 / (high - low) as f32;
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, p) in img.enumerate_pixels() {
        let v = ((p.0[0].saturating_sub(low)) as f32 * scale).round().clamp(0.0, 255.0) as u8;
        out.put_pixel(x, y, Luma([v]));
    }
    debug!(low, high, "Contrast stretched");
    Some(out)
}

/// Intensity of the pixel at sorted position `rank`.
fn percentile_value(histogram: &[usize; 256], rank: usize) -> u8 {
    let mut seen = 0usize;
    for (value, count) in histogram.iter().enumerate() {
        seen += count;
        if seen > rank {
            return value as u8;
        }
    }
    255
}

/// Edge-preserving bilateral filter approximation on a grayscale page.
///
/// - `radius`: spatial window radius (pixels). Typical: 2-5.
/// - `range_sigma`: controls edge preservation. Smaller = stronger edges.
pub fn apply_bilateral_gray(img: &GrayImage, radius: u32, range_sigma: f32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let mut output = GrayImage::new(w, h);
    let range_sigma_sq_2 = 2.0 * range_sigma * range_sigma;

    for y in 0..h {
        for x in 0..w {
            let center = img.get_pixel(x, y).0[0] as f32;
            let mut sum = 0.0f32;
            let mut weight_sum = 0.0f32;

            for ny in y.saturating_sub(radius)..(y + radius + 1).min(h) {
                for nx in x.saturating_sub(radius)..(x + radius + 1).min(w) {
                    let neighbor = img.get_pixel(nx, ny).0[0] as f32;
                    let diff = neighbor - center;
                    let weight = (-(diff * diff) / range_sigma_sq_2).exp();
                    sum += neighbor * weight;
                    weight_sum += weight;
                }
            }

            let value = if weight_sum > 0.0 {
                (sum / weight_sum).round().clamp(0.0, 255.0) as u8
            } else {
                center as u8
            };
            output.put_pixel(x, y, Luma([value]));
        }
    }

    output
}

/// Undo a skew found by [`detect_skew_angle`] with a vertical shear around the
/// page's horizontal center. Uncovered pixels become white.
pub fn deskew(img: &GrayImage, angle_deg: f32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let tan_a = (angle_deg as f64).to_radians().tan();
    let mid = w as f64 / 2.0;
    let mut out = GrayImage::from_pixel(w, h, Luma([255]));

    for x in 0..w {
        let shift = ((x as f64 - mid) * tan_a).round() as i64;
        for y in 0..h {
            let sy = y as i64 + shift;
            if sy >= 0 && (sy as u32) < h {
                out.put_pixel(x, y, *img.get_pixel(x, sy as u32));
            }
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════
// Pure helper functions
// ═══════════════════════════════════════════════════════════

/// Size gate applied before decoding.
pub fn validate_image_bytes(bytes: &[u8], max_bytes: usize) -> Result<(), ExtractionError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ExtractionError::ImageProcessing(
            "Image payload too small to hold a page".into(),
        ));
    }
    if bytes.len() > max_bytes {
        return Err(ExtractionError::ImageProcessing(format!(
            "Image data exceeds {max_bytes} byte limit"
        )));
    }
    Ok(())
}

/// Downscale pages whose longest edge exceeds `max_dim`.
fn pre_downscale(img: GrayImage, max_dim: u32) -> GrayImage {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);
    if largest <= max_dim {
        return img;
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    debug!(
        from = format!("{w}x{h}"),
        to = format!("{new_w}x{new_h}"),
        "Pre-downscaling oversized image"
    );

    image::imageops::resize(&img, new_w, new_h, FilterType::Triangle)
}

/// Encode a grayscale page as PNG bytes.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, ExtractionError> {
    let dynamic = DynamicImage::ImageLuma8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ExtractionError::ImageProcessing(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}
