//! Image clean-up before recognition. Every variant starts from the same
//! grayscale, contrast-stretched and upscaled base; the engine reads each one
//! and keeps the most confident reading.

use std::io::Cursor;

use image::{
    imageops::{self, FilterType},
    DynamicImage, GrayImage, ImageError, ImageFormat,
};

use crate::config::OcrMode;

/// Upscaling is skipped past this many output pixels.
const MAX_UPSCALED_PIXELS: u64 = 16_000_000;
const FIXED_THRESHOLDS: [u8; 3] = [170, 150, 130];

#[derive(Debug, Clone)]
pub struct Variant {
    pub tag: String,
    /// PNG-encoded image handed to the engine.
    pub image: Vec<u8>,
}

impl Variant {
    /// The upload itself, used when it cannot be decoded here.
    pub fn original(bytes: &[u8]) -> Self {
        Self {
            tag: "original".to_string(),
            image: bytes.to_vec(),
        }
    }
}

/// Decodes the upload and renders the variants for `mode`, most promising
/// first.
pub fn variants(bytes: &[u8], mode: OcrMode, upscale: f32) -> Result<Vec<Variant>, ImageError> {
    let base = prepare(image::load_from_memory(bytes)?, upscale);
    let otsu = otsu_threshold(&base);

    let mut rendered: Vec<(String, GrayImage)> = Vec::new();
    rendered.push(("otsu".to_string(), binarize(&base, otsu, false)));
    rendered.push(("otsu_inv".to_string(), binarize(&base, otsu, true)));
    if mode == OcrMode::Aggressive {
        for threshold in FIXED_THRESHOLDS {
            rendered.push((format!("bin{threshold}"), binarize(&base, threshold, false)));
        }
        let mut inverted = base.clone();
        imageops::invert(&mut inverted);
        rendered.push(("inv".to_string(), inverted));
    }
    rendered.push(("gray_sharp".to_string(), imageops::unsharpen(&base, 2.0, 3)));

    rendered
        .into_iter()
        .map(|(tag, image)| Ok(Variant { tag, image: encode_png(image)? }))
        .collect()
}

fn prepare(image: DynamicImage, upscale: f32) -> GrayImage {
    let mut gray = image.to_luma8();
    autocontrast(&mut gray);

    let factor = f64::from(upscale.max(1.0));
    let (width, height) = gray.dimensions();
    let scaled_width = (f64::from(width) * factor).round() as u32;
    let scaled_height = (f64::from(height) * factor).round() as u32;
    if factor > 1.0 && u64::from(scaled_width) * u64::from(scaled_height) <= MAX_UPSCALED_PIXELS {
        gray = imageops::resize(&gray, scaled_width, scaled_height, FilterType::CatmullRom);
    }
    gray
}

/// Stretches the darkest pixel to black and the brightest to white.
fn autocontrast(image: &mut GrayImage) {
    let (low, high) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if high <= low {
        return;
    }
    let span = u32::from(high - low);
    for pixel in image.pixels_mut() {
        pixel.0[0] = (u32::from(pixel.0[0] - low) * 255 / span) as u8;
    }
}

/// Threshold maximizing the between-class variance of the histogram.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[usize::from(pixel.0[0])] += 1;
    }
    let total: u64 = histogram.iter().sum();
    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, count)| level as f64 * *count as f64)
        .sum();

    let mut background = 0u64;
    let mut background_sum = 0.0;
    let mut best = (0u8, -1.0);
    for (level, count) in histogram.iter().enumerate() {
        background += count;
        if background == 0 {
            continue;
        }
        let foreground = total - background;
        if foreground == 0 {
            break;
        }
        background_sum += level as f64 * *count as f64;
        let background_mean = background_sum / background as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground as f64;
        let between =
            background as f64 * foreground as f64 * (background_mean - foreground_mean).powi(2);
        if between > best.1 {
            best = (level as u8, between);
        }
    }
    best.0
}

fn binarize(image: &GrayImage, threshold: u8, invert: bool) -> GrayImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let light = pixel.0[0] > threshold;
        pixel.0[0] = if light != invert { 255 } else { 0 };
    }
    out
}

fn encode_png(image: GrayImage) -> Result<Vec<u8>, ImageError> {
    let mut png = Vec::new();
    DynamicImage::ImageLuma8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}
