//! Stateless pixel enhancement applied before detection.

use image::{GrayImage, Luma};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::Frame;

/// Numeric parameters accepted alongside an enhancement kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceParams {
    pub clip_limit: f32,
    pub tile_grid: u32,
    pub brightness: i32,
    pub contrast: i32,
}

impl Default for EnhanceParams {
    fn default() -> Self {
        Self {
            clip_limit: 3.0,
            tile_grid: 8,
            brightness: 0,
            contrast: 0,
        }
    }
}

/// A resolved enhancement transform.
#[derive(Debug, Clone, PartialEq)]
pub enum Enhancement {
    /// Contrast-limited adaptive histogram equalization of luma.
    Clahe { clip_limit: f32, tile_grid: u32 },
    /// Global histogram equalization of luma.
    HistogramEqualization,
    /// `brightness` in `[-255, 255]`, `contrast` in `[-127, 127]`.
    BrightnessContrast { brightness: i32, contrast: i32 },
    /// Linear stretch of the frame's value range to `0..=255`.
    ContrastStretch,
    /// Unrecognised kind; the frame passes through unchanged.
    Unknown(String),
}

impl Enhancement {
    /// Resolve a kind name (case-insensitive) with its parameters.
    pub fn parse(kind: &str, params: &EnhanceParams) -> Self {
        match kind.trim().to_ascii_uppercase().as_str() {
            "CLAHE" => Self::Clahe {
                clip_limit: params.clip_limit,
                tile_grid: params.tile_grid,
            },
            "HE" | "HIST" | "HIST_EQ" => Self::HistogramEqualization,
            "BRIGHTNESS" | "BC" => Self::BrightnessContrast {
                brightness: params.brightness.clamp(-255, 255),
                contrast: params.contrast.clamp(-127, 127),
            },
            "CS" | "CONTRAST_STRETCH" => Self::ContrastStretch,
            _ => Self::Unknown(kind.to_string()),
        }
    }
}

/// Pure frame transform. Output has the input's dimensions.
pub trait Enhancer {
    fn enhance(&self, frame: &Frame, enhancement: &Enhancement) -> Frame;
}

/// Built-in implementation of every [`Enhancement`] kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEnhancer;

impl Enhancer for StandardEnhancer {
    fn enhance(&self, frame: &Frame, enhancement: &Enhancement) -> Frame {
        match enhancement {
            Enhancement::Clahe {
                clip_limit,
                tile_grid,
            } => map_luma(frame, |luma| clahe(luma, *clip_limit, *tile_grid)),
            Enhancement::HistogramEqualization => {
                map_luma(frame, imageproc::contrast::equalize_histogram)
            }
            Enhancement::BrightnessContrast {
                brightness,
                contrast,
            } => brightness_contrast(frame, *brightness, *contrast),
            Enhancement::ContrastStretch => contrast_stretch(frame),
            Enhancement::Unknown(kind) => {
                log::debug!("unknown enhancement kind '{}', frame unchanged", kind);
                frame.clone()
            }
        }
    }
}

fn luma_of(rgb: &[u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

/// Apply a luma-only transform, keeping chroma.
///
/// With Cb/Cr held fixed, a change of Y shifts R, G and B by the same amount.
fn map_luma<F>(frame: &Frame, transform: F) -> Frame
where
    F: FnOnce(&GrayImage) -> GrayImage,
{
    let luma = GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        Luma([luma_of(&frame.get_pixel(x, y).0).round() as u8])
    });
    let mapped = transform(&luma);

    let mut out = frame.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let delta = mapped.get_pixel(x, y)[0] as f32 - luma.get_pixel(x, y)[0] as f32;
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 + delta).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// CLAHE over a `tile_grid` x `tile_grid` grid with bilinear blending of tile mappings.
///
/// `clip_limit` is relative to a uniform histogram, as in OpenCV.
fn clahe(luma: &GrayImage, clip_limit: f32, tile_grid: u32) -> GrayImage {
    let (width, height) = luma.dimensions();
    if width == 0 || height == 0 {
        return luma.clone();
    }
    let grid_x = tile_grid.clamp(1, width) as usize;
    let grid_y = tile_grid.clamp(1, height) as usize;
    let tile_w = (width as usize).div_ceil(grid_x);
    let tile_h = (height as usize).div_ceil(grid_y);

    // luts[[ty, tx, v]] maps an input level to the tile's equalized level.
    let mut luts = Array3::<u8>::zeros((grid_y, grid_x, 256));
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width as usize);
            let y1 = (y0 + tile_h).min(height as usize);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[luma.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }
            let area = ((x1.saturating_sub(x0)) * (y1.saturating_sub(y0))) as u32;
            if area == 0 {
                for v in 0..256 {
                    luts[[ty, tx, v]] = v as u8;
                }
                continue;
            }

            clip_histogram(&mut hist, clip_limit, area);

            let scale = 255.0 / area as f32;
            let mut cdf = 0u32;
            for v in 0..256 {
                cdf += hist[v];
                luts[[ty, tx, v]] = (cdf as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let blend = |pos: u32, tile: usize, grid: usize| -> (usize, usize, f32) {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let lo = f.floor().clamp(0.0, (grid - 1) as f32) as usize;
        let hi = (lo + 1).min(grid - 1);
        let weight = (f - lo as f32).clamp(0.0, 1.0);
        (lo, hi, weight)
    };

    GrayImage::from_fn(width, height, |x, y| {
        let v = luma.get_pixel(x, y)[0] as usize;
        let (tx0, tx1, ax) = blend(x, tile_w, grid_x);
        let (ty0, ty1, ay) = blend(y, tile_h, grid_y);
        let top = luts[[ty0, tx0, v]] as f32 * (1.0 - ax) + luts[[ty0, tx1, v]] as f32 * ax;
        let bottom = luts[[ty1, tx0, v]] as f32 * (1.0 - ax) + luts[[ty1, tx1, v]] as f32 * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}

/// Clip bins above the limit and spread the excess evenly over all bins.
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    if clip_limit <= 0.0 {
        return;
    }
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let per_bin = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }
}

fn brightness_contrast(frame: &Frame, brightness: i32, contrast: i32) -> Frame {
    let mut alpha = 1.0f32;
    let mut gamma = 0.0f32;

    if brightness != 0 {
        let (shadow, highlight) = if brightness > 0 {
            (brightness as f32, 255.0)
        } else {
            (0.0, 255.0 + brightness as f32)
        };
        alpha = (highlight - shadow) / 255.0;
        gamma = shadow;
    }
    if contrast != 0 {
        let c = contrast as f32;
        let f = 131.0 * (c + 127.0) / (127.0 * (131.0 - c));
        alpha *= f;
        gamma = gamma * f + 127.0 * (1.0 - f);
    }

    let mut out = frame.clone();
    for c in out.iter_mut() {
        *c = (*c as f32 * alpha + gamma).round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn contrast_stretch(frame: &Frame) -> Frame {
    let (min, max) = frame
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max <= min {
        return frame.clone();
    }
    let scale = 255.0 / (max - min) as f32;
    let mut out = frame.clone();
    for c in out.iter_mut() {
        *c = ((*c - min) as f32 * scale) as u8;
    }
    out
}
