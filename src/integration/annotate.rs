//! Rendering of detection boxes, labels and zone overlays.

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::Rgb;
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;

use crate::Frame;
use crate::error::{Error, Result};
use crate::zone::{Detection, LineZone, Point, RegisteredZone};

const PALETTE: [[u8; 3]; 8] = [
    [56, 56, 255],
    [151, 157, 255],
    [31, 112, 255],
    [29, 178, 255],
    [49, 210, 207],
    [10, 249, 72],
    [23, 204, 146],
    [134, 219, 61],
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Draws annotations onto frames.
///
/// Text is only rendered when a font has been loaded; boxes and zone
/// geometry are always drawn.
#[derive(Clone)]
pub struct Annotator {
    thickness: u32,
    text_scale: f32,
    font: Option<FontArc>,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("thickness", &self.thickness)
            .field("text_scale", &self.text_scale)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            thickness: 2,
            text_scale: 16.0,
            font: None,
        }
    }
}

impl Annotator {
    pub fn new(thickness: u32, text_scale: f32) -> Self {
        Self {
            thickness: thickness.max(1),
            text_scale,
            font: None,
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Load a TrueType/OpenType font for labels.
    pub fn with_font_file(self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| {
            Error::Config(format!("invalid font file {}: {}", path.display(), e))
        })?;
        Ok(self.with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Boxes with one label per detection (`labels` is parallel to `detections`).
    pub fn draw_detections(&self, frame: &mut Frame, detections: &[Detection], labels: &[String]) {
        for (i, det) in detections.iter().enumerate() {
            let color = Rgb(PALETTE[det.class_id as usize % PALETTE.len()]);
            let b = &det.bbox;
            let x = b.x_min.round() as i32;
            let y = b.y_min.round() as i32;
            let w = b.width().round().max(1.0) as u32;
            let h = b.height().round().max(1.0) as u32;
            for t in 0..self.thickness {
                let grow = t as i32;
                let rect = Rect::at(x - grow, y - grow).of_size(w + 2 * t, h + 2 * t);
                draw_hollow_rect_mut(frame, rect, color);
            }
            if let Some(label) = labels.get(i) {
                self.draw_label(frame, label, x, y, color);
            }
        }
    }

    /// The line with its running in/out counts.
    pub fn draw_line_zone(&self, frame: &mut Frame, zone: &LineZone) {
        let (start, end) = (zone.start(), zone.end());
        self.draw_segment(frame, &start, &end, LINE_COLOR);
        let text = format!("in: {} out: {}", zone.in_count(), zone.out_count());
        let x = ((start.x + end.x) / 2.0) as i32;
        let y = ((start.y + end.y) / 2.0) as i32;
        self.draw_label(frame, &text, x, y, Rgb([0, 0, 0]));
    }

    /// Polygon outline with the current occupancy at its centroid.
    pub fn draw_polygon_zone(&self, frame: &mut Frame, entry: &RegisteredZone) {
        let color = Rgb(entry.style.color);
        let vertices = entry.zone.vertices();
        let thickness = entry.style.thickness.max(1);
        for (i, a) in vertices.iter().enumerate() {
            let b = &vertices[(i + 1) % vertices.len()];
            self.draw_segment_with(frame, a, b, color, thickness);
        }
        let n = vertices.len() as f32;
        let cx = vertices.iter().map(|p| p.x).sum::<f32>() / n;
        let cy = vertices.iter().map(|p| p.y).sum::<f32>() / n;
        let text = format!("count: {}", entry.zone.current_count());
        self.draw_label(frame, &text, cx as i32, cy as i32, color);
    }

    fn draw_segment(&self, frame: &mut Frame, a: &Point, b: &Point, color: Rgb<u8>) {
        self.draw_segment_with(frame, a, b, color, self.thickness);
    }

    fn draw_segment_with(&self, frame: &mut Frame, a: &Point, b: &Point, color: Rgb<u8>, thickness: u32) {
        let half = (thickness / 2) as i32;
        for offset in -half..=half.max(0) {
            let o = offset as f32;
            draw_line_segment_mut(frame, (a.x + o, a.y), (b.x + o, b.y), color);
            draw_line_segment_mut(frame, (a.x, a.y + o), (b.x, b.y + o), color);
        }
    }

    /// Filled background with text on top, sitting just above `(x, y)`.
    fn draw_label(&self, frame: &mut Frame, text: &str, x: i32, y: i32, background: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(self.text_scale);
        let (tw, th) = text_size(scale, font, text);
        let pad = 2;
        let top = (y - th as i32 - 2 * pad).max(0);
        let rect = Rect::at(x, top).of_size(tw.max(1) + 2 * pad as u32, th.max(1) + 2 * pad as u32);
        draw_filled_rect_mut(frame, rect, background);
        draw_text_mut(frame, TEXT_COLOR, x + pad, top + pad, scale, font, text);
    }
}

/// Label text for one detection: `"#<id> <class> <conf>"` or `"<class> <conf>"`.
pub fn detection_label(det: &Detection, class_name: &str) -> String {
    match det.track_id {
        Some(id) => format!("#{} {} {:.2}", id, class_name, det.confidence),
        None => format!("{} {:.2}", class_name, det.confidence),
    }
}
