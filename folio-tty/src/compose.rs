//! Pixel compositing for the terminal frame: page rasters are copied into a
//! viewport-sized buffer and annotation marks are alpha-blended on top.

use folio_core::{AnnotationKind, OverlayMark, Rect, RenderImage};
use tracing::debug;

pub const BACKGROUND: [u8; 3] = [0x3a, 0x3a, 0x3a];
pub const SELECTION_COLOR: [u8; 3] = [0x42, 0x85, 0xf4];
const FALLBACK_COLOR: [u8; 3] = [0xff, 0xeb, 0x3b];

const HIGHLIGHT_ALPHA: f32 = 0.35;
const UNDERLINE_ALPHA: f32 = 0.9;
pub const SELECTION_ALPHA: f32 = 0.3;

/// Integer pixel rectangle, end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    /// Rounds outward and clips to `width` x `height`. `None` when nothing
    /// remains visible.
    pub fn from_rect(rect: &Rect, width: u32, height: u32) -> Option<Self> {
        let x0 = rect.left.floor().max(0.0);
        let y0 = rect.top.floor().max(0.0);
        let x1 = rect.right().ceil().min(width as f32);
        let y1 = rect.bottom().ceil().min(height as f32);
        if !(x1 > x0 && y1 > y0) {
            return None;
        }
        Some(Self {
            x0: x0 as u32,
            y0: y0 as u32,
            x1: x1 as u32,
            y1: y1 as u32,
        })
    }
}

pub fn frame(width: u32, height: u32) -> RenderImage {
    let mut image = RenderImage::blank(width, height);
    for pixel in image.pixels.chunks_exact_mut(4) {
        pixel[..3].copy_from_slice(&BACKGROUND);
        pixel[3] = 255;
    }
    image
}

/// Copies `source` into `target` with its top-left corner at (`left`, `top`),
/// clipping whatever falls outside.
pub fn blit(target: &mut RenderImage, source: &RenderImage, left: i64, top: i64) {
    if source.is_empty() || target.is_empty() {
        return;
    }
    let x_start = left.max(0);
    let y_start = top.max(0);
    let x_end = (left + i64::from(source.width)).min(i64::from(target.width));
    let y_end = (top + i64::from(source.height)).min(i64::from(target.height));
    if x_start >= x_end || y_start >= y_end {
        return;
    }

    let row_bytes = ((x_end - x_start) * 4) as usize;
    for y in y_start..y_end {
        let source_x = (x_start - left) as usize;
        let source_y = (y - top) as usize;
        let from = (source_y * source.width as usize + source_x) * 4;
        let to = (y as usize * target.width as usize + x_start as usize) * 4;
        target.pixels[to..to + row_bytes].copy_from_slice(&source.pixels[from..from + row_bytes]);
    }
}

pub fn fill_rect(image: &mut RenderImage, rect: PixelRect, color: [u8; 3], alpha: f32) {
    if rect.x0 >= rect.x1 || rect.y0 >= rect.y1 || image.is_empty() {
        return;
    }
    let width = image.width as usize;
    let x1 = rect.x1.min(image.width);
    let y1 = rect.y1.min(image.height);
    let x0 = rect.x0.min(x1);
    let y0 = rect.y0.min(y1);

    for y in y0..y1 {
        let row_start = (y as usize) * width * 4;
        for x in x0..x1 {
            let idx = row_start + (x as usize) * 4;
            blend_pixel(&mut image.pixels[idx..idx + 4], color, alpha);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, tint) in pixel.iter_mut().zip(color) {
        *channel = (*channel as f32 * inv + tint as f32 * alpha)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}

/// Parses `#rrggbb` (or `#rgb`).
pub fn parse_hex_color(raw: &str) -> Option<[u8; 3]> {
    let hex = raw.trim().strip_prefix('#')?;
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_owned(),
        _ => return None,
    };
    let channel = |index: usize| u8::from_str_radix(expanded.get(index..index + 2)?, 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Paints overlay marks whose rects are page-local, for a page drawn with its
/// top-left corner at `origin`.
pub fn paint_marks(image: &mut RenderImage, marks: &[OverlayMark], origin: (f32, f32)) {
    for mark in marks {
        let color = parse_hex_color(&mark.color).unwrap_or_else(|| {
            debug!(color = %mark.color, "unparseable annotation colour");
            FALLBACK_COLOR
        });
        let alpha = match mark.kind {
            AnnotationKind::Highlight => HIGHLIGHT_ALPHA,
            AnnotationKind::Underline => UNDERLINE_ALPHA,
        };
        let rect = mark.rect.translated(origin.0, origin.1);
        if let Some(pixels) = PixelRect::from_rect(&rect, image.width, image.height) {
            fill_rect(image, pixels, color, alpha);
        }
    }
}

/// Tints `rects` (already in frame coordinates) as the live selection.
pub fn paint_selection(image: &mut RenderImage, rects: &[Rect]) {
    for rect in rects {
        if let Some(pixels) = PixelRect::from_rect(rect, image.width, image.height) {
            fill_rect(image, pixels, SELECTION_COLOR, SELECTION_ALPHA);
        }
    }
}
