//! Caption overlay for generated images.

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontArc, PxScale};
use image::{DynamicImage, ImageBuffer, Pixel, Rgb, Rgba};
use imageproc::drawing::draw_text_mut;

use crate::error::{Error, Result};

/// DejaVu Sans, used when no font file is given.
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Default caption size in pixels per em.
pub const DEFAULT_FONT_SIZE: u32 = 16;

/// Distance from the left and bottom edges.
const CAPTION_MARGIN: i32 = 15;

/// Outline radius around each glyph.
const STROKE_WIDTH: i32 = 3;

/// Font settings for [`add_caption`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionStyle {
    /// Font size in pixels per em.
    pub font_size: u32,

    /// TrueType/OpenType font file. None for the bundled DejaVu Sans.
    pub font_path: Option<PathBuf>,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            font_path: None,
        }
    }
}

/// Draw a caption near the bottom-left corner of an image, in place.
///
/// The text is white with a black outline so it stays readable on any
/// background. RGB and RGBA images are drawn on directly; other color modes
/// are converted to RGB first.
///
/// # Errors
///
/// Returns an error if the font size is zero or the font cannot be read or
/// parsed. The image is left untouched in that case.
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
pub fn add_caption(img: &mut DynamicImage, caption: &str, style: &CaptionStyle) -> Result<()> {
    if style.font_size == 0 {
        return Err(Error::InvalidParameter {
            name: "font_size".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    let font = match &style.font_path {
        Some(path) => load_font(path)?,
        None => FontArc::try_from_slice(DEFAULT_FONT).map_err(|err| Error::FontLoad {
            path: PathBuf::from("<bundled DejaVuSans.ttf>"),
            reason: err.to_string(),
        })?,
    };
    let scale = em_scale(&font, style.font_size as f32);

    let x = CAPTION_MARGIN;
    let y = img.height() as i32 - CAPTION_MARGIN - style.font_size as i32;

    tracing::debug!("Drawing caption {caption:?} at ({x}, {y}) with scale {scale:?}");

    match img {
        DynamicImage::ImageRgb8(canvas) => draw_stroked_text(
            canvas,
            Rgb([255, 255, 255]),
            Rgb([0, 0, 0]),
            (x, y),
            scale,
            &font,
            caption,
        ),
        DynamicImage::ImageRgba8(canvas) => draw_stroked_text(
            canvas,
            Rgba([255, 255, 255, 255]),
            Rgba([0, 0, 0, 255]),
            (x, y),
            scale,
            &font,
            caption,
        ),
        other => {
            let mut canvas = other.to_rgb8();
            draw_stroked_text(
                &mut canvas,
                Rgb([255, 255, 255]),
                Rgb([0, 0, 0]),
                (x, y),
                scale,
                &font,
                caption,
            );
            *other = DynamicImage::ImageRgb8(canvas);
        }
    }

    Ok(())
}

/// Read and parse a font file.
fn load_font(path: &Path) -> Result<FontArc> {
    let data = std::fs::read(path).map_err(|err| Error::FontLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    FontArc::try_from_vec(data).map_err(|err| Error::FontLoad {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

/// Scale that renders `font_size` pixels per em.
///
/// `PxScale` measures the full line height, which is usually taller than the em.
fn em_scale(font: &FontArc, font_size: f32) -> PxScale {
    match font.units_per_em() {
        Some(units_per_em) => PxScale::from(font_size * font.height_unscaled() / units_per_em),
        None => PxScale::from(font_size),
    }
}

/// Draw the outline at every offset within the stroke radius, then the fill on top.
fn draw_stroked_text<P>(
    canvas: &mut ImageBuffer<P, Vec<u8>>,
    fill: P,
    stroke: P,
    (x, y): (i32, i32),
    scale: PxScale,
    font: &FontArc,
    text: &str,
) where
    P: Pixel<Subpixel = u8>,
{
    for (dx, dy) in stroke_offsets(STROKE_WIDTH) {
        draw_text_mut(canvas, stroke, x + dx, y + dy, scale, font, text);
    }
    draw_text_mut(canvas, fill, x, y, scale, font, text);
}

/// Offsets inside a disc of the given radius, excluding the center.
fn stroke_offsets(radius: i32) -> Vec<(i32, i32)> {
    (-radius..=radius)
        .flat_map(|dy| (-radius..=radius).map(move |dx| (dx, dy)))
        .filter(|&(dx, dy)| (dx, dy) != (0, 0) && dx * dx + dy * dy <= radius * radius)
        .collect()
}
