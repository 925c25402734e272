//! Image capture of the currently displayed diagram.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::Clipboard;
use crate::protocol::{CaptureImageParams, CaptureTarget, ImageType};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no diagram is currently rendered")]
    NothingRendered,
    #[error("failed to load the rendered SVG: {0}")]
    SvgParse(String),
    #[error("failed to allocate a {width}x{height} canvas")]
    PixmapAlloc { width: u32, height: u32 },
    #[error("failed to encode PNG")]
    PngEncode,
    #[error("failed to encode JPG: {0}")]
    JpegEncode(String),
    #[error("failed to encode WEBP: {0}")]
    WebpEncode(String),
    #[error("failed to write to the clipboard: {0}")]
    Clipboard(String),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Largest canvas side and area a capture may allocate, the limits browsers put on `<canvas>`.
pub const MAX_CANVAS_SIDE: u32 = 32_767;
pub const MAX_CANVAS_AREA: u64 = 268_435_456;

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Encoded { image_type: ImageType, data: String },
    Copied,
}

/// Encodes `svg` according to `params`.
///
/// SVG to a file is returned as-is (base64 of the markup). Every other combination is
/// rasterized at `natural size * scale`; clipboard captures are always PNG.
pub fn capture(
    svg: Option<&str>,
    params: &CaptureImageParams,
    background: &str,
    clipboard: &dyn Clipboard,
) -> Result<CaptureOutcome> {
    let svg = svg.ok_or(CaptureError::NothingRendered)?;

    if params.target == CaptureTarget::Clipboard {
        let png = rasterize_png(svg, params.scale, background)?;
        clipboard
            .write_image(ImageType::Png.mime(), png)
            .map_err(|e| CaptureError::Clipboard(e.to_string()))?;
        return Ok(CaptureOutcome::Copied);
    }

    let bytes = match params.image_type {
        ImageType::Svg => svg.as_bytes().to_vec(),
        ImageType::Png => rasterize_png(svg, params.scale, background)?,
        ImageType::Jpg => rasterize_jpeg(svg, params.scale, params.quality, background)?,
        ImageType::Webp => rasterize_webp(svg, params.scale, background)?,
    };
    Ok(CaptureOutcome::Encoded {
        image_type: params.image_type,
        data: STANDARD.encode(bytes),
    })
}

pub fn rasterize_png(svg: &str, scale: f64, background: &str) -> Result<Vec<u8>> {
    let pixmap = draw(svg, scale, background_color(background))?;
    pixmap.encode_png().map_err(|_| CaptureError::PngEncode)
}

pub fn rasterize_jpeg(svg: &str, scale: f64, quality: f64, background: &str) -> Result<Vec<u8>> {
    // JPG has no alpha: anything that is not an opaque fill ends up on white.
    let fill = background_color(background)
        .filter(|c| c.is_opaque())
        .unwrap_or(tiny_skia::Color::WHITE);
    let pixmap = draw(svg, scale, Some(fill))?;
    let (w, h) = (pixmap.width(), pixmap.height());

    let mut rgb = Vec::with_capacity((w as usize) * (h as usize) * 3);
    for px in pixmap.data().chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }

    let quality = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
        .encode(&rgb, w, h, image::ExtendedColorType::Rgb8)
        .map_err(|e| CaptureError::JpegEncode(e.to_string()))?;
    Ok(out)
}

pub fn rasterize_webp(svg: &str, scale: f64, background: &str) -> Result<Vec<u8>> {
    let pixmap = draw(svg, scale, background_color(background))?;
    let (w, h) = (pixmap.width(), pixmap.height());

    let mut rgba = Vec::with_capacity((w as usize) * (h as usize) * 4);
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }

    let mut out = Vec::new();
    image::codecs::webp::WebPEncoder::new_lossless(&mut out)
        .encode(&rgba, w, h, image::ExtendedColorType::Rgba8)
        .map_err(|e| CaptureError::WebpEncode(e.to_string()))?;
    Ok(out)
}

/// Parses a CSS color for the canvas fill. Empty, `transparent` and unparseable values mean
/// "no fill".
fn background_color(text: &str) -> Option<tiny_skia::Color> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("transparent") {
        return None;
    }
    match svgtypes::Color::from_str(text) {
        Ok(c) => Some(tiny_skia::Color::from_rgba8(c.red, c.green, c.blue, c.alpha)),
        Err(_) => {
            tracing::debug!(background = text, "ignoring unparseable background color");
            None
        }
    }
}

fn font_database() -> Arc<usvg::fontdb::Database> {
    static DB: OnceLock<Arc<usvg::fontdb::Database>> = OnceLock::new();
    Arc::clone(DB.get_or_init(|| {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        Arc::new(db)
    }))
}

/// Root `viewBox` width/height, when present and positive.
fn viewbox_size(svg: &str) -> Option<(f32, f32)> {
    let i = svg.find("viewBox=\"")?;
    let rest = &svg[i + "viewBox=\"".len()..];
    let raw = &rest[..rest.find('"')?];
    let nums: Vec<f32> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    let &[_, _, width, height] = nums.as_slice() else {
        return None;
    };
    (width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0)
        .then_some((width, height))
}

fn canvas_size(natural_w: f32, natural_h: f32, scale: f64) -> Result<(u32, u32)> {
    let width = (f64::from(natural_w) * scale).ceil().max(1.0);
    let height = (f64::from(natural_h) * scale).ceil().max(1.0);
    let side = f64::from(MAX_CANVAS_SIDE);
    if !(width <= side && height <= side && width * height <= MAX_CANVAS_AREA as f64) {
        return Err(CaptureError::PixmapAlloc {
            width: width.min(f64::from(u32::MAX)) as u32,
            height: height.min(f64::from(u32::MAX)) as u32,
        });
    }
    Ok((width as u32, height as u32))
}

/// Renders the diagram onto a transparent canvas, then lays `fill` underneath it
/// (destination-over).
fn draw(svg: &str, scale: f64, fill: Option<tiny_skia::Color>) -> Result<tiny_skia::Pixmap> {
    let mut opt = usvg::Options::default();
    opt.fontdb = font_database();
    opt.font_family = "Arial".to_string();
    let tree = usvg::Tree::from_str(svg, &opt).map_err(|e| CaptureError::SvgParse(e.to_string()))?;

    let (natural_w, natural_h) = viewbox_size(svg).unwrap_or_else(|| {
        let size = tree.size();
        (size.width(), size.height())
    });
    let (width, height) = canvas_size(natural_w, natural_h, scale)?;
    let scale = scale as f32;

    let mut diagram =
        tiny_skia::Pixmap::new(width, height).ok_or(CaptureError::PixmapAlloc { width, height })?;
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut diagram.as_mut(),
    );

    let Some(fill) = fill else {
        return Ok(diagram);
    };
    let mut canvas =
        tiny_skia::Pixmap::new(width, height).ok_or(CaptureError::PixmapAlloc { width, height })?;
    canvas.fill(fill);
    canvas.draw_pixmap(
        0,
        0,
        diagram.as_ref(),
        &tiny_skia::PixmapPaint::default(),
        tiny_skia::Transform::identity(),
        None,
    );
    Ok(canvas)
}
