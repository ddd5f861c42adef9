use std::sync::LazyLock;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use rayon::prelude::*;
use regex::Regex;
use thiserror::Error;

use super::Transform;
use crate::asset::Asset;

/// Errors that can occur when optimizing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An error occurred during image decoding or encoding.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// An SVG file is not valid UTF-8.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Configuration for image optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    /// PNG effort, from 0 (leave untouched) up to 3 (best compression).
    pub optimization_level: u8,
    /// Re-encode JPEG files with this quality. Left lossless when unset.
    pub jpeg_quality: Option<u8>,
    /// Keep the `viewBox` attribute of SVG roots.
    pub keep_view_box: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            optimization_level: 3,
            jpeg_quality: None,
            keep_view_box: true,
        }
    }
}

/// Optimizes PNG, JPEG and SVG files. Other formats are copied as they are.
/// An optimized file replaces the original only when it is smaller.
#[derive(Debug, Clone, Default)]
pub struct Optimize {
    pub options: ImageOptions,
}

impl Optimize {
    pub fn new(options: ImageOptions) -> Self {
        Self { options }
    }
}

impl Transform for Optimize {
    fn name(&self) -> &'static str {
        "imagemin"
    }

    fn apply(&self, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        assets
            .into_par_iter()
            .map(|asset| {
                let path = asset.path.clone();
                optimize(asset, &self.options)
                    .map_err(|e| anyhow::Error::new(e).context(format!("couldn't optimize '{path}'")))
            })
            .collect()
    }
}

fn optimize(mut asset: Asset, options: &ImageOptions) -> Result<Asset, ImageError> {
    let optimized = match asset.extension().as_deref() {
        Some("png") => recompress_png(&asset.contents, options.optimization_level)?,
        Some("jpg" | "jpeg") => match options.jpeg_quality {
            Some(quality) => Some(reencode_jpeg(&asset.contents, quality)?),
            None => None,
        },
        Some("svg") => {
            let text = std::str::from_utf8(&asset.contents)?;
            Some(minify_svg(text, options.keep_view_box).into_bytes())
        }
        _ => None,
    };

    if let Some(optimized) = optimized
        && optimized.len() < asset.contents.len()
    {
        tracing::debug!(
            "Optimized '{}': {} → {} bytes",
            asset.path,
            asset.contents.len(),
            optimized.len()
        );
        asset.contents = optimized;
    }

    Ok(asset)
}

fn recompress_png(bytes: &[u8], level: u8) -> Result<Option<Vec<u8>>, ImageError> {
    let compression = match level {
        0 => return Ok(None),
        1 => CompressionType::Fast,
        2 => CompressionType::Default,
        _ => CompressionType::Best,
    };

    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
    image.write_with_encoder(encoder)?;

    Ok(Some(buffer))
}

fn reencode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, ImageError> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?;
    let image = DynamicImage::ImageRgb8(image.to_rgb8());

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;

    Ok(buffer)
}

static SVG_JUNK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|<!--.*?-->|<metadata\b.*?</metadata>")
        .expect("valid regex")
});

static SVG_GAPS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("valid regex"));

static SVG_VIEW_BOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<svg\b[^>]*?)\s+viewBox\s*=\s*("[^"]*"|'[^']*')"#).expect("valid regex")
});

/// Strips the XML prolog, comments and metadata, and the whitespace between
/// tags.
fn minify_svg(text: &str, keep_view_box: bool) -> String {
    let text = SVG_JUNK.replace_all(text, "");
    let text = SVG_GAPS.replace_all(&text, "><");
    let text = if keep_view_box {
        text
    } else {
        SVG_VIEW_BOX.replace(&text, "$1").into_owned().into()
    };
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png() -> Vec<u8> {
        let image = RgbaImage::from_pixel(64, 64, Rgba([200, 30, 30, 255]));
        let mut buffer = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut buffer, CompressionType::Fast, FilterType::NoFilter);
        DynamicImage::ImageRgba8(image)
            .write_with_encoder(encoder)
            .unwrap();
        buffer
    }

    #[test]
    fn png_is_never_larger() {
        let original = png();
        let assets = vec![Asset::new("a.png", original.clone())];

        let output = Optimize::default().apply(assets).unwrap();

        assert_eq!(output[0].path, "a.png");
        assert!(output[0].contents.len() <= original.len());
        assert!(image::load_from_memory(&output[0].contents).is_ok());
    }

    #[test]
    fn level_zero_leaves_png_alone() {
        let original = png();
        let optimize = Optimize::new(ImageOptions {
            optimization_level: 0,
            ..ImageOptions::default()
        });

        let output = optimize.apply(vec![Asset::new("a.png", original.clone())]).unwrap();

        assert_eq!(output[0].contents, original);
    }

    #[test]
    fn other_formats_are_copied() {
        let assets = vec![
            Asset::new("favicon.ico", vec![0, 0, 1, 0]),
            Asset::new("photo.jpg", vec![0xff, 0xd8, 0xff]),
        ];

        let output = Optimize::default().apply(assets.clone()).unwrap();

        assert_eq!(output, assets);
    }

    #[test]
    fn broken_png_names_the_file() {
        let assets = vec![Asset::new("icons/broken.png", b"not a png".to_vec())];

        let err = Optimize::default().apply(assets).unwrap_err();

        assert!(err.to_string().contains("icons/broken.png"));
    }

    #[test]
    fn svg_is_minified() {
        let svg = r#"<?xml version="1.0"?>
<!-- drawn by hand -->
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10">
    <metadata>editor junk</metadata>
    <rect width="10" height="10"/>
</svg>
"#;

        assert_eq!(
            minify_svg(svg, true),
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><rect width="10" height="10"/></svg>"#
        );
        assert_eq!(
            minify_svg(svg, false),
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="10" height="10"/></svg>"#
        );
    }
}
