//! Open Badges image baking.
//!
//! Embeds an assertion (JSON text or a hosted assertion URL) into a PNG or SVG
//! image and reads it back. PNG images carry the assertion in an `iTXt` chunk
//! with the keyword `openbadges`, SVG images carry it in an
//! `openbadges:assertion` element placed as the first child of the root.

/// PNG chunk level baking
pub mod png;
/// SVG element level baking
pub mod svg;

/// Errors raised while baking or unbaking an image
#[derive(Debug, thiserror::Error)]
pub enum BakeError {
    #[error("image is neither a PNG nor an SVG document")]
    UnsupportedFormat,
    #[error("malformed image: {0}")]
    Malformed(String),
    #[error("compressed openbadges text chunks are not supported")]
    CompressedText,
    #[error("baked assertion is not valid UTF-8")]
    NotUtf8,
}

pub type Result<T> = std::result::Result<T, BakeError>;

/// Image container formats that can carry a baked assertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Svg,
}

impl ImageFormat {
    /// Sniffs the format from the leading bytes of an image.
    pub fn detect(image: &[u8]) -> Option<Self> {
        if image.starts_with(&png::PNG_SIGNATURE) {
            return Some(ImageFormat::Png);
        }

        let head = &image[..image.len().min(1024)];
        let head = String::from_utf8_lossy(head);
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if (head.starts_with("<?xml") || head.starts_with("<svg") || head.starts_with("<!"))
            && head.contains("<svg")
        {
            return Some(ImageFormat::Svg);
        }

        None
    }

    /// File extension (with leading dot) conventionally used for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => ".png",
            ImageFormat::Svg => ".svg",
        }
    }
}

/// Bakes `assertion` into a copy of `image`, replacing any previously baked assertion.
///
/// `verify_url` is only used by SVG output, where it is written to the
/// `verify` attribute of the assertion element.
pub fn bake(image: &[u8], assertion: &str, verify_url: Option<&str>) -> Result<Vec<u8>> {
    match ImageFormat::detect(image) {
        Some(ImageFormat::Png) => png::bake(image, assertion),
        Some(ImageFormat::Svg) => {
            let svg = std::str::from_utf8(image).map_err(|_| BakeError::NotUtf8)?;
            Ok(svg::bake(svg, assertion, verify_url)?.into_bytes())
        }
        None => Err(BakeError::UnsupportedFormat),
    }
}

/// Reads the baked assertion out of an image, if one is present.
pub fn unbake(image: &[u8]) -> Result<Option<String>> {
    match ImageFormat::detect(image) {
        Some(ImageFormat::Png) => png::unbake(image),
        Some(ImageFormat::Svg) => {
            let svg = std::str::from_utf8(image).map_err(|_| BakeError::NotUtf8)?;
            svg::unbake(svg)
        }
        None => Err(BakeError::UnsupportedFormat),
    }
}

/// Removes any baked assertion from an image, leaving everything else intact.
pub fn strip(image: &[u8]) -> Result<Vec<u8>> {
    match ImageFormat::detect(image) {
        Some(ImageFormat::Png) => png::strip(image),
        Some(ImageFormat::Svg) => {
            let svg = std::str::from_utf8(image).map_err(|_| BakeError::NotUtf8)?;
            Ok(svg::strip(svg).into_bytes())
        }
        None => Err(BakeError::UnsupportedFormat),
    }
}
