//! Processing applied to uploaded issuer and badge class images before they
//! are stored.

use once_cell::sync::Lazy;
use openbadges_bakery::{BakeError, ImageFormat};
use regex::Regex;

use crate::{blob_store::split_extension, cid::blake3::blake3_cid_raw_binary, error::Result};

static SCRIPT_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*/>|<script\b.*?</script\s*>").expect("valid script pattern")
});
static START_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(?P<name>[A-Za-z][^\s/>]*)(?P<attrs>(?:"[^"]*"|'[^']*'|[^"'>])*)>"#)
        .expect("valid start tag pattern")
});
// Browsers accept `/` or nothing at all between attributes.
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[\s/]*(?P<name>[^\s/>="']+)(?:\s*=\s*(?P<value>"[^"]*"|'[^']*'|[^\s"'>]+))?"#)
        .expect("valid attribute pattern")
});
static CHARACTER_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#[xX](?P<hex>[0-9a-fA-F]+)|#(?P<dec>[0-9]+)|(?P<named>[A-Za-z]+));?")
        .expect("valid character reference pattern")
});

/// An image as uploaded, or as left by the previous step.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        UploadedImage {
            filename: filename.into(),
            bytes,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageStep {
    /// Removes scripts, event handler attributes and `javascript:` links from SVG
    ScrubSvg,
    /// Removes any assertion already baked into the image
    StripBakedMetadata,
    /// Renames the file after the CID of its content
    HashFilename,
}

impl ImageStep {
    fn apply(&self, image: UploadedImage) -> Result<UploadedImage> {
        match self {
            ImageStep::ScrubSvg => {
                if ImageFormat::detect(&image.bytes) != Some(ImageFormat::Svg) {
                    return Ok(image);
                }
                let svg = String::from_utf8(image.bytes).map_err(|_| BakeError::NotUtf8)?;
                Ok(UploadedImage {
                    filename: image.filename,
                    bytes: scrub_svg(&svg).into_bytes(),
                })
            }
            ImageStep::StripBakedMetadata => Ok(UploadedImage {
                bytes: openbadges_bakery::strip(&image.bytes)?,
                filename: image.filename,
            }),
            ImageStep::HashFilename => {
                let ext = match ImageFormat::detect(&image.bytes) {
                    Some(format) => format.extension().to_owned(),
                    None => split_extension(&image.filename).1.to_lowercase(),
                };
                let cid = blake3_cid_raw_binary(&image.bytes)?;
                Ok(UploadedImage {
                    filename: format!("{cid}{ext}"),
                    bytes: image.bytes,
                })
            }
        }
    }
}

/// Removes `<script>` elements, `on*` event handler attributes and links
/// whose target resolves to a `javascript:` URL.
pub fn scrub_svg(svg: &str) -> String {
    let svg = SCRIPT_ELEMENT.replace_all(svg, "");
    START_TAG
        .replace_all(&svg, |tag: &regex::Captures| {
            let attrs = &tag["attrs"];
            let mut out = format!("<{}", &tag["name"]);
            let mut last = 0;
            for attr in ATTRIBUTE.captures_iter(attrs) {
                let (Some(whole), Some(name)) = (attr.get(0), attr.name("name")) else {
                    continue;
                };
                out.push_str(&attrs[last..whole.start()]);
                last = whole.end();

                let value = attr.name("value").map(|v| unquote(v.as_str())).unwrap_or("");
                if is_active_attribute(name.as_str(), value) {
                    log::debug!("scrubbed svg attribute {}", name.as_str());
                    continue;
                }
                out.push_str(whole.as_str());
            }
            out.push_str(&attrs[last..]);
            out.push('>');
            out
        })
        .into_owned()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}

fn is_active_attribute(name: &str, value: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if name.starts_with("on") {
        return true;
    }
    let is_link = name == "href"
        || name.ends_with(":href")
        || matches!(name.as_str(), "src" | "action" | "formaction");
    is_link && is_javascript_url(value)
}

/// Whether `value` is a `javascript:` URL once character references are
/// decoded and whitespace and control characters dropped.
fn is_javascript_url(value: &str) -> bool {
    let decoded = CHARACTER_REFERENCE.replace_all(value, |reference: &regex::Captures| {
        let code = if let Some(hex) = reference.name("hex") {
            u32::from_str_radix(hex.as_str(), 16).ok()
        } else if let Some(dec) = reference.name("dec") {
            dec.as_str().parse::<u32>().ok()
        } else {
            match reference["named"].to_ascii_lowercase().as_str() {
                "colon" => Some(u32::from(':')),
                "tab" => Some(u32::from('\t')),
                "newline" => Some(u32::from('\n')),
                "amp" => Some(u32::from('&')),
                "lt" => Some(u32::from('<')),
                "gt" => Some(u32::from('>')),
                "quot" => Some(u32::from('"')),
                "apos" => Some(u32::from('\'')),
                _ => None,
            }
        };
        code.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| reference[0].to_owned())
    });

    let normalized: String = decoded
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect();
    normalized.starts_with("javascript:")
}

/// An ordered list of steps run over every upload of one kind.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePipeline {
    steps: Vec<ImageStep>,
}

impl ImagePipeline {
    pub fn new(steps: Vec<ImageStep>) -> Self {
        ImagePipeline { steps }
    }

    pub fn for_issuer() -> Self {
        Self::new(vec![ImageStep::ScrubSvg])
    }

    pub fn for_badge_class() -> Self {
        Self::new(vec![
            ImageStep::ScrubSvg,
            ImageStep::StripBakedMetadata,
            ImageStep::HashFilename,
        ])
    }

    pub fn steps(&self) -> &[ImageStep] {
        &self.steps
    }

    pub fn run(&self, image: UploadedImage) -> Result<UploadedImage> {
        self.steps.iter().try_fold(image, |image, step| {
            log::trace!("image step {step:?} on {}", image.filename);
            step.apply(image)
        })
    }
}
