use crc32fast::Hasher;

use crate::{BakeError, Result};

pub(crate) const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

const KEYWORD: &[u8] = b"openbadges";
const ITXT: [u8; 4] = *b"iTXt";
const TEXT: [u8; 4] = *b"tEXt";
const IEND: [u8; 4] = *b"IEND";

struct Chunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
}

impl Chunk<'_> {
    fn is_badge(&self) -> bool {
        (self.kind == ITXT || self.kind == TEXT)
            && self.data.starts_with(KEYWORD)
            && self.data.get(KEYWORD.len()) == Some(&0)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn crc(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    hasher.finalize()
}

fn parse_chunks(image: &[u8]) -> Result<Vec<Chunk<'_>>> {
    let body = image
        .strip_prefix(&PNG_SIGNATURE[..])
        .ok_or(BakeError::UnsupportedFormat)?;

    let mut chunks = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        if body.len() - pos < 12 {
            return Err(BakeError::Malformed("truncated PNG chunk header".to_owned()));
        }
        let len = read_u32(body, pos) as usize;
        let kind = [body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]];
        let data_start = pos + 8;
        let data_end = data_start
            .checked_add(len)
            .filter(|end| end + 4 <= body.len())
            .ok_or_else(|| BakeError::Malformed("truncated PNG chunk".to_owned()))?;
        let data = &body[data_start..data_end];

        if read_u32(body, data_end) != crc(&kind, data) {
            return Err(BakeError::Malformed(format!(
                "CRC mismatch in {} chunk",
                String::from_utf8_lossy(&kind)
            )));
        }

        chunks.push(Chunk { kind, data });
        pos = data_end + 4;

        if kind == IEND {
            break;
        }
    }

    match chunks.last() {
        Some(last) if last.kind == IEND => Ok(chunks),
        _ => Err(BakeError::Malformed("PNG has no IEND chunk".to_owned())),
    }
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc(kind, data).to_be_bytes());
}

/// Builds the `iTXt` payload: keyword, uncompressed flag and method, empty
/// language tag, empty translated keyword, text.
fn itxt_payload(text: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(KEYWORD.len() + 5 + text.len());
    data.extend_from_slice(KEYWORD);
    data.extend_from_slice(&[0, 0, 0, 0, 0]);
    data.extend_from_slice(text.as_bytes());
    data
}

pub fn bake(image: &[u8], assertion: &str) -> Result<Vec<u8>> {
    let chunks = parse_chunks(image)?;

    let mut out = Vec::with_capacity(image.len() + assertion.len() + 32);
    out.extend_from_slice(&PNG_SIGNATURE);
    for chunk in chunks.iter().filter(|c| !c.is_badge()) {
        if chunk.kind == IEND {
            write_chunk(&mut out, &ITXT, &itxt_payload(assertion));
        }
        write_chunk(&mut out, &chunk.kind, chunk.data);
    }

    log::trace!("baked {} bytes of assertion into PNG", assertion.len());

    Ok(out)
}

pub fn unbake(image: &[u8]) -> Result<Option<String>> {
    let chunks = parse_chunks(image)?;

    let Some(chunk) = chunks.iter().find(|c| c.is_badge()) else {
        return Ok(None);
    };
    let rest = &chunk.data[KEYWORD.len() + 1..];

    if chunk.kind == TEXT {
        return String::from_utf8(rest.to_vec())
            .map(Some)
            .map_err(|_| BakeError::NotUtf8);
    }

    let [compression_flag, _compression_method, rest @ ..] = rest else {
        return Err(BakeError::Malformed("short iTXt chunk".to_owned()));
    };
    if *compression_flag != 0 {
        return Err(BakeError::CompressedText);
    }

    // skip language tag and translated keyword
    let mut rest = rest;
    for _ in 0..2 {
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| BakeError::Malformed("unterminated iTXt field".to_owned()))?;
        rest = &rest[nul + 1..];
    }

    String::from_utf8(rest.to_vec())
        .map(Some)
        .map_err(|_| BakeError::NotUtf8)
}

pub fn strip(image: &[u8]) -> Result<Vec<u8>> {
    let chunks = parse_chunks(image)?;

    let mut out = Vec::with_capacity(image.len());
    out.extend_from_slice(&PNG_SIGNATURE);
    for chunk in chunks.iter().filter(|c| !c.is_badge()) {
        write_chunk(&mut out, &chunk.kind, chunk.data);
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 1x1 PNG with placeholder image data; chunk CRCs are valid.
    pub(crate) fn minimal_png() -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        write_chunk(
            &mut out,
            b"IHDR",
            &[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0],
        );
        write_chunk(&mut out, b"IDAT", &[120, 156, 99, 0, 1, 0, 0, 5, 0, 1]);
        write_chunk(&mut out, b"IEND", &[]);
        out
    }

    #[test]
    fn bake_then_unbake() {
        let assertion = serde_json::json!({
            "@context": "https://w3id.org/openbadges/v2",
            "type": "Assertion",
            "id": "http://localhost:8000/public/assertions/abc",
            "narrative": "Grüße"
        });
        let text = serde_json::to_string_pretty(&assertion).unwrap();

        let baked = bake(&minimal_png(), &text).unwrap();
        let read = unbake(&baked).unwrap().unwrap();

        assert_eq!(read, text);
        let parsed: serde_json::Value = serde_json::from_str(&read).unwrap();
        assert_eq!(parsed, assertion);
    }

    #[test]
    fn badge_chunk_sits_before_iend() {
        let baked = bake(&minimal_png(), "{}").unwrap();
        let chunks = parse_chunks(&baked).unwrap();
        let kinds: Vec<_> = chunks.iter().map(|c| c.kind).collect();

        assert_eq!(kinds, vec![*b"IHDR", *b"IDAT", ITXT, IEND]);
    }

    #[test]
    fn rebaking_replaces_previous_assertion() {
        let once = bake(&minimal_png(), "first").unwrap();
        let twice = bake(&once, "second").unwrap();

        let badge_chunks = parse_chunks(&twice)
            .unwrap()
            .iter()
            .filter(|c| c.is_badge())
            .count();
        assert_eq!(badge_chunks, 1);
        assert_eq!(unbake(&twice).unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn unbaked_image_has_no_assertion() {
        assert_eq!(unbake(&minimal_png()).unwrap(), None);
    }

    #[test]
    fn reads_legacy_text_chunk() {
        let mut image = PNG_SIGNATURE.to_vec();
        write_chunk(&mut image, b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
        write_chunk(&mut image, b"tEXt", b"openbadges\0https://example.org/a/1");
        write_chunk(&mut image, b"IEND", &[]);

        assert_eq!(
            unbake(&image).unwrap().as_deref(),
            Some("https://example.org/a/1")
        );
    }

    #[test]
    fn corrupt_crc_is_rejected() {
        let mut image = minimal_png();
        let last = image.len() - 1;
        image[last] ^= 0xff;

        assert!(matches!(bake(&image, "{}"), Err(BakeError::Malformed(_))));
    }

    #[test]
    fn truncated_image_is_rejected() {
        let image = minimal_png();
        let truncated = &image[..image.len() - 6];

        assert!(matches!(unbake(truncated), Err(BakeError::Malformed(_))));
    }
}
