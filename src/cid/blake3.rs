use anyhow::Result;
use cid::{multihash::Multihash, Cid};

use crate::cid::{multicodec, multihash};

pub fn cid_from_blake3_hash(codec: u64, hash: &[u8]) -> Result<String> {
    let multihash = Multihash::<64>::wrap(multihash::BLAKE3, hash)?;

    Ok(Cid::new_v1(codec, multihash).to_string())
}

pub fn blake3_cid(codec: u64, data: &[u8]) -> Result<String> {
    let hash = ::blake3::hash(data);
    cid_from_blake3_hash(codec, hash.as_bytes())
}

/// CID of uploaded image bytes, used for content-addressed filenames.
pub fn blake3_cid_raw_binary(data: &[u8]) -> Result<String> {
    blake3_cid(multicodec::RAW_BINARY, data)
}

/// CID over several byte segments, each length-prefixed so that segment
/// boundaries contribute to the digest.
pub fn blake3_cid_of_parts(codec: u64, parts: &[&[u8]]) -> Result<String> {
    let mut hasher = ::blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    cid_from_blake3_hash(codec, hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_is_deterministic() {
        let a = blake3_cid_raw_binary(b"badge").unwrap();
        let b = blake3_cid_raw_binary(b"badge").unwrap();
        let c = blake3_cid_raw_binary(b"badges").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('b'), "expected base32 CIDv1, got {a}");
    }

    #[test]
    fn part_boundaries_matter() {
        let joined = blake3_cid_of_parts(multicodec::JSON, &[b"ab", b"c"]).unwrap();
        let split = blake3_cid_of_parts(multicodec::JSON, &[b"a", b"bc"]).unwrap();

        assert_ne!(joined, split);
    }
}
