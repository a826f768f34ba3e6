/// BLAKE3-based CID utilities
pub mod blake3;

/// Multicodec identifiers for content types
pub mod multicodec {
    /// Raw binary data
    pub const RAW_BINARY: u64 = 0x55;
    /// JSON
    pub const JSON: u64 = 0x0200;
}

/// Multihash identifiers for hash algorithms
pub mod multihash {
    /// BLAKE3 hash
    pub const BLAKE3: u64 = 0x1e;
}
