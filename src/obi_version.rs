//! Open Badges version tokens and their JSON-LD contexts.

use serde::{Deserialize, Serialize};

use crate::error::{BadgeError, Result};

/// Supported Open Badges specification versions.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum ObiVersion {
    #[serde(rename = "1_1")]
    #[strum(serialize = "1_1")]
    V1_1,
    #[serde(rename = "2_0")]
    #[strum(serialize = "2_0")]
    V2_0,
}

/// Version rendered when no version is requested.
pub const CURRENT_OBI_VERSION: ObiVersion = ObiVersion::V2_0;

/// Version baked into the assertion image fixed at issuance time.
pub const UNVERSIONED_BAKED_VERSION: ObiVersion = ObiVersion::V2_0;

/// Alias accepted by [`resolve`] for the current version.
pub const CURRENT_ALIAS: &str = "current";

impl ObiVersion {
    pub fn context_iri(&self) -> &'static str {
        match self {
            ObiVersion::V1_1 => "https://w3id.org/openbadges/v1",
            ObiVersion::V2_0 => "https://w3id.org/openbadges/v2",
        }
    }

    pub fn is_current(&self) -> bool {
        *self == CURRENT_OBI_VERSION
    }
}

/// Normalizes a requested version token and returns it with its context IRI.
///
/// An empty token or `current` resolves to [`CURRENT_OBI_VERSION`].
pub fn resolve(version: &str) -> Result<(ObiVersion, &'static str)> {
    let version = version.trim();
    let version = if version.is_empty() || version.eq_ignore_ascii_case(CURRENT_ALIAS) {
        CURRENT_OBI_VERSION
    } else {
        version
            .parse::<ObiVersion>()
            .map_err(|_| BadgeError::UnsupportedVersion(version.to_owned()))?
    };

    Ok((version, version.context_iri()))
}

/// Appends `v={version}` to a locally hosted URL when rendering a non-current version.
///
/// Imported (externally hosted) URLs are returned unchanged.
pub fn add_id_version_suffix(url: &str, version: ObiVersion, origin: &str) -> String {
    if version.is_current() || !url.starts_with(origin) {
        return url.to_owned();
    }

    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}v={version}")
}
