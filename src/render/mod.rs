//! Open Badges JSON-LD documents for issuers, badge classes and assertions.
//!
//! Rendering is pure: callers load an entity together with its children into
//! a view and get back an ordered JSON object. Key order is part of the
//! output, since the text is baked into images verbatim.

pub mod assertion;
pub mod badge_class;
pub mod issuer;

pub use assertion::{evidence_json, render_assertion, v1_evidence_url, AssertionView};
pub use badge_class::{alignment_json, render_badge_class, BadgeClassView};
pub use issuer::{render_issuer, IssuerView};

use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Map, Value};

use crate::{
    config::Settings,
    models::{Extension, OriginalJson, Provenance},
    obi_version::{add_id_version_suffix, ObiVersion, CURRENT_OBI_VERSION},
};

/// An ordered JSON-LD object.
pub type JsonLdDocument = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderOptions {
    pub version: ObiVersion,
    /// Embed the badge class document instead of its id (assertions only)
    pub expand_badge_class: bool,
    /// Embed the issuer document in an expanded badge class (assertions only)
    pub expand_issuer: bool,
    /// Use ids without the version suffix
    pub use_canonical_id: bool,
    /// Append unknown keys from the imported JSON
    pub include_extra: bool,
}

impl RenderOptions {
    pub fn new(version: ObiVersion) -> Self {
        RenderOptions {
            version,
            expand_badge_class: false,
            expand_issuer: false,
            use_canonical_id: false,
            include_extra: true,
        }
    }

    /// Expands both the badge class and its issuer.
    pub fn expanded(mut self) -> Self {
        self.expand_badge_class = true;
        self.expand_issuer = true;
        self
    }

    pub fn canonical(mut self) -> Self {
        self.use_canonical_id = true;
        self
    }

    pub fn without_extra(mut self) -> Self {
        self.include_extra = false;
        self
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::new(CURRENT_OBI_VERSION)
    }
}

/// Public URLs of locally hosted entities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Urls {
    origin: String,
}

impl Urls {
    pub fn new(settings: &Settings) -> Self {
        Self::from_origin(settings.origin())
    }

    pub fn from_origin(origin: &str) -> Self {
        Urls {
            origin: origin.trim_end_matches('/').to_owned(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn issuer(&self, entity_id: &str) -> String {
        format!("{}/public/issuers/{entity_id}", self.origin)
    }

    pub fn issuer_image(&self, entity_id: &str) -> String {
        format!("{}/image", self.issuer(entity_id))
    }

    pub fn badge_class(&self, entity_id: &str) -> String {
        format!("{}/public/badges/{entity_id}", self.origin)
    }

    pub fn badge_class_image(&self, entity_id: &str) -> String {
        format!("{}/image", self.badge_class(entity_id))
    }

    pub fn badge_class_criteria(&self, entity_id: &str) -> String {
        format!("{}/criteria", self.badge_class(entity_id))
    }

    pub fn assertion(&self, entity_id: &str) -> String {
        format!("{}/public/assertions/{entity_id}", self.origin)
    }

    pub fn assertion_image(&self, entity_id: &str) -> String {
        format!("{}/image", self.assertion(entity_id))
    }

    /// Where the recipient can share the assertion, optionally naming their identity.
    pub fn share(&self, entity_id: &str, identity: Option<(&str, &str)>) -> String {
        let url = self.assertion(entity_id);
        match identity {
            Some((recipient_type, identifier)) => {
                format!(
                    "{url}?identity__{recipient_type}={}",
                    utf8_percent_encode(identifier, QUERY_VALUE)
                )
            }
            None => url,
        }
    }

    /// The entity's JSON-LD id: its source URL when imported, else the local URL.
    pub fn jsonld_id(&self, provenance: &Provenance, local_url: String) -> String {
        provenance.source_url.clone().unwrap_or(local_url)
    }

    /// `id` as rendered for `opts`.
    pub fn versioned(&self, id: &str, opts: &RenderOptions) -> String {
        if opts.use_canonical_id {
            id.to_owned()
        } else {
            add_id_version_suffix(id, opts.version, &self.origin)
        }
    }
}

/// Everything but unreserved characters and `/`.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

pub(crate) fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn insert_opt(doc: &mut JsonLdDocument, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        doc.insert(key.to_owned(), Value::String(value.to_owned()));
    }
}

/// Sets `image` to the local URL, or to the imported image object with its
/// `id` replaced by the local URL.
pub(crate) fn insert_image<E: OriginalJson>(
    doc: &mut JsonLdDocument,
    entity: &E,
    local_url: Option<String>,
) {
    let image = match (entity.original_image_info(), local_url) {
        (Some(mut info), url) => {
            match url {
                Some(url) => info.insert("id".to_owned(), Value::String(url)),
                None => info.remove("id"),
            };
            Value::Object(info)
        }
        (None, Some(url)) => Value::String(url),
        (None, None) => return,
    };
    doc.insert("image".to_owned(), image);
}

/// Source and hosted URLs of an imported entity, named per version.
pub(crate) fn insert_source_urls(
    doc: &mut JsonLdDocument,
    provenance: &Provenance,
    hosted_url: String,
    version: ObiVersion,
) {
    let Some(source_url) = &provenance.source_url else {
        return;
    };
    let (source_key, hosted_key) = match version {
        ObiVersion::V1_1 => ("source_url", "hosted_url"),
        ObiVersion::V2_0 => ("sourceUrl", "hostedUrl"),
    };
    doc.insert(source_key.to_owned(), Value::String(source_url.clone()));
    doc.insert(hosted_key.to_owned(), Value::String(hosted_url));
}

pub(crate) fn insert_extensions(doc: &mut JsonLdDocument, extensions: &[Extension]) {
    for extension in extensions {
        doc.insert(extension.name.clone(), extension.json.clone());
    }
}

/// Appends imported keys the document does not already have.
pub(crate) fn insert_extra<E: OriginalJson>(
    doc: &mut JsonLdDocument,
    entity: &E,
    opts: &RenderOptions,
) {
    if !opts.include_extra {
        return;
    }
    if let Some(extra) = entity.get_filtered_json() {
        for (key, value) in extra {
            if !doc.contains_key(&key) {
                doc.insert(key, value);
            }
        }
    }
}
