use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    models::{generate_entity_id, OriginalJson, Provenance},
    store::{EntityKind, Record},
};

/// Postal address of an issuer.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub street: Option<String>,
    pub streetnumber: Option<String>,
    pub zip: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// An organization that defines badge classes and issues assertions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Issuer {
    pub entity_id: String,
    /// Deprecated lookup key, preserved for existing records
    pub slug: Option<String>,
    pub name: String,
    /// Stored blob path of the issuer image
    pub image: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub email: Option<String>,
    pub category: String,
    #[serde(default)]
    pub address: Address,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub verified: bool,
    #[serde(flatten)]
    pub provenance: Provenance,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issuer {
    pub fn new(name: impl Into<String>, created_by: Option<String>) -> Self {
        let now = Utc::now();
        Issuer {
            entity_id: generate_entity_id(),
            slug: None,
            name: name.into(),
            image: None,
            description: None,
            url: None,
            email: None,
            category: "n/a".to_owned(),
            address: Address::default(),
            lat: None,
            lon: None,
            verified: false,
            provenance: Provenance::default(),
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Record for Issuer {
    fn kind(&self) -> EntityKind {
        EntityKind::Issuer
    }

    fn id(&self) -> &str {
        &self.entity_id
    }
}

impl OriginalJson for Issuer {
    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn excluded_fields(&self) -> &'static [&'static str] {
        &[
            "@context",
            "id",
            "type",
            "name",
            "url",
            "description",
            "image",
            "email",
        ]
    }
}
