use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    models::{generate_entity_id, OriginalJson, Provenance},
    store::{EntityKind, Record},
};

/// Calendar unit of a badge class expiration policy.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExpiresDuration {
    Days,
    Weeks,
    Months,
    Years,
}

/// A badge definition owned by an issuer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BadgeClass {
    pub entity_id: String,
    pub slug: Option<String>,
    pub issuer_id: String,
    pub name: String,
    /// Stored blob path of the badge image every assertion is baked into
    pub image: Option<String>,
    pub description: Option<String>,
    pub criteria_url: Option<String>,
    pub criteria_text: Option<String>,
    pub expires_amount: Option<u32>,
    pub expires_duration: Option<ExpiresDuration>,
    #[serde(flatten)]
    pub provenance: Provenance,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BadgeClass {
    pub fn new(issuer_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        BadgeClass {
            entity_id: generate_entity_id(),
            slug: None,
            issuer_id: issuer_id.into(),
            name: name.into(),
            image: None,
            description: None,
            criteria_url: None,
            criteria_text: None,
            expires_amount: None,
            expires_duration: None,
            provenance: Provenance::default(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn description_nonnull(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Expiry of an assertion issued at `issued_on`, if the class has a complete expiration policy.
    ///
    /// Month and year arithmetic clamps to the end of shorter months.
    pub fn generate_expires_at(&self, issued_on: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let amount = self.expires_amount.filter(|a| *a > 0)?;
        let duration = self.expires_duration?;

        match duration {
            ExpiresDuration::Days => issued_on.checked_add_signed(Duration::days(amount.into())),
            ExpiresDuration::Weeks => issued_on.checked_add_signed(Duration::weeks(amount.into())),
            ExpiresDuration::Months => issued_on.checked_add_months(Months::new(amount)),
            ExpiresDuration::Years => {
                issued_on.checked_add_months(Months::new(amount.checked_mul(12)?))
            }
        }
    }
}

impl Record for BadgeClass {
    fn kind(&self) -> EntityKind {
        EntityKind::BadgeClass
    }

    fn id(&self) -> &str {
        &self.entity_id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.issuer_id)
    }
}

impl OriginalJson for BadgeClass {
    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn excluded_fields(&self) -> &'static [&'static str] {
        &[
            "@context",
            "id",
            "type",
            "name",
            "description",
            "image",
            "criteria",
            "issuer",
        ]
    }
}
