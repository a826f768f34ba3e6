use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{BadgeError, Result},
    models::{generate_entity_id, parse_original_datetime, OriginalJson, Provenance},
    recipient::hash_recipient,
    store::{EntityKind, Record},
};

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum RecipientType {
    #[default]
    #[serde(rename = "email")]
    #[strum(serialize = "email")]
    Email,
    #[serde(rename = "openBadgeId")]
    #[strum(serialize = "openBadgeId")]
    OpenBadgeId,
    #[serde(rename = "telephone")]
    #[strum(serialize = "telephone")]
    Telephone,
    #[serde(rename = "url")]
    #[strum(serialize = "url")]
    Url,
}

/// Whether the recipient has accepted the assertion into their backpack.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Acceptance {
    #[default]
    Unaccepted,
    Accepted,
    Rejected,
}

/// An issued badge (Open Badges Assertion).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BadgeInstance {
    pub entity_id: String,
    pub slug: Option<String>,
    pub badge_class_id: String,
    /// Denormalized owner of the badge class
    pub issuer_id: String,
    /// Account the recipient identifier was verified for at issue time
    pub user_id: Option<String>,
    pub recipient_identifier: String,
    pub recipient_type: RecipientType,
    pub hashed: bool,
    /// Fixed at creation; the identity hash depends on it
    pub salt: Option<String>,
    /// Stored blob path of the image baked at issuance
    pub image: Option<String>,
    /// Digest of the inputs `image` was baked from
    pub image_fingerprint: Option<String>,
    pub issued_on: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revocation_reason: Option<String>,
    pub acceptance: Acceptance,
    pub narrative: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BadgeInstance {
    pub fn new(
        badge_class_id: impl Into<String>,
        issuer_id: impl Into<String>,
        recipient_identifier: impl Into<String>,
        recipient_type: RecipientType,
    ) -> Self {
        let now = Utc::now();
        BadgeInstance {
            entity_id: generate_entity_id(),
            slug: None,
            badge_class_id: badge_class_id.into(),
            issuer_id: issuer_id.into(),
            user_id: None,
            recipient_identifier: recipient_identifier.into(),
            recipient_type,
            hashed: true,
            salt: None,
            image: None,
            image_fingerprint: None,
            issued_on: now,
            expires_at: None,
            revoked: false,
            revocation_reason: None,
            acceptance: Acceptance::Unaccepted,
            narrative: None,
            provenance: Provenance::default(),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rendered `recipient.identity`: the salted hash when hashed, else the plain identifier.
    pub fn identity(&self) -> String {
        if self.hashed {
            hash_recipient(&self.recipient_identifier, self.salt.as_deref())
        } else {
            self.recipient_identifier.clone()
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Marks the assertion revoked. Image cleanup is the caller's concern.
    pub fn revoke(&mut self, reason: &str) -> Result<()> {
        if self.revoked {
            return Err(BadgeError::AlreadyRevoked);
        }
        if reason.trim().is_empty() {
            return Err(BadgeError::MissingReason);
        }

        self.revoked = true;
        self.revocation_reason = Some(reason.to_owned());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn accept(&mut self) -> Result<()> {
        self.transition(Acceptance::Accepted)
    }

    pub fn reject(&mut self) -> Result<()> {
        self.transition(Acceptance::Rejected)
    }

    fn transition(&mut self, to: Acceptance) -> Result<()> {
        if self.acceptance != Acceptance::Unaccepted {
            return Err(BadgeError::InvalidTransition {
                from: self.acceptance.to_string(),
                to: to.to_string(),
            });
        }
        self.acceptance = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Clears a stale revocation reason on a non-revoked assertion.
    pub fn normalize_revocation(&mut self) {
        if !self.revoked {
            self.revocation_reason = None;
        }
    }
}

impl Record for BadgeInstance {
    fn kind(&self) -> EntityKind {
        EntityKind::BadgeInstance
    }

    fn id(&self) -> &str {
        &self.entity_id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.badge_class_id)
    }
}

impl OriginalJson for BadgeInstance {
    fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    fn excluded_fields(&self) -> &'static [&'static str] {
        &[
            "@context",
            "id",
            "type",
            "uid",
            "recipient",
            "badge",
            "issuedOn",
            "image",
            "evidence",
            "narrative",
            "revoked",
            "revocationReason",
            "verify",
            "verification",
        ]
    }

    /// Passthrough fields, with an imported `expires` normalized to UTC.
    fn get_filtered_json(&self) -> Option<Map<String, Value>> {
        let mut filtered: Map<String, Value> = match self.get_original_json()? {
            Value::Object(original) => original
                .into_iter()
                .filter(|(k, _)| !self.excluded_fields().contains(&k.as_str()))
                .collect(),
            _ => return None,
        };

        if let Some(Value::String(expires)) = filtered.get("expires") {
            if !expires.ends_with('Z') {
                if let Some(normalized) = parse_original_datetime(expires) {
                    filtered.insert("expires".to_owned(), Value::String(normalized));
                }
            }
        }
        Some(filtered)
    }
}
