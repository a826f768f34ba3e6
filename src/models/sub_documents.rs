//! Child records exclusively owned by an issuer, badge class or assertion.
//!
//! Each type has a semantic identity key (see [`Keyed`]) used to reconcile a
//! desired list against what is stored; the record id plays no part in it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    models::generate_entity_id,
    reconcile::Keyed,
    store::{EntityKind, Record, Versioned},
};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StaffRole {
    Owner,
    Editor,
    Staff,
}

impl StaffRole {
    /// Owners and editors may create and change badge classes.
    pub fn can_edit(&self) -> bool {
        matches!(self, StaffRole::Owner | StaffRole::Editor)
    }
}

/// Desired staff membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub user_id: String,
    pub role: StaffRole,
}

impl StaffMember {
    pub fn new(user_id: impl Into<String>, role: StaffRole) -> Self {
        StaffMember {
            user_id: user_id.into(),
            role,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerStaff {
    pub id: String,
    pub issuer_id: String,
    pub user_id: String,
    pub role: StaffRole,
}

impl IssuerStaff {
    pub fn new(issuer_id: &str, member: &StaffMember) -> Self {
        IssuerStaff {
            id: format!("{issuer_id}:{}", member.user_id),
            issuer_id: issuer_id.to_owned(),
            user_id: member.user_id.clone(),
            role: member.role,
        }
    }
}

/// Which kind of entity an [`Extension`] hangs off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum ExtensionOwner {
    Issuer,
    BadgeClass,
    BadgeInstance,
}

impl ExtensionOwner {
    pub fn kind(&self) -> EntityKind {
        match self {
            ExtensionOwner::Issuer => EntityKind::IssuerExtension,
            ExtensionOwner::BadgeClass => EntityKind::BadgeClassExtension,
            ExtensionOwner::BadgeInstance => EntityKind::BadgeInstanceExtension,
        }
    }

    pub fn parent_kind(&self) -> EntityKind {
        match self {
            ExtensionOwner::Issuer => EntityKind::Issuer,
            ExtensionOwner::BadgeClass => EntityKind::BadgeClass,
            ExtensionOwner::BadgeInstance => EntityKind::BadgeInstance,
        }
    }
}

/// Desired extension: rendered as a top-level `name` key holding `json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtensionItem {
    pub name: String,
    pub json: Value,
}

impl ExtensionItem {
    pub fn new(name: impl Into<String>, json: Value) -> Self {
        ExtensionItem {
            name: name.into(),
            json,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub id: String,
    pub owner: ExtensionOwner,
    pub parent_id: String,
    pub name: String,
    pub json: Value,
}

impl Extension {
    pub fn new(owner: ExtensionOwner, parent_id: &str, item: ExtensionItem) -> Self {
        Extension {
            id: generate_entity_id(),
            owner,
            parent_id: parent_id.to_owned(),
            name: item.name,
            json: item.json,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub evidence_url: Option<String>,
    pub narrative: Option<String>,
}

impl EvidenceItem {
    pub fn url(url: impl Into<String>) -> Self {
        EvidenceItem {
            evidence_url: Some(url.into()),
            narrative: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BadgeInstanceEvidence {
    pub id: String,
    pub badge_instance_id: String,
    #[serde(flatten)]
    pub item: EvidenceItem,
    pub original_json: Option<String>,
}

impl BadgeInstanceEvidence {
    pub fn new(badge_instance_id: &str, item: EvidenceItem) -> Self {
        BadgeInstanceEvidence {
            id: generate_entity_id(),
            badge_instance_id: badge_instance_id.to_owned(),
            item,
            original_json: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlignmentItem {
    pub target_name: String,
    pub target_url: String,
    pub target_description: Option<String>,
    pub target_framework: Option<String>,
    pub target_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BadgeClassAlignment {
    pub id: String,
    pub badge_class_id: String,
    #[serde(flatten)]
    pub item: AlignmentItem,
}

impl BadgeClassAlignment {
    pub fn new(badge_class_id: &str, item: AlignmentItem) -> Self {
        BadgeClassAlignment {
            id: generate_entity_id(),
            badge_class_id: badge_class_id.to_owned(),
            item,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeClassTag {
    pub id: String,
    pub badge_class_id: String,
    pub name: String,
}

impl BadgeClassTag {
    pub fn new(badge_class_id: &str, name: String) -> Self {
        BadgeClassTag {
            id: generate_entity_id(),
            badge_class_id: badge_class_id.to_owned(),
            name,
        }
    }
}

impl Record for IssuerStaff {
    fn kind(&self) -> EntityKind {
        EntityKind::IssuerStaff
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.issuer_id)
    }
}

impl Record for Extension {
    fn kind(&self) -> EntityKind {
        self.owner.kind()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.parent_id)
    }
}

impl Record for BadgeInstanceEvidence {
    fn kind(&self) -> EntityKind {
        EntityKind::BadgeInstanceEvidence
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.badge_instance_id)
    }
}

impl Record for BadgeClassAlignment {
    fn kind(&self) -> EntityKind {
        EntityKind::BadgeClassAlignment
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.badge_class_id)
    }
}

impl Record for BadgeClassTag {
    fn kind(&self) -> EntityKind {
        EntityKind::BadgeClassTag
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.badge_class_id)
    }
}

impl Keyed for StaffMember {
    type Key = String;

    fn key(&self) -> String {
        self.user_id.clone()
    }
}

impl Keyed for IssuerStaff {
    type Key = String;

    fn key(&self) -> String {
        self.user_id.clone()
    }
}

impl Keyed for ExtensionItem {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

impl Keyed for Extension {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

impl Keyed for EvidenceItem {
    type Key = EvidenceItem;

    fn key(&self) -> EvidenceItem {
        self.clone()
    }
}

impl Keyed for BadgeInstanceEvidence {
    type Key = EvidenceItem;

    fn key(&self) -> EvidenceItem {
        self.item.clone()
    }
}

impl Keyed for AlignmentItem {
    type Key = AlignmentItem;

    fn key(&self) -> AlignmentItem {
        self.clone()
    }
}

impl Keyed for BadgeClassAlignment {
    type Key = AlignmentItem;

    fn key(&self) -> AlignmentItem {
        self.item.clone()
    }
}

impl Keyed for String {
    type Key = String;

    fn key(&self) -> String {
        self.clone()
    }
}

impl Keyed for BadgeClassTag {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

impl<T: Keyed> Keyed for Versioned<T> {
    type Key = T::Key;

    fn key(&self) -> T::Key {
        self.record.key()
    }
}
