//! Persisted badge entities and their owned sub-documents.

pub mod badge_class;
pub mod badge_instance;
pub mod baked_image;
pub mod issuer;
pub mod original_json;
pub mod sub_documents;

pub use badge_class::{BadgeClass, ExpiresDuration};
pub use badge_instance::{Acceptance, BadgeInstance, RecipientType};
pub use baked_image::BakedImage;
pub use issuer::{Address, Issuer};
pub use original_json::{parse_original_datetime, OriginalJson, Provenance};
pub use sub_documents::{
    AlignmentItem, BadgeClassAlignment, BadgeClassTag, BadgeInstanceEvidence, EvidenceItem,
    Extension, ExtensionItem, ExtensionOwner, IssuerStaff, StaffMember, StaffRole,
};

use base64::engine::{general_purpose::URL_SAFE_NO_PAD as BASE64_URL_NO_PAD, Engine};

/// New opaque entity id: url-safe base64 of a random UUID, without padding.
pub fn generate_entity_id() -> String {
    BASE64_URL_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes())
}
