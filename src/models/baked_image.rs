use serde::{Deserialize, Serialize};

use crate::{
    obi_version::ObiVersion,
    store::{EntityKind, Record},
};

/// Cached image of an assertion baked for one Open Badges version.
///
/// Never mutated in place: a rebake writes a new blob and replaces the record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BakedImage {
    pub id: String,
    pub badge_instance_id: String,
    pub obi_version: ObiVersion,
    /// Stored blob path
    pub image: String,
    /// Digest of the badge class image and rendered JSON the blob was baked from
    pub fingerprint: String,
}

impl BakedImage {
    pub fn record_id(badge_instance_id: &str, version: ObiVersion) -> String {
        format!("{badge_instance_id}:{version}")
    }

    pub fn new(
        badge_instance_id: &str,
        version: ObiVersion,
        image: String,
        fingerprint: String,
    ) -> Self {
        BakedImage {
            id: Self::record_id(badge_instance_id, version),
            badge_instance_id: badge_instance_id.to_owned(),
            obi_version: version,
            image,
            fingerprint,
        }
    }
}

impl Record for BakedImage {
    fn kind(&self) -> EntityKind {
        EntityKind::BadgeInstanceBakedImage
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.badge_instance_id)
    }
}
