//! Cache invalidation.
//!
//! Readers cache rendered entities keyed by [`CacheKey`]. After every commit
//! the service tells the [`Invalidator`] what changed, and the invalidator
//! walks the fixed edges below, publishing each affected key once:
//!
//! ```text
//! Extension / Alignment / Tag / Evidence -> owning entity
//! IssuerStaff -> Issuer, staff user
//! BakedImage  -> (badgeinstance, obi_version)
//! BadgeInstance -> BadgeClass -> Issuer
//! BadgeInstance -> recipient user, (entity_id, revoked),
//!                  (recipient_identifier, badgeclass, revoked)
//! ```

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    models::{BadgeClass, BadgeInstance, BakedImage, Issuer, IssuerStaff},
    store::EntityKind,
};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Entity { kind: EntityKind, id: String },
    User(String),
    /// Lookup by a tuple of field values
    Secondary {
        kind: EntityKind,
        fields: Vec<(&'static str, String)>,
    },
}

impl CacheKey {
    pub fn entity(kind: EntityKind, id: &str) -> Self {
        CacheKey::Entity {
            kind,
            id: id.to_owned(),
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, key: &CacheKey) -> Result<()>;

    async fn publish_delete(&self, key: &CacheKey) -> Result<()>;
}

pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _key: &CacheKey) -> Result<()> {
        Ok(())
    }

    async fn publish_delete(&self, _key: &CacheKey) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Published {
    Updated(CacheKey),
    Deleted(CacheKey),
}

/// Keeps every published key, in order.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Published> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&self, event: Published) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire lock: {}", e))?
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, key: &CacheKey) -> Result<()> {
        self.push(Published::Updated(key.clone()))
    }

    async fn publish_delete(&self, key: &CacheKey) -> Result<()> {
        self.push(Published::Deleted(key.clone()))
    }
}

/// Owner of a changed sub-document.
#[derive(Clone, Copy, Debug)]
pub enum Parent<'a> {
    Issuer(&'a str),
    BadgeClass(&'a BadgeClass),
    BadgeInstance(&'a BadgeInstance),
}

/// Explicit publish graph over a [`Publisher`].
///
/// Publishing is best effort: the write it follows has already committed, so
/// failures are logged and swallowed.
#[derive(Clone)]
pub struct Invalidator {
    publisher: Arc<dyn Publisher>,
}

impl Invalidator {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Invalidator { publisher }
    }

    async fn update(&self, key: CacheKey) {
        log::trace!("publish {key:?}");
        if let Err(e) = self.publisher.publish(&key).await {
            log::warn!("failed to publish {key:?}: {e:#}");
        }
    }

    async fn delete(&self, key: CacheKey) {
        log::trace!("publish delete {key:?}");
        if let Err(e) = self.publisher.publish_delete(&key).await {
            log::warn!("failed to publish delete of {key:?}: {e:#}");
        }
    }

    pub async fn issuer(&self, issuer_id: &str) {
        self.update(CacheKey::entity(EntityKind::Issuer, issuer_id))
            .await;
    }

    pub async fn issuer_deleted(&self, issuer: &Issuer) {
        self.delete(CacheKey::entity(EntityKind::Issuer, &issuer.entity_id))
            .await;
    }

    pub async fn staff(&self, staff: &IssuerStaff) {
        self.update(CacheKey::entity(EntityKind::IssuerStaff, &staff.id))
            .await;
        self.update(CacheKey::User(staff.user_id.clone())).await;
        self.issuer(&staff.issuer_id).await;
    }

    pub async fn staff_deleted(&self, staff: &IssuerStaff) {
        self.delete(CacheKey::entity(EntityKind::IssuerStaff, &staff.id))
            .await;
        self.update(CacheKey::User(staff.user_id.clone())).await;
        self.issuer(&staff.issuer_id).await;
    }

    pub async fn badge_class(&self, badge_class: &BadgeClass) {
        self.update(CacheKey::entity(
            EntityKind::BadgeClass,
            &badge_class.entity_id,
        ))
        .await;
        self.issuer(&badge_class.issuer_id).await;
    }

    pub async fn badge_class_deleted(&self, badge_class: &BadgeClass) {
        self.delete(CacheKey::entity(
            EntityKind::BadgeClass,
            &badge_class.entity_id,
        ))
        .await;
        self.issuer(&badge_class.issuer_id).await;
    }

    fn instance_keys(instance: &BadgeInstance) -> Vec<CacheKey> {
        vec![
            CacheKey::entity(EntityKind::BadgeInstance, &instance.entity_id),
            CacheKey::Secondary {
                kind: EntityKind::BadgeInstance,
                fields: vec![
                    ("entity_id", instance.entity_id.clone()),
                    ("revoked", instance.revoked.to_string()),
                ],
            },
            CacheKey::Secondary {
                kind: EntityKind::BadgeInstance,
                fields: vec![
                    ("recipient_identifier", instance.recipient_identifier.clone()),
                    ("badgeclass", instance.badge_class_id.clone()),
                    ("revoked", instance.revoked.to_string()),
                ],
            },
        ]
    }

    async fn instance_parents(&self, instance: &BadgeInstance) {
        if let Some(user_id) = &instance.user_id {
            self.update(CacheKey::User(user_id.clone())).await;
        }
        self.update(CacheKey::entity(
            EntityKind::BadgeClass,
            &instance.badge_class_id,
        ))
        .await;
        self.issuer(&instance.issuer_id).await;
    }

    pub async fn badge_instance(&self, instance: &BadgeInstance) {
        for key in Self::instance_keys(instance) {
            self.update(key).await;
        }
        self.instance_parents(instance).await;
    }

    pub async fn badge_instance_deleted(&self, instance: &BadgeInstance) {
        for key in Self::instance_keys(instance) {
            self.delete(key).await;
        }
        self.instance_parents(instance).await;
    }

    pub async fn baked_image(&self, baked: &BakedImage) {
        self.update(CacheKey::Secondary {
            kind: EntityKind::BadgeInstanceBakedImage,
            fields: vec![
                ("badgeinstance", baked.badge_instance_id.clone()),
                ("obi_version", baked.obi_version.to_string()),
            ],
        })
        .await;
    }

    pub async fn baked_image_deleted(&self, baked: &BakedImage) {
        self.delete(CacheKey::Secondary {
            kind: EntityKind::BadgeInstanceBakedImage,
            fields: vec![
                ("badgeinstance", baked.badge_instance_id.clone()),
                ("obi_version", baked.obi_version.to_string()),
            ],
        })
        .await;
    }

    /// Sub-documents of one kind owned by `parent` were written or removed.
    pub async fn children(
        &self,
        kind: EntityKind,
        updated: &[String],
        deleted: &[String],
        parent: Parent<'_>,
    ) {
        for id in updated {
            self.update(CacheKey::entity(kind, id)).await;
        }
        for id in deleted {
            self.delete(CacheKey::entity(kind, id)).await;
        }
        self.parent(parent).await;
    }

    pub async fn parent(&self, parent: Parent<'_>) {
        match parent {
            Parent::Issuer(issuer_id) => self.issuer(issuer_id).await,
            Parent::BadgeClass(badge_class) => self.badge_class(badge_class).await,
            Parent::BadgeInstance(instance) => self.badge_instance(instance).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecipientType;

    fn recording() -> (Arc<RecordingPublisher>, Invalidator) {
        let publisher = Arc::new(RecordingPublisher::new());
        let invalidator = Invalidator::new(publisher.clone());
        (publisher, invalidator)
    }

    #[tokio::test]
    async fn instance_cascades_to_badge_class_and_issuer() {
        let (publisher, invalidator) = recording();
        let mut instance =
            BadgeInstance::new("bc-1", "issuer-1", "a@example.com", RecipientType::Email);
        instance.user_id = Some("user-1".to_owned());

        invalidator.badge_instance(&instance).await;

        let events = publisher.events();
        assert!(events.contains(&Published::Updated(CacheKey::entity(
            EntityKind::BadgeClass,
            "bc-1"
        ))));
        assert!(events.contains(&Published::Updated(CacheKey::entity(
            EntityKind::Issuer,
            "issuer-1"
        ))));
        assert!(events.contains(&Published::Updated(CacheKey::User("user-1".to_owned()))));
        assert!(events.contains(&Published::Updated(CacheKey::Secondary {
            kind: EntityKind::BadgeInstance,
            fields: vec![
                ("recipient_identifier", "a@example.com".to_owned()),
                ("badgeclass", "bc-1".to_owned()),
                ("revoked", "false".to_owned()),
            ],
        })));
    }

    #[tokio::test]
    async fn child_publishes_itself_then_parent() {
        let (publisher, invalidator) = recording();

        invalidator
            .children(
                EntityKind::IssuerExtension,
                &[],
                &["ext-1".to_owned()],
                Parent::Issuer("issuer-1"),
            )
            .await;

        assert_eq!(
            publisher.events(),
            vec![
                Published::Deleted(CacheKey::entity(EntityKind::IssuerExtension, "ext-1")),
                Published::Updated(CacheKey::entity(EntityKind::Issuer, "issuer-1")),
            ]
        );
    }

    struct FailingPublisher;

    #[async_trait]
    impl Publisher for FailingPublisher {
        async fn publish(&self, _key: &CacheKey) -> Result<()> {
            anyhow::bail!("cache down")
        }

        async fn publish_delete(&self, _key: &CacheKey) -> Result<()> {
            anyhow::bail!("cache down")
        }
    }

    #[tokio::test]
    async fn publish_failures_are_swallowed() {
        let invalidator = Invalidator::new(Arc::new(FailingPublisher));
        invalidator.issuer("issuer-1").await;
    }
}
