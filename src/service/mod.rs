//! Issuing operations.
//!
//! [`BadgeService`] ties the entity store, blob store, cache publisher,
//! mailer and recipient collaborators together. Every multi-record change is
//! written as one store transaction; caches are invalidated only after the
//! transaction commits.

pub mod assertion;
pub mod badge_class;
pub mod baking;
pub mod issuer;
pub mod rebake_job;

pub use assertion::{IssueRequest, RevocationOutcome};
pub use baking::ImageRef;
pub use rebake_job::{spawn_rebake_worker, RebakeJob, RebakeProgress, RebakeQueue};

use std::sync::Arc;

use crate::{
    blob_store::BlobStore,
    config::Settings,
    error::Result,
    mail::Mailer,
    models::{
        BadgeClass, BadgeClassAlignment, BadgeClassTag, BadgeInstance, BadgeInstanceEvidence,
        BakedImage, Extension, ExtensionItem, ExtensionOwner, Issuer, IssuerStaff,
    },
    publish::{Invalidator, Parent, Publisher},
    recipient::{RecipientBlacklist, RecipientDirectory},
    reconcile::{reconcile, ReconcilePlan},
    render::{AssertionView, BadgeClassView, IssuerView, Urls},
    store::{
        load_by_id_or_slug, load_children, EntityKind, EntityStore, Record, Transaction, Versioned,
    },
};

/// The external systems the service is built on.
pub struct Collaborators {
    pub store: Arc<dyn EntityStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub publisher: Arc<dyn Publisher>,
    pub mailer: Arc<dyn Mailer>,
    pub blacklist: Arc<dyn RecipientBlacklist>,
    pub directory: Arc<dyn RecipientDirectory>,
}

#[cfg(feature = "blob-memory")]
impl Collaborators {
    /// Non-persistent collaborators: in-memory storage, no cache, mail to the log.
    pub fn in_memory(settings: &Settings) -> Self {
        use crate::{
            blob_store::{media_url, InMemoryStore},
            mail::LogMailer,
            publish::NoopPublisher,
            recipient::{InMemoryBlacklist, InMemoryDirectory},
            store::InMemoryEntityStore,
        };

        let base_url = media_url(settings.origin(), &settings.media_url, "");
        Collaborators {
            store: Arc::new(InMemoryEntityStore::new()),
            blobs: Arc::new(InMemoryStore::new(base_url)),
            publisher: Arc::new(NoopPublisher),
            mailer: Arc::new(LogMailer),
            blacklist: Arc::new(InMemoryBlacklist::new()),
            directory: Arc::new(InMemoryDirectory::new()),
        }
    }
}

pub struct BadgeService {
    settings: Settings,
    urls: Urls,
    store: Arc<dyn EntityStore>,
    blobs: Arc<dyn BlobStore>,
    invalidator: Invalidator,
    mailer: Arc<dyn Mailer>,
    blacklist: Arc<dyn RecipientBlacklist>,
    directory: Arc<dyn RecipientDirectory>,
}

impl BadgeService {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Result<Self> {
        settings.validate()?;

        Ok(BadgeService {
            urls: Urls::new(&settings),
            settings,
            store: collaborators.store,
            blobs: collaborators.blobs,
            invalidator: Invalidator::new(collaborators.publisher),
            mailer: collaborators.mailer,
            blacklist: collaborators.blacklist,
            directory: collaborators.directory,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn urls(&self) -> &Urls {
        &self.urls
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Removes a blob no record points at any more. Failures are logged and
    /// leave the file orphaned.
    pub(crate) async fn discard_blob(&self, path: &str) {
        if let Err(e) = self.blobs.delete(path).await {
            log::warn!("failed to delete blob {path}: {e:#}");
        }
    }

    async fn extensions(&self, owner: ExtensionOwner, parent_id: &str) -> Result<Vec<Extension>> {
        Ok(load_children::<Extension>(self.store(), owner.kind(), parent_id)
            .await?
            .into_iter()
            .map(|e| e.record)
            .collect())
    }

    pub(crate) async fn issuer_graph(&self, id_or_slug: &str) -> Result<IssuerGraph> {
        let issuer: Versioned<Issuer> =
            load_by_id_or_slug(self.store(), EntityKind::Issuer, id_or_slug).await?;
        let extensions = self
            .extensions(ExtensionOwner::Issuer, &issuer.entity_id)
            .await?;
        Ok(IssuerGraph { issuer, extensions })
    }

    pub(crate) async fn badge_class_graph(&self, id_or_slug: &str) -> Result<BadgeClassGraph> {
        let badge_class: Versioned<BadgeClass> =
            load_by_id_or_slug(self.store(), EntityKind::BadgeClass, id_or_slug).await?;
        let id = badge_class.entity_id.clone();

        Ok(BadgeClassGraph {
            issuer: self.issuer_graph(&badge_class.issuer_id).await?,
            alignments: records(
                load_children(self.store(), EntityKind::BadgeClassAlignment, &id).await?,
            ),
            tags: records(load_children(self.store(), EntityKind::BadgeClassTag, &id).await?),
            extensions: self.extensions(ExtensionOwner::BadgeClass, &id).await?,
            badge_class,
        })
    }

    pub(crate) async fn assertion_graph(&self, id_or_slug: &str) -> Result<AssertionGraph> {
        let instance: Versioned<BadgeInstance> =
            load_by_id_or_slug(self.store(), EntityKind::BadgeInstance, id_or_slug).await?;
        let id = instance.entity_id.clone();

        Ok(AssertionGraph {
            badge_class: self.badge_class_graph(&instance.badge_class_id).await?,
            evidence: records(
                load_children(self.store(), EntityKind::BadgeInstanceEvidence, &id).await?,
            ),
            extensions: self.extensions(ExtensionOwner::BadgeInstance, &id).await?,
            instance,
        })
    }

    /// Writes a reconcile plan for the children of one parent, together with
    /// the checks already staged in `tx`, in a single transaction that also
    /// requires the parent to still exist.
    pub(crate) async fn commit_plan<D, R>(
        &self,
        mut tx: Transaction,
        parent: (EntityKind, &str),
        plan: ReconcilePlan<D, Versioned<R>>,
        create: impl Fn(D) -> R,
        change: impl Fn(D, &mut R),
    ) -> Result<Applied<R>>
    where
        R: Record,
    {
        tx.assert_exists(parent.0, parent.1);

        let mut written = Vec::new();
        for item in plan.to_add {
            let record = create(item);
            tx.insert(&record)?;
            written.push(record);
        }
        for (item, mut record) in plan.to_update {
            change(item, &mut record.record);
            tx.update(&record)?;
            written.push(record.record);
        }
        let mut removed = Vec::new();
        for record in plan.to_remove {
            tx.remove(&record);
            removed.push(record.record);
        }

        if !written.is_empty() || !removed.is_empty() {
            self.store.commit(tx).await?;
        }
        Ok(Applied { written, removed })
    }

    /// Replaces the extensions of an issuer, badge class or assertion.
    pub async fn set_extensions(
        &self,
        owner: ExtensionOwner,
        parent_id: &str,
        desired: Vec<ExtensionItem>,
    ) -> Result<Vec<Extension>> {
        // resolves slugs and fails for unknown parents
        let parent = match owner {
            ExtensionOwner::Issuer => ParentRecord::Issuer(
                load_by_id_or_slug(self.store(), EntityKind::Issuer, parent_id).await?,
            ),
            ExtensionOwner::BadgeClass => ParentRecord::BadgeClass(
                load_by_id_or_slug(self.store(), EntityKind::BadgeClass, parent_id).await?,
            ),
            ExtensionOwner::BadgeInstance => ParentRecord::BadgeInstance(
                load_by_id_or_slug(self.store(), EntityKind::BadgeInstance, parent_id).await?,
            ),
        };
        let parent_id = parent.id().to_owned();

        let existing = load_children::<Extension>(self.store(), owner.kind(), &parent_id).await?;
        let plan = reconcile(desired, existing, |item, ext| item.json != ext.json);
        let applied = self
            .commit_plan(
                Transaction::new(),
                (owner.parent_kind(), &parent_id),
                plan,
                |item| Extension::new(owner, &parent_id, item),
                |item, ext| ext.json = item.json,
            )
            .await?;

        if !applied.is_empty() {
            log::debug!(
                "extensions of {} {parent_id}: {} written, {} removed",
                owner.parent_kind(),
                applied.written.len(),
                applied.removed.len()
            );
            self.invalidator
                .children(
                    owner.kind(),
                    &applied.written_ids(),
                    &applied.removed_ids(),
                    parent.as_parent(),
                )
                .await;
        }

        self.extensions(owner, &parent_id).await
    }
}

/// Records and blobs to delete together, collected across entity kinds.
#[derive(Default)]
pub(crate) struct Removal {
    tx: Transaction,
    blobs: Vec<String>,
    issuers: Vec<Issuer>,
    staff: Vec<IssuerStaff>,
    badge_classes: Vec<BadgeClass>,
    instances: Vec<BadgeInstance>,
    baked: Vec<BakedImage>,
}

impl BadgeService {
    /// Stages every child of `kind` owned by `parent_id` for removal.
    async fn stage_children<T: Record>(
        &self,
        removal: &mut Removal,
        kind: EntityKind,
        parent_id: &str,
    ) -> Result<Vec<T>> {
        let children = load_children::<T>(self.store(), kind, parent_id).await?;
        for child in &children {
            removal.tx.remove(child);
        }
        removal.tx.assert_no_children(kind, parent_id);
        Ok(records(children))
    }

    pub(crate) async fn stage_issuer_removal(
        &self,
        removal: &mut Removal,
        issuer: &Versioned<Issuer>,
    ) -> Result<()> {
        let id = &issuer.entity_id;
        removal.tx.remove(issuer);
        removal.blobs.extend(issuer.image.clone());

        let staff = self
            .stage_children::<IssuerStaff>(removal, EntityKind::IssuerStaff, id)
            .await?;
        removal.staff.extend(staff);
        self.stage_children::<Extension>(removal, EntityKind::IssuerExtension, id)
            .await?;

        for badge_class in
            load_children::<BadgeClass>(self.store(), EntityKind::BadgeClass, id).await?
        {
            self.stage_badge_class_removal(removal, &badge_class)
                .await?;
        }
        removal.tx.assert_no_children(EntityKind::BadgeClass, id);

        removal.issuers.push(issuer.record.clone());
        Ok(())
    }

    pub(crate) async fn stage_badge_class_removal(
        &self,
        removal: &mut Removal,
        badge_class: &Versioned<BadgeClass>,
    ) -> Result<()> {
        let id = &badge_class.entity_id;
        removal.tx.remove(badge_class);
        removal.blobs.extend(badge_class.image.clone());

        self.stage_children::<BadgeClassAlignment>(removal, EntityKind::BadgeClassAlignment, id)
            .await?;
        self.stage_children::<BadgeClassTag>(removal, EntityKind::BadgeClassTag, id)
            .await?;
        self.stage_children::<Extension>(removal, EntityKind::BadgeClassExtension, id)
            .await?;

        for instance in
            load_children::<BadgeInstance>(self.store(), EntityKind::BadgeInstance, id).await?
        {
            self.stage_assertion_removal(removal, &instance).await?;
        }
        removal.tx.assert_no_children(EntityKind::BadgeInstance, id);

        removal.badge_classes.push(badge_class.record.clone());
        Ok(())
    }

    pub(crate) async fn stage_assertion_removal(
        &self,
        removal: &mut Removal,
        instance: &Versioned<BadgeInstance>,
    ) -> Result<()> {
        let id = &instance.entity_id;
        removal.tx.remove(instance);
        removal.blobs.extend(instance.image.clone());

        self.stage_children::<BadgeInstanceEvidence>(
            removal,
            EntityKind::BadgeInstanceEvidence,
            id,
        )
        .await?;
        self.stage_children::<Extension>(removal, EntityKind::BadgeInstanceExtension, id)
            .await?;
        let baked = self
            .stage_children::<BakedImage>(removal, EntityKind::BadgeInstanceBakedImage, id)
            .await?;
        removal.blobs.extend(baked.iter().map(|b| b.image.clone()));
        removal.baked.extend(baked);

        removal.instances.push(instance.record.clone());
        Ok(())
    }

    /// Commits a staged removal, then deletes its blobs and publishes the deletions.
    pub(crate) async fn commit_removal(&self, removal: Removal) -> Result<()> {
        self.store.commit(removal.tx).await?;

        for path in &removal.blobs {
            self.discard_blob(path).await;
        }
        for baked in &removal.baked {
            self.invalidator.baked_image_deleted(baked).await;
        }
        for instance in &removal.instances {
            self.invalidator.badge_instance_deleted(instance).await;
        }
        for staff in &removal.staff {
            self.invalidator.staff_deleted(staff).await;
        }
        for badge_class in &removal.badge_classes {
            self.invalidator.badge_class_deleted(badge_class).await;
        }
        for issuer in &removal.issuers {
            self.invalidator.issuer_deleted(issuer).await;
        }
        Ok(())
    }
}

fn records<T>(versioned: Vec<Versioned<T>>) -> Vec<T> {
    versioned.into_iter().map(|v| v.record).collect()
}

/// Children written and removed by [`BadgeService::commit_plan`].
pub(crate) struct Applied<R> {
    pub written: Vec<R>,
    pub removed: Vec<R>,
}

impl<R: Record> Applied<R> {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }

    pub fn written_ids(&self) -> Vec<String> {
        self.written.iter().map(|r| r.id().to_owned()).collect()
    }

    pub fn removed_ids(&self) -> Vec<String> {
        self.removed.iter().map(|r| r.id().to_owned()).collect()
    }
}

enum ParentRecord {
    Issuer(Versioned<Issuer>),
    BadgeClass(Versioned<BadgeClass>),
    BadgeInstance(Versioned<BadgeInstance>),
}

impl ParentRecord {
    fn id(&self) -> &str {
        match self {
            ParentRecord::Issuer(issuer) => &issuer.entity_id,
            ParentRecord::BadgeClass(badge_class) => &badge_class.entity_id,
            ParentRecord::BadgeInstance(instance) => &instance.entity_id,
        }
    }

    fn as_parent(&self) -> Parent<'_> {
        match self {
            ParentRecord::Issuer(issuer) => Parent::Issuer(&issuer.entity_id),
            ParentRecord::BadgeClass(badge_class) => Parent::BadgeClass(badge_class),
            ParentRecord::BadgeInstance(instance) => Parent::BadgeInstance(instance),
        }
    }
}

/// An issuer loaded with its extensions.
pub struct IssuerGraph {
    pub issuer: Versioned<Issuer>,
    pub extensions: Vec<Extension>,
}

impl IssuerGraph {
    pub fn view(&self) -> IssuerView<'_> {
        IssuerView {
            issuer: &self.issuer,
            extensions: &self.extensions,
        }
    }
}

/// A badge class loaded with its issuer and children.
pub struct BadgeClassGraph {
    pub badge_class: Versioned<BadgeClass>,
    pub issuer: IssuerGraph,
    pub alignments: Vec<BadgeClassAlignment>,
    pub tags: Vec<BadgeClassTag>,
    pub extensions: Vec<Extension>,
}

impl BadgeClassGraph {
    pub fn view(&self) -> BadgeClassView<'_> {
        BadgeClassView {
            badge_class: &self.badge_class,
            issuer: self.issuer.view(),
            alignments: &self.alignments,
            tags: &self.tags,
            extensions: &self.extensions,
        }
    }
}

/// An assertion loaded with its badge class, issuer and children.
pub struct AssertionGraph {
    pub instance: Versioned<BadgeInstance>,
    pub badge_class: BadgeClassGraph,
    pub evidence: Vec<BadgeInstanceEvidence>,
    pub extensions: Vec<Extension>,
}

impl AssertionGraph {
    pub fn view(&self) -> AssertionView<'_> {
        AssertionView {
            instance: &self.instance,
            badge_class: self.badge_class.view(),
            evidence: &self.evidence,
            extensions: &self.extensions,
        }
    }
}
