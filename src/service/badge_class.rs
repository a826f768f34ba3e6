use chrono::Utc;

use crate::{
    error::{BadgeError, Result},
    image_pipeline::{ImagePipeline, UploadedImage},
    models::{AlignmentItem, BadgeClass, BadgeClassAlignment, BadgeClassTag, BadgeInstance},
    publish::Parent,
    reconcile::reconcile,
    render::{render_badge_class, JsonLdDocument, RenderOptions},
    service::{rebake_job::RebakeJob, BadgeService, Removal},
    store::{load_by_id_or_slug, load_children, EntityKind, Transaction, Versioned},
};

impl BadgeService {
    async fn save_badge_class_image(&self, image: UploadedImage) -> Result<String> {
        let image = ImagePipeline::for_badge_class().run(image)?;
        Ok(self
            .blobs
            .save(&format!("uploads/badges/{}", image.filename), image.bytes)
            .await?)
    }

    /// Stores a new badge class under an existing issuer.
    pub async fn create_badge_class(
        &self,
        mut badge_class: BadgeClass,
        image: UploadedImage,
    ) -> Result<Versioned<BadgeClass>> {
        if badge_class.name.trim().is_empty() {
            return Err(BadgeError::Validation(
                "badge class name is required".to_owned(),
            ));
        }
        let issuer = self.get_issuer(&badge_class.issuer_id).await?;
        badge_class.issuer_id = issuer.entity_id.clone();

        let path = self.save_badge_class_image(image).await?;
        badge_class.image = Some(path.clone());

        let mut tx = Transaction::new();
        tx.assert_exists(EntityKind::Issuer, &issuer.entity_id);
        tx.insert(&badge_class)?;
        if let Err(e) = self.store.commit(tx).await {
            self.discard_blob(&path).await;
            return Err(e);
        }

        log::info!(
            "created badge class {} '{}' for issuer {}",
            badge_class.entity_id,
            badge_class.name,
            issuer.entity_id
        );
        self.invalidator.badge_class(&badge_class).await;

        self.get_badge_class(&badge_class.entity_id).await
    }

    /// Loads a badge class by entity id or legacy slug.
    pub async fn get_badge_class(&self, id_or_slug: &str) -> Result<Versioned<BadgeClass>> {
        load_by_id_or_slug(self.store(), EntityKind::BadgeClass, id_or_slug).await
    }

    async fn badge_class_instances(
        &self,
        badge_class_id: &str,
    ) -> Result<Vec<Versioned<BadgeInstance>>> {
        load_children(self.store(), EntityKind::BadgeInstance, badge_class_id).await
    }

    /// Deletes a badge class with its children and its revoked or expired
    /// assertions.
    ///
    /// Refused while any assertion is neither revoked nor expired.
    pub async fn delete_badge_class(&self, id_or_slug: &str) -> Result<()> {
        let badge_class = self.get_badge_class(id_or_slug).await?;

        let now = Utc::now();
        let instances = self.badge_class_instances(&badge_class.entity_id).await?;
        if instances
            .iter()
            .any(|instance| !instance.revoked && !instance.is_expired(now))
        {
            return Err(BadgeError::HasDependents {
                kind: EntityKind::BadgeClass,
                dependents: EntityKind::BadgeInstance,
            });
        }

        let mut removal = Removal::default();
        self.stage_badge_class_removal(&mut removal, &badge_class)
            .await?;
        self.commit_removal(removal).await?;

        log::info!("deleted badge class {}", badge_class.entity_id);
        Ok(())
    }

    pub async fn set_alignments(
        &self,
        badge_class_id: &str,
        desired: Vec<AlignmentItem>,
    ) -> Result<Vec<BadgeClassAlignment>> {
        let badge_class = self.get_badge_class(badge_class_id).await?;
        let id = badge_class.entity_id.as_str();

        let existing =
            load_children::<BadgeClassAlignment>(self.store(), EntityKind::BadgeClassAlignment, id)
                .await?;
        let plan = reconcile(desired, existing, |_, _| false);
        let applied = self
            .commit_plan(
                Transaction::new(),
                (EntityKind::BadgeClass, id),
                plan,
                |item| BadgeClassAlignment::new(id, item),
                |_, _| {},
            )
            .await?;

        if !applied.is_empty() {
            self.invalidator
                .children(
                    EntityKind::BadgeClassAlignment,
                    &applied.written_ids(),
                    &applied.removed_ids(),
                    Parent::BadgeClass(&badge_class),
                )
                .await;
        }

        Ok(load_children(self.store(), EntityKind::BadgeClassAlignment, id)
            .await?
            .into_iter()
            .map(|a: Versioned<BadgeClassAlignment>| a.record)
            .collect())
    }

    /// Replaces the tags of a badge class. Blank tags are ignored.
    pub async fn set_tags(
        &self,
        badge_class_id: &str,
        desired: Vec<String>,
    ) -> Result<Vec<BadgeClassTag>> {
        let badge_class = self.get_badge_class(badge_class_id).await?;
        let id = badge_class.entity_id.as_str();

        let desired: Vec<String> = desired
            .into_iter()
            .map(|tag| tag.trim().to_owned())
            .filter(|tag| !tag.is_empty())
            .collect();

        let existing =
            load_children::<BadgeClassTag>(self.store(), EntityKind::BadgeClassTag, id).await?;
        let plan = reconcile(desired, existing, |_, _| false);
        let applied = self
            .commit_plan(
                Transaction::new(),
                (EntityKind::BadgeClass, id),
                plan,
                |name| BadgeClassTag::new(id, name),
                |_, _| {},
            )
            .await?;

        if !applied.is_empty() {
            self.invalidator
                .children(
                    EntityKind::BadgeClassTag,
                    &applied.written_ids(),
                    &applied.removed_ids(),
                    Parent::BadgeClass(&badge_class),
                )
                .await;
        }

        Ok(load_children(self.store(), EntityKind::BadgeClassTag, id)
            .await?
            .into_iter()
            .map(|t: Versioned<BadgeClassTag>| t.record)
            .collect())
    }

    /// Replaces the badge class image and returns the job that rebakes its
    /// assertions, for the caller to run or enqueue.
    pub async fn update_badge_class_image(
        &self,
        badge_class_id: &str,
        image: UploadedImage,
    ) -> Result<RebakeJob> {
        let mut badge_class = self.get_badge_class(badge_class_id).await?;
        let old_image = badge_class.image.clone();

        let path = self.save_badge_class_image(image).await?;
        badge_class.image = Some(path.clone());
        badge_class.updated_at = Utc::now();

        let mut tx = Transaction::new();
        tx.update(&badge_class)?;
        if let Err(e) = self.store.commit(tx).await {
            self.discard_blob(&path).await;
            return Err(e);
        }
        if let Some(old_image) = old_image.filter(|old| *old != path) {
            self.discard_blob(&old_image).await;
        }

        log::info!(
            "replaced image of badge class {}, scheduling rebake",
            badge_class.entity_id
        );
        self.invalidator.badge_class(&badge_class).await;

        Ok(RebakeJob::new(
            &badge_class.entity_id,
            self.settings.rebake_batch_size,
        ))
    }

    /// Number of non-revoked assertions of a badge class.
    pub async fn recipient_count(&self, badge_class_id: &str) -> Result<usize> {
        let badge_class = self.get_badge_class(badge_class_id).await?;
        Ok(self
            .badge_class_instances(&badge_class.entity_id)
            .await?
            .iter()
            .filter(|instance| !instance.revoked)
            .count())
    }

    pub async fn render_badge_class(
        &self,
        id_or_slug: &str,
        opts: &RenderOptions,
    ) -> Result<JsonLdDocument> {
        let graph = self.badge_class_graph(id_or_slug).await?;
        Ok(render_badge_class(&graph.view(), opts, &self.urls))
    }
}
