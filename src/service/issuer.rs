use chrono::Utc;
use serde_json::Value;

use crate::{
    error::{BadgeError, Result},
    image_pipeline::{ImagePipeline, UploadedImage},
    mail::notify_admins,
    models::{BadgeInstance, Issuer, IssuerStaff, StaffMember, StaffRole},
    reconcile::reconcile_staff,
    render::{render_issuer, JsonLdDocument, RenderOptions},
    service::{BadgeService, Removal},
    store::{find_records, load_by_id_or_slug, load_children, EntityKind, Transaction, Versioned},
};

fn validate(issuer: &Issuer) -> Result<()> {
    if issuer.name.trim().is_empty() {
        return Err(BadgeError::Validation("issuer name is required".to_owned()));
    }
    Ok(())
}

impl BadgeService {
    /// Stores a new issuer, making `created_by` its owner.
    pub async fn create_issuer(
        &self,
        mut issuer: Issuer,
        image: Option<UploadedImage>,
    ) -> Result<Versioned<Issuer>> {
        validate(&issuer)?;

        if let Some(image) = image {
            let image = ImagePipeline::for_issuer().run(image)?;
            let path = self
                .blobs
                .save(&format!("uploads/issuers/{}", image.filename), image.bytes)
                .await?;
            issuer.image = Some(path);
        }

        let owner = issuer.created_by.as_ref().map(|user_id| {
            IssuerStaff::new(
                &issuer.entity_id,
                &StaffMember::new(user_id.clone(), StaffRole::Owner),
            )
        });

        let mut tx = Transaction::new();
        tx.insert(&issuer)?;
        if let Some(owner) = &owner {
            tx.insert(owner)?;
        }
        if let Err(e) = self.store.commit(tx).await {
            if let Some(path) = &issuer.image {
                self.discard_blob(path).await;
            }
            return Err(e);
        }

        log::info!("created issuer {} '{}'", issuer.entity_id, issuer.name);

        match &owner {
            Some(owner) => self.invalidator.staff(owner).await,
            None => self.invalidator.issuer(&issuer.entity_id).await,
        }
        notify_admins(self.mailer.as_ref(), &self.settings, &issuer).await;

        self.get_issuer(&issuer.entity_id).await
    }

    /// Loads an issuer by entity id or legacy slug.
    pub async fn get_issuer(&self, id_or_slug: &str) -> Result<Versioned<Issuer>> {
        load_by_id_or_slug(self.store(), EntityKind::Issuer, id_or_slug).await
    }

    /// Saves changes to an issuer loaded earlier; fails with a conflict if it
    /// changed in between. An issuer left without owners gets `created_by`
    /// back as owner.
    pub async fn update_issuer(&self, mut issuer: Versioned<Issuer>) -> Result<Versioned<Issuer>> {
        validate(&issuer)?;
        issuer.updated_at = Utc::now();

        let mut tx = Transaction::new();
        tx.update(&issuer)?;

        let ownerless = self.issuer_owners(&issuer.entity_id).await?.is_empty();
        let owner = issuer
            .created_by
            .as_ref()
            .filter(|_| ownerless)
            .map(|user_id| {
                IssuerStaff::new(
                    &issuer.entity_id,
                    &StaffMember::new(user_id.clone(), StaffRole::Owner),
                )
            });
        if let Some(owner) = &owner {
            tx.insert(owner)?;
        }
        self.store.commit(tx).await?;

        log::debug!("updated issuer {}", issuer.entity_id);
        match &owner {
            Some(owner) => self.invalidator.staff(owner).await,
            None => self.invalidator.issuer(&issuer.entity_id).await,
        }

        self.get_issuer(&issuer.entity_id).await
    }

    /// Deletes an issuer with its staff, extensions and badge classes.
    ///
    /// Refused while any assertion of the issuer is not revoked.
    pub async fn delete_issuer(&self, id_or_slug: &str) -> Result<()> {
        let issuer = self.get_issuer(id_or_slug).await?;

        let instances: Vec<Versioned<BadgeInstance>> = find_records(
            self.store(),
            EntityKind::BadgeInstance,
            "issuer_id",
            &Value::String(issuer.entity_id.clone()),
        )
        .await?;
        if instances.iter().any(|instance| !instance.revoked) {
            return Err(BadgeError::HasDependents {
                kind: EntityKind::Issuer,
                dependents: EntityKind::BadgeInstance,
            });
        }

        let mut removal = Removal::default();
        self.stage_issuer_removal(&mut removal, &issuer).await?;
        self.commit_removal(removal).await?;

        log::info!("deleted issuer {}", issuer.entity_id);
        Ok(())
    }

    pub async fn issuer_staff(&self, issuer_id: &str) -> Result<Vec<Versioned<IssuerStaff>>> {
        load_children(self.store(), EntityKind::IssuerStaff, issuer_id).await
    }

    /// Replaces the staff of an issuer. The last owner is never removed or
    /// demoted; such changes are skipped.
    pub async fn set_issuer_staff(
        &self,
        issuer_id: &str,
        desired: Vec<StaffMember>,
    ) -> Result<Vec<IssuerStaff>> {
        let issuer = self.get_issuer(issuer_id).await?;
        let issuer_id = issuer.entity_id.as_str();
        let existing = self.issuer_staff(issuer_id).await?;

        let plan = reconcile_staff(desired, existing.clone());

        // owners the plan keeps must still be owners when it commits
        let mut tx = Transaction::new();
        for staff in existing.iter().filter(|s| s.role == StaffRole::Owner) {
            let touched = plan.to_remove.iter().any(|r| r.id == staff.id)
                || plan.to_update.iter().any(|(_, u)| u.id == staff.id);
            if !touched {
                tx.assert_unchanged(staff);
            }
        }

        let applied = self
            .commit_plan(
                tx,
                (EntityKind::Issuer, issuer_id),
                plan,
                |member| IssuerStaff::new(issuer_id, &member),
                |member, staff| staff.role = member.role,
            )
            .await?;

        for staff in &applied.written {
            self.invalidator.staff(staff).await;
        }
        for staff in &applied.removed {
            self.invalidator.staff_deleted(staff).await;
        }

        Ok(self
            .issuer_staff(issuer_id)
            .await?
            .into_iter()
            .map(|s| s.record)
            .collect())
    }

    /// User ids of the issuer's owners.
    pub async fn issuer_owners(&self, issuer_id: &str) -> Result<Vec<String>> {
        Ok(self
            .issuer_staff(issuer_id)
            .await?
            .into_iter()
            .filter(|s| s.role == StaffRole::Owner)
            .map(|s| s.record.user_id)
            .collect())
    }

    /// User ids of staff allowed to edit: owners and editors.
    pub async fn issuer_editors(&self, issuer_id: &str) -> Result<Vec<String>> {
        Ok(self
            .issuer_staff(issuer_id)
            .await?
            .into_iter()
            .filter(|s| s.role.can_edit())
            .map(|s| s.record.user_id)
            .collect())
    }

    pub async fn render_issuer(
        &self,
        id_or_slug: &str,
        opts: &RenderOptions,
    ) -> Result<JsonLdDocument> {
        let graph = self.issuer_graph(id_or_slug).await?;
        Ok(render_issuer(&graph.view(), opts, &self.urls))
    }
}
