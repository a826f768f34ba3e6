use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};

use crate::{
    error::{BadgeError, Result},
    mail::{notify_earner, EarnerNotice},
    models::{
        BadgeInstance, BadgeInstanceEvidence, BakedImage, EvidenceItem, Extension, ExtensionItem,
        ExtensionOwner, Provenance, RecipientType,
    },
    obi_version::{self, UNVERSIONED_BAKED_VERSION},
    publish::Parent,
    recipient::{generate_salt, is_pending, RecipientIdentity},
    reconcile::reconcile,
    render::{render_assertion, AssertionView, JsonLdDocument, RenderOptions},
    service::{
        baking::{bake_options, primary_image_path},
        BadgeService, Removal,
    },
    store::{load_by_id_or_slug, load_children, EntityKind, Transaction, Versioned},
};

/// Assertions issued concurrently by [`BadgeService::issue_batch`].
const ISSUE_CONCURRENCY: usize = 8;

/// What to award, and to whom.
#[derive(Clone, Debug, Default)]
pub struct IssueRequest {
    pub recipient_identifier: String,
    pub recipient_type: RecipientType,
    /// Render the recipient identity as a salted hash
    pub hashed: bool,
    /// Defaults to now
    pub issued_on: Option<DateTime<Utc>>,
    /// Defaults to the expiry configured on the badge class
    pub expires_at: Option<DateTime<Utc>>,
    pub narrative: Option<String>,
    pub evidence: Vec<EvidenceItem>,
    pub extensions: Vec<ExtensionItem>,
    pub created_by: Option<String>,
    /// Mail the recipient about the new assertion
    pub notify: bool,
    pub provenance: Provenance,
}

impl IssueRequest {
    pub fn new(recipient_identifier: impl Into<String>, recipient_type: RecipientType) -> Self {
        IssueRequest {
            recipient_identifier: recipient_identifier.into(),
            recipient_type,
            hashed: true,
            ..Default::default()
        }
    }
}

/// Result of revoking one assertion of a batch.
#[derive(Debug)]
pub struct RevocationOutcome {
    pub entity_id: String,
    pub result: Result<()>,
}

impl BadgeService {
    /// Awards a badge class to a recipient and bakes the assertion into a
    /// copy of the badge class image.
    pub async fn issue(
        &self,
        badge_class_id: &str,
        request: IssueRequest,
    ) -> Result<Versioned<BadgeInstance>> {
        let identifier = request.recipient_identifier.trim();
        if identifier.is_empty() {
            return Err(BadgeError::Validation(
                "recipient_identifier is required".to_owned(),
            ));
        }
        if self
            .blacklist
            .is_blacklisted(request.recipient_type, identifier)
            .await?
        {
            return Err(BadgeError::RecipientBlacklisted);
        }

        let graph = self.badge_class_graph(badge_class_id).await?;
        let badge_class = &graph.badge_class;

        let mut instance = BadgeInstance::new(
            &badge_class.entity_id,
            &badge_class.issuer_id,
            identifier,
            request.recipient_type,
        );
        instance.hashed = request.hashed;
        if request.hashed {
            instance.salt = Some(generate_salt());
        }
        if let Some(issued_on) = request.issued_on {
            instance.issued_on = issued_on;
        }
        instance.expires_at = request
            .expires_at
            .or_else(|| badge_class.generate_expires_at(instance.issued_on));
        instance.narrative = request.narrative;
        instance.created_by = request.created_by;
        instance.provenance = request.provenance;

        let identity = self
            .directory
            .lookup(request.recipient_type, identifier)
            .await?;
        instance.user_id = identity
            .as_ref()
            .filter(|identity| identity.verified)
            .map(|identity| identity.user_id.clone());

        let id = instance.entity_id.clone();
        let evidence: Vec<BadgeInstanceEvidence> =
            reconcile(request.evidence, Vec::<BadgeInstanceEvidence>::new(), |_, _| false)
                .to_add
                .into_iter()
                .map(|item| BadgeInstanceEvidence::new(&id, item))
                .collect();
        let extensions: Vec<Extension> =
            reconcile(request.extensions, Vec::<Extension>::new(), |_, _| false)
                .to_add
                .into_iter()
                .map(|item| Extension::new(ExtensionOwner::BadgeInstance, &id, item))
                .collect();

        let view = AssertionView {
            instance: &instance,
            badge_class: graph.view(),
            evidence: &evidence,
            extensions: &extensions,
        };
        let input = self
            .bake_input(&view, &bake_options(UNVERSIONED_BAKED_VERSION))
            .await?;
        let (bytes, extension) = input.bake()?;
        let path = self
            .blobs
            .save(&primary_image_path(&id, extension), bytes)
            .await?;
        instance.image = Some(path.clone());
        instance.image_fingerprint = Some(input.fingerprint);

        let mut tx = Transaction::new();
        tx.assert_exists(EntityKind::BadgeClass, &badge_class.entity_id);
        tx.insert(&instance)?;
        for item in &evidence {
            tx.insert(item)?;
        }
        for extension in &extensions {
            tx.insert(extension)?;
        }
        if let Err(e) = self.store.commit(tx).await {
            self.discard_blob(&path).await;
            return Err(e);
        }

        log::info!(
            "issued badge class {} as assertion {id}",
            badge_class.entity_id
        );
        self.invalidator.badge_instance(&instance).await;

        if request.notify {
            notify_earner(
                self.mailer.as_ref(),
                self.blacklist.as_ref(),
                &self.settings,
                EarnerNotice {
                    instance: &instance,
                    badge_class,
                    issuer: &graph.issuer.issuer,
                    account_holder: instance.user_id.is_some(),
                    renotify: false,
                },
            )
            .await;
        }

        self.get_assertion(&id).await
    }

    /// Issues several assertions of one badge class. Results are in request order.
    pub async fn issue_batch(
        &self,
        badge_class_id: &str,
        requests: Vec<IssueRequest>,
    ) -> Vec<Result<Versioned<BadgeInstance>>> {
        stream::iter(requests)
            .map(|request| self.issue(badge_class_id, request))
            .buffered(ISSUE_CONCURRENCY)
            .collect()
            .await
    }

    /// Loads an assertion by entity id or legacy slug.
    pub async fn get_assertion(&self, id_or_slug: &str) -> Result<Versioned<BadgeInstance>> {
        load_by_id_or_slug(self.store(), EntityKind::BadgeInstance, id_or_slug).await
    }

    pub async fn set_evidence(
        &self,
        assertion_id: &str,
        desired: Vec<EvidenceItem>,
    ) -> Result<Vec<BadgeInstanceEvidence>> {
        let instance = self.get_assertion(assertion_id).await?;
        let id = instance.entity_id.as_str();

        let existing = load_children::<BadgeInstanceEvidence>(
            self.store(),
            EntityKind::BadgeInstanceEvidence,
            id,
        )
        .await?;
        let plan = reconcile(desired, existing, |_, _| false);
        let applied = self
            .commit_plan(
                Transaction::new(),
                (EntityKind::BadgeInstance, id),
                plan,
                |item| BadgeInstanceEvidence::new(id, item),
                |_, _| {},
            )
            .await?;

        if !applied.is_empty() {
            self.invalidator
                .children(
                    EntityKind::BadgeInstanceEvidence,
                    &applied.written_ids(),
                    &applied.removed_ids(),
                    Parent::BadgeInstance(&instance),
                )
                .await;
        }

        Ok(load_children(self.store(), EntityKind::BadgeInstanceEvidence, id)
            .await?
            .into_iter()
            .map(|e: Versioned<BadgeInstanceEvidence>| e.record)
            .collect())
    }

    /// Revokes an assertion, deleting its primary image and every cached
    /// baked image.
    pub async fn revoke(
        &self,
        id_or_slug: &str,
        reason: &str,
    ) -> Result<Versioned<BadgeInstance>> {
        let mut instance = self.get_assertion(id_or_slug).await?;
        instance.revoke(reason)?;

        let mut stale = Vec::new();
        stale.extend(instance.image.take());
        instance.image_fingerprint = None;

        let baked: Vec<Versioned<BakedImage>> = load_children(
            self.store(),
            EntityKind::BadgeInstanceBakedImage,
            &instance.entity_id,
        )
        .await?;

        let mut tx = Transaction::new();
        tx.update(&instance)?;
        for image in &baked {
            tx.remove(image);
            stale.push(image.image.clone());
        }
        self.store.commit(tx).await?;

        for path in &stale {
            self.discard_blob(path).await;
        }

        log::info!("revoked assertion {}", instance.entity_id);
        for image in &baked {
            self.invalidator.baked_image_deleted(image).await;
        }
        self.invalidator.badge_instance(&instance).await;

        self.get_assertion(&instance.entity_id).await
    }

    /// Revokes each `(assertion id, reason)` pair independently.
    pub async fn revoke_batch(&self, revocations: Vec<(String, String)>) -> Vec<RevocationOutcome> {
        let mut outcomes = Vec::with_capacity(revocations.len());
        for (entity_id, reason) in revocations {
            let result = self.revoke(&entity_id, &reason).await.map(|_| ());
            if let Err(e) = &result {
                log::debug!("revocation of {entity_id} failed: {e}");
            }
            outcomes.push(RevocationOutcome { entity_id, result });
        }
        outcomes
    }

    pub async fn accept(&self, id_or_slug: &str) -> Result<Versioned<BadgeInstance>> {
        let mut instance = self.get_assertion(id_or_slug).await?;
        instance.accept()?;
        self.save_acceptance(instance).await
    }

    pub async fn reject(&self, id_or_slug: &str) -> Result<Versioned<BadgeInstance>> {
        let mut instance = self.get_assertion(id_or_slug).await?;
        instance.reject()?;
        self.save_acceptance(instance).await
    }

    async fn save_acceptance(
        &self,
        instance: Versioned<BadgeInstance>,
    ) -> Result<Versioned<BadgeInstance>> {
        let mut tx = Transaction::new();
        tx.update(&instance)?;
        self.store.commit(tx).await?;

        log::debug!(
            "assertion {} is now {}",
            instance.entity_id,
            instance.acceptance
        );
        self.invalidator.badge_instance(&instance).await;

        self.get_assertion(&instance.entity_id).await
    }

    /// Deletes an assertion together with its evidence, extensions and images.
    pub async fn delete_assertion(&self, id_or_slug: &str) -> Result<()> {
        let instance = self.get_assertion(id_or_slug).await?;

        let mut removal = Removal::default();
        self.stage_assertion_removal(&mut removal, &instance)
            .await?;
        self.commit_removal(removal).await?;

        log::info!("deleted assertion {}", instance.entity_id);
        Ok(())
    }

    async fn recipient_identity(
        &self,
        instance: &BadgeInstance,
    ) -> Result<Option<RecipientIdentity>> {
        Ok(self
            .directory
            .lookup(instance.recipient_type, &instance.recipient_identifier)
            .await?)
    }

    /// Whether an imported assertion waits for its recipient to verify their account.
    pub async fn is_pending(&self, id_or_slug: &str) -> Result<bool> {
        let instance = self.get_assertion(id_or_slug).await?;
        let identity = self.recipient_identity(&instance).await?;
        Ok(is_pending(&instance, identity.as_ref()))
    }

    /// The verified account the assertion was awarded to, if any.
    pub async fn recipient_user(&self, id_or_slug: &str) -> Result<Option<String>> {
        let instance = self.get_assertion(id_or_slug).await?;
        if instance.user_id.is_some() {
            return Ok(instance.user_id.clone());
        }
        Ok(self
            .recipient_identity(&instance)
            .await?
            .filter(|identity| identity.verified)
            .map(|identity| identity.user_id))
    }

    /// Public page of an assertion, optionally naming the recipient identity.
    pub async fn share_url(&self, id_or_slug: &str, include_identity: bool) -> Result<String> {
        let instance = self.get_assertion(id_or_slug).await?;
        let recipient_type = instance.recipient_type.to_string();
        let identity = include_identity
            .then_some((recipient_type.as_str(), instance.recipient_identifier.as_str()));
        Ok(self.urls.share(&instance.entity_id, identity))
    }

    pub async fn render_assertion(
        &self,
        id_or_slug: &str,
        opts: &RenderOptions,
    ) -> Result<JsonLdDocument> {
        let graph = self.assertion_graph(id_or_slug).await?;
        Ok(render_assertion(&graph.view(), opts, &self.urls))
    }

    /// The assertion with its badge class and issuer embedded, for `version`
    /// (`1_1`, `2_0` or `current`).
    pub async fn extended_json(&self, id_or_slug: &str, version: &str) -> Result<JsonLdDocument> {
        let (version, _) = obi_version::resolve(version)?;
        self.render_assertion(id_or_slug, &RenderOptions::new(version).expanded())
            .await
    }
}
