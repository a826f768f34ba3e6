//! Baked assertion images.
//!
//! The primary image of an assertion is baked with the current-version JSON
//! when it is issued. Images for other versions are baked on first request
//! and cached as [`BakedImage`] records. A rebake writes the new blob first,
//! swaps the record pointer with a version check, and only then deletes the
//! old blob.

use openbadges_bakery::{BakeError, ImageFormat};

use crate::{
    cid::{blake3::blake3_cid_of_parts, multicodec},
    error::{BadgeError, Result},
    models::{BadgeClass, BadgeInstance, BakedImage},
    obi_version::{ObiVersion, UNVERSIONED_BAKED_VERSION},
    render::{render_assertion, AssertionView, RenderOptions},
    service::BadgeService,
    store::{load, EntityKind, Transaction, Versioned},
};

/// A stored image and its public URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub path: String,
    pub url: String,
}

/// Everything a baked image is derived from.
pub(crate) struct BakeInput {
    image: Vec<u8>,
    json: String,
    verify_url: String,
    pub fingerprint: String,
}

impl BakeInput {
    /// The baked image bytes and the file extension matching their format.
    pub fn bake(&self) -> Result<(Vec<u8>, &'static str)> {
        let extension = ImageFormat::detect(&self.image)
            .ok_or(BakeError::UnsupportedFormat)?
            .extension();
        let bytes = openbadges_bakery::bake(&self.image, &self.json, Some(&self.verify_url))?;
        Ok((bytes, extension))
    }
}

pub(crate) fn primary_image_path(instance_id: &str, extension: &str) -> String {
    format!("uploads/badges/assertion-{instance_id}{extension}")
}

fn baked_image_path(instance_id: &str, version: ObiVersion, extension: &str) -> String {
    format!("baked/{version}/assertion-{instance_id}-{version}{extension}")
}

/// Render options of the JSON baked into the image for `version`.
pub(crate) fn bake_options(version: ObiVersion) -> RenderOptions {
    if version == UNVERSIONED_BAKED_VERSION {
        RenderOptions::new(version)
    } else {
        RenderOptions::new(version).expanded()
    }
}

impl BadgeService {
    fn image_ref(&self, path: String) -> ImageRef {
        ImageRef {
            url: self.blobs.url(&path),
            path,
        }
    }

    async fn badge_class_image(&self, badge_class: &BadgeClass) -> Result<Vec<u8>> {
        let missing = || BadgeError::MissingImage(format!("badge class {}", badge_class.entity_id));

        let path = badge_class.image.as_deref().ok_or_else(missing)?;
        self.blobs.read(path).await?.ok_or_else(missing)
    }

    pub(crate) async fn bake_input(
        &self,
        view: &AssertionView<'_>,
        opts: &RenderOptions,
    ) -> Result<BakeInput> {
        let image = self.badge_class_image(view.badge_class.badge_class).await?;
        let json = serde_json::to_string_pretty(&render_assertion(view, opts, &self.urls))?;
        let fingerprint = blake3_cid_of_parts(multicodec::JSON, &[&image, json.as_bytes()])?;

        Ok(BakeInput {
            image,
            json,
            verify_url: view.jsonld_id(&self.urls),
            fingerprint,
        })
    }

    /// Image of an assertion baked for `version`, baking it on first request.
    ///
    /// The current version is served from the primary image fixed at
    /// issuance. Revoked assertions have no image.
    pub async fn baked_image(&self, id_or_slug: &str, version: ObiVersion) -> Result<ImageRef> {
        let graph = self.assertion_graph(id_or_slug).await?;
        let instance = &graph.instance;
        if instance.revoked {
            return Err(BadgeError::MissingImage(format!(
                "revoked assertion {}",
                instance.entity_id
            )));
        }

        if version == UNVERSIONED_BAKED_VERSION {
            return self.primary_image(instance);
        }

        let record_id = BakedImage::record_id(&instance.entity_id, version);
        if let Some(baked) = load::<BakedImage>(
            self.store(),
            EntityKind::BadgeInstanceBakedImage,
            &record_id,
        )
        .await?
        {
            return Ok(self.image_ref(baked.record.image));
        }

        let input = self
            .bake_input(&graph.view(), &bake_options(version))
            .await?;
        let (bytes, extension) = input.bake()?;
        let path = self
            .blobs
            .save(
                &baked_image_path(&instance.entity_id, version, extension),
                bytes,
            )
            .await?;
        let baked = BakedImage::new(&instance.entity_id, version, path, input.fingerprint);

        let mut tx = Transaction::new();
        tx.assert_unchanged(instance);
        tx.insert(&baked)?;
        match self.store.commit(tx).await {
            Ok(()) => {
                log::debug!(
                    "baked {version} image of assertion {} at {}",
                    instance.entity_id,
                    baked.image
                );
                self.invalidator.baked_image(&baked).await;
                Ok(self.image_ref(baked.image))
            }
            Err(BadgeError::Conflict { .. }) => {
                // baked concurrently; keep the winner's image
                self.discard_blob(&baked.image).await;
                let winner = load::<BakedImage>(
                    self.store(),
                    EntityKind::BadgeInstanceBakedImage,
                    &record_id,
                )
                .await?
                .ok_or_else(|| BadgeError::Conflict {
                    kind: EntityKind::BadgeInstance,
                    id: instance.entity_id.clone(),
                })?;
                Ok(self.image_ref(winner.record.image))
            }
            Err(e) => {
                self.discard_blob(&baked.image).await;
                Err(e)
            }
        }
    }

    fn primary_image(&self, instance: &BadgeInstance) -> Result<ImageRef> {
        let path = instance.image.clone().ok_or_else(|| {
            BadgeError::MissingImage(format!("assertion {}", instance.entity_id))
        })?;
        Ok(self.image_ref(path))
    }

    /// Bakes the image of an assertion for `version` again from the current
    /// badge class image and assertion JSON.
    ///
    /// Nothing is written when the stored image was baked from the same input.
    pub async fn rebake(&self, id_or_slug: &str, version: ObiVersion) -> Result<ImageRef> {
        if version == UNVERSIONED_BAKED_VERSION {
            return self.rebake_primary(id_or_slug).await;
        }

        let graph = self.assertion_graph(id_or_slug).await?;
        let instance = &graph.instance;
        if instance.revoked {
            return Err(BadgeError::MissingImage(format!(
                "revoked assertion {}",
                instance.entity_id
            )));
        }

        let input = self
            .bake_input(&graph.view(), &bake_options(version))
            .await?;

        let record_id = BakedImage::record_id(&instance.entity_id, version);
        let existing = load::<BakedImage>(
            self.store(),
            EntityKind::BadgeInstanceBakedImage,
            &record_id,
        )
        .await?;
        if let Some(existing) = &existing {
            if existing.fingerprint == input.fingerprint {
                return Ok(self.image_ref(existing.image.clone()));
            }
        }

        let (bytes, extension) = input.bake()?;
        let path = self
            .blobs
            .save(
                &baked_image_path(&instance.entity_id, version, extension),
                bytes,
            )
            .await?;

        let mut tx = Transaction::new();
        tx.assert_unchanged(instance);
        let old_image = match existing {
            Some(mut existing) => {
                let old_image = std::mem::replace(&mut existing.image, path.clone());
                existing.fingerprint = input.fingerprint.clone();
                tx.update(&existing)?;
                Some(old_image)
            }
            None => {
                tx.insert(&BakedImage::new(
                    &instance.entity_id,
                    version,
                    path.clone(),
                    input.fingerprint.clone(),
                ))?;
                None
            }
        };
        if let Err(e) = self.store.commit(tx).await {
            self.discard_blob(&path).await;
            return Err(e);
        }
        if let Some(old_image) = old_image {
            self.discard_blob(&old_image).await;
        }

        log::debug!("rebaked {version} image of assertion {}", instance.entity_id);
        self.invalidator
            .baked_image(&BakedImage::new(
                &instance.entity_id,
                version,
                path.clone(),
                input.fingerprint,
            ))
            .await;

        Ok(self.image_ref(path))
    }

    /// Bakes the primary image of an assertion again, replacing the one made
    /// at issuance.
    pub async fn rebake_primary(&self, id_or_slug: &str) -> Result<ImageRef> {
        let graph = self.assertion_graph(id_or_slug).await?;
        let instance = &graph.instance;
        if instance.revoked {
            return Err(BadgeError::MissingImage(format!(
                "revoked assertion {}",
                instance.entity_id
            )));
        }

        let input = self
            .bake_input(&graph.view(), &bake_options(UNVERSIONED_BAKED_VERSION))
            .await?;
        if let (Some(image), Some(fingerprint)) = (&instance.image, &instance.image_fingerprint) {
            if *fingerprint == input.fingerprint {
                return Ok(self.image_ref(image.clone()));
            }
        }

        let (bytes, extension) = input.bake()?;
        let path = self
            .blobs
            .save(&primary_image_path(&instance.entity_id, extension), bytes)
            .await?;

        let mut updated: Versioned<BadgeInstance> = graph.instance.clone();
        let old_image = updated.image.replace(path.clone());
        updated.image_fingerprint = Some(input.fingerprint);

        let mut tx = Transaction::new();
        tx.update(&updated)?;
        if let Err(e) = self.store.commit(tx).await {
            self.discard_blob(&path).await;
            return Err(e);
        }
        if let Some(old_image) = old_image {
            self.discard_blob(&old_image).await;
        }

        log::debug!("rebaked primary image of assertion {}", updated.entity_id);
        self.invalidator.badge_instance(&updated).await;

        Ok(self.image_ref(path))
    }
}
