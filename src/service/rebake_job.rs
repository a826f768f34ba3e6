//! Bounded, resumable rebaking of every assertion of a badge class.
//!
//! A [`RebakeJob`] covers the assertions stored after `after_seq`, at most
//! `batch_size` of them; running it yields the job for the rest. Rebaking is
//! skipped for images already baked from the current inputs, so a job can be
//! replayed from any point.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::anyhow;
use futures::{stream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::Result,
    models::{BadgeInstance, BakedImage},
    service::BadgeService,
    store::{load_children, load_children_after, EntityKind, Versioned},
};

/// Assertions rebaked concurrently within one batch.
const REBAKE_CONCURRENCY: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebakeJob {
    pub badge_class_id: String,
    pub batch_size: usize,
    /// Store sequence of the last assertion already covered
    pub after_seq: u64,
}

impl RebakeJob {
    pub fn new(badge_class_id: &str, batch_size: usize) -> Self {
        RebakeJob {
            badge_class_id: badge_class_id.to_owned(),
            batch_size: batch_size.max(1),
            after_seq: 0,
        }
    }

    /// Rebakes the next batch of non-revoked assertions.
    ///
    /// Only the batch itself is loaded, plus one record to tell whether
    /// anything follows it.
    pub async fn run_batch(&self, service: &BadgeService) -> Result<RebakeProgress> {
        let mut batch: Vec<Versioned<BadgeInstance>> = load_children_after(
            service.store(),
            EntityKind::BadgeInstance,
            &self.badge_class_id,
            self.after_seq,
            self.batch_size.saturating_add(1),
        )
        .await?;
        let has_more = batch.len() > self.batch_size;
        batch.truncate(self.batch_size);

        let next = match batch.last() {
            Some(last) if has_more => Some(RebakeJob {
                after_seq: last.seq,
                ..self.clone()
            }),
            _ => None,
        };

        let ids: Vec<String> = batch
            .iter()
            .filter(|instance| !instance.revoked)
            .map(|instance| instance.entity_id.clone())
            .collect();
        let results: Vec<Result<()>> = stream::iter(ids)
            .map(|id| async move { rebake_assertion(service, &id).await })
            .buffer_unordered(REBAKE_CONCURRENCY)
            .collect()
            .await;
        let failed = results.iter().filter(|result| result.is_err()).count();

        log::info!(
            "rebaked {} assertions of badge class {} ({failed} failed)",
            batch.len(),
            self.badge_class_id
        );

        Ok(RebakeProgress {
            processed: batch.len(),
            failed,
            next,
        })
    }
}

async fn rebake_assertion(service: &BadgeService, instance_id: &str) -> Result<()> {
    let result: Result<()> = async {
        service.rebake_primary(instance_id).await?;

        let baked: Vec<Versioned<BakedImage>> = load_children(
            service.store(),
            EntityKind::BadgeInstanceBakedImage,
            instance_id,
        )
        .await?;
        for image in baked {
            service.rebake(instance_id, image.obi_version).await?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = &result {
        log::warn!("failed to rebake assertion {instance_id}: {e}");
    }
    result
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebakeProgress {
    /// Assertions covered by the batch, revoked ones included
    pub processed: usize,
    pub failed: usize,
    /// The job for the assertions after this batch
    pub next: Option<RebakeJob>,
}

/// Handle for feeding jobs to a worker started with [`spawn_rebake_worker`].
///
/// The worker stops once every handle is dropped.
#[derive(Clone)]
pub struct RebakeQueue {
    sender: mpsc::UnboundedSender<RebakeJob>,
    cancelled: Arc<AtomicBool>,
}

impl RebakeQueue {
    pub fn enqueue(&self, job: RebakeJob) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|e| {
                anyhow!(
                    "rebake worker stopped, dropped job for {}",
                    e.0.badge_class_id
                )
            })?;
        Ok(())
    }

    /// Makes the worker drop its current and queued jobs between batches.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Starts a tokio task that runs queued jobs one batch at a time, following
/// each job's continuation until it is done or cancelled.
pub fn spawn_rebake_worker(service: Arc<BadgeService>) -> (RebakeQueue, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel::<RebakeJob>();
    let cancelled = Arc::new(AtomicBool::new(false));
    let queue = RebakeQueue {
        sender,
        cancelled: cancelled.clone(),
    };

    let handle = tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let mut pending = Some(job);
            while let Some(job) = pending.take() {
                if cancelled.load(Ordering::SeqCst) {
                    log::info!(
                        "rebake of badge class {} cancelled after seq {}",
                        job.badge_class_id,
                        job.after_seq
                    );
                    break;
                }
                match job.run_batch(&service).await {
                    Ok(progress) => pending = progress.next,
                    Err(e) => log::error!(
                        "rebake batch of badge class {} failed: {e}",
                        job.badge_class_id
                    ),
                }
            }
        }
        log::debug!("rebake worker stopped");
    });

    (queue, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image_pipeline::UploadedImage,
        models::RecipientType,
        obi_version::ObiVersion,
        service::{testing, IssueRequest},
    };

    async fn issue_many(service: &BadgeService, badge_class_id: &str, count: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..count {
            let request =
                IssueRequest::new(format!("earner{i}@example.com"), RecipientType::Email);
            ids.push(
                service
                    .issue(badge_class_id, request)
                    .await
                    .unwrap()
                    .entity_id
                    .clone(),
            );
        }
        ids
    }

    #[tokio::test]
    async fn batches_cover_every_assertion_once() {
        let service = testing::service();
        let (_, badge_class) = testing::issuer_and_badge_class(&service).await;
        let ids = issue_many(&service, &badge_class.entity_id, 5).await;
        service.revoke(&ids[1], "mistake").await.unwrap();

        let mut job = Some(RebakeJob::new(&badge_class.entity_id, 2));
        let mut batches = Vec::new();
        while let Some(current) = job.take() {
            let progress = current.run_batch(&service).await.unwrap();
            batches.push(progress.processed);
            assert_eq!(progress.failed, 0);
            job = progress.next;
        }

        assert_eq!(batches, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn new_badge_class_image_is_baked_into_assertions() {
        let service = testing::service();
        let (_, badge_class) = testing::issuer_and_badge_class(&service).await;
        let ids = issue_many(&service, &badge_class.entity_id, 2).await;
        service
            .baked_image(&ids[0], ObiVersion::V1_1)
            .await
            .unwrap();

        let before_primary = service.get_assertion(&ids[0]).await.unwrap();
        let before_baked = service
            .baked_image(&ids[0], ObiVersion::V1_1)
            .await
            .unwrap();

        let job = service
            .update_badge_class_image(
                &badge_class.entity_id,
                UploadedImage::new("new.svg", testing::badge_svg("gold")),
            )
            .await
            .unwrap();
        let progress = job.run_batch(&service).await.unwrap();
        assert_eq!(progress.processed, 2);
        assert!(progress.next.is_none());

        let after_primary = service.get_assertion(&ids[0]).await.unwrap();
        assert_ne!(after_primary.image, before_primary.image);
        assert_ne!(
            after_primary.image_fingerprint,
            before_primary.image_fingerprint
        );
        let after_baked = service
            .baked_image(&ids[0], ObiVersion::V1_1)
            .await
            .unwrap();
        assert_ne!(after_baked.path, before_baked.path);

        let bytes = service
            .blobs()
            .read(after_primary.image.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("gold"));
        assert!(!service
            .blobs()
            .exists(before_primary.image.as_deref().unwrap())
            .await
            .unwrap());

        // replay is a no-op
        let replay = RebakeJob::new(&badge_class.entity_id, 10)
            .run_batch(&service)
            .await
            .unwrap();
        assert_eq!(replay.failed, 0);
        let replayed = service.get_assertion(&ids[0]).await.unwrap();
        assert_eq!(replayed.image, after_primary.image);
        assert_eq!(replayed.version, after_primary.version);
    }

    #[tokio::test]
    async fn worker_follows_continuations() {
        let service = Arc::new(testing::service());
        let (_, badge_class) = testing::issuer_and_badge_class(&service).await;
        let ids = issue_many(&service, &badge_class.entity_id, 3).await;
        service.revoke(&ids[1], "mistake").await.unwrap();
        let mut before = Vec::new();
        for id in &ids {
            before.push(service.get_assertion(id).await.unwrap());
        }

        let job = service
            .update_badge_class_image(
                &badge_class.entity_id,
                UploadedImage::new("new.svg", testing::badge_svg("silver")),
            )
            .await
            .unwrap();
        let job = RebakeJob {
            batch_size: 1,
            ..job
        };

        let (queue, handle) = spawn_rebake_worker(service.clone());
        queue.enqueue(job).unwrap();
        drop(queue);
        handle.await.unwrap();

        for (id, before) in ids.iter().zip(&before) {
            let after = service.get_assertion(id).await.unwrap();
            if before.revoked {
                assert_eq!(after.version, before.version);
            } else {
                assert_ne!(after.image_fingerprint, before.image_fingerprint);
                let bytes = service
                    .blobs()
                    .read(after.image.as_deref().unwrap())
                    .await
                    .unwrap()
                    .unwrap();
                assert!(String::from_utf8(bytes).unwrap().contains("silver"));
            }
        }
    }

    #[tokio::test]
    async fn cancelled_worker_skips_jobs() {
        let service = Arc::new(testing::service());
        let (_, badge_class) = testing::issuer_and_badge_class(&service).await;
        let ids = issue_many(&service, &badge_class.entity_id, 1).await;
        let before = service.get_assertion(&ids[0]).await.unwrap();

        let job = service
            .update_badge_class_image(
                &badge_class.entity_id,
                UploadedImage::new("new.svg", testing::badge_svg("bronze")),
            )
            .await
            .unwrap();

        let (queue, handle) = spawn_rebake_worker(service.clone());
        queue.cancel();
        assert!(queue.is_cancelled());
        queue.enqueue(job).unwrap();
        drop(queue);
        handle.await.unwrap();

        let after = service.get_assertion(&ids[0]).await.unwrap();
        assert_eq!(after.image_fingerprint, before.image_fingerprint);
    }
}
