use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use openbadges::{
    image_pipeline::UploadedImage,
    models::{BadgeClass, Issuer},
    publish::RecordingPublisher,
    store::Versioned,
    BadgeService, Collaborators, Settings,
};

/// A 1x1 transparent PNG.
const PIXEL_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn pixel_png() -> Vec<u8> {
    STANDARD.decode(PIXEL_PNG).unwrap()
}

pub fn badge_svg(fill: &str) -> Vec<u8> {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64"><rect width="64" height="64" fill="{fill}"/></svg>"#
    )
    .into_bytes()
}

pub fn service() -> (Arc<BadgeService>, Arc<RecordingPublisher>) {
    init_logging();

    let settings = Settings {
        http_origin: "https://badges.example.org".to_owned(),
        rebake_batch_size: 2,
        ..Default::default()
    };
    let publisher = Arc::new(RecordingPublisher::new());
    let collaborators = Collaborators {
        publisher: publisher.clone(),
        ..Collaborators::in_memory(&settings)
    };

    (
        Arc::new(BadgeService::new(settings, collaborators).unwrap()),
        publisher,
    )
}

pub async fn issuer(service: &BadgeService) -> Versioned<Issuer> {
    service
        .create_issuer(Issuer::new("Example University", Some("owner".to_owned())), None)
        .await
        .unwrap()
}

pub fn welding(issuer: &Issuer) -> BadgeClass {
    let mut badge_class = BadgeClass::new(&issuer.entity_id, "Safe Welding");
    badge_class.description = Some("Completed the welding safety course".to_owned());
    badge_class.criteria_text = Some("Pass the practical exam".to_owned());
    badge_class
}

pub async fn badge_class(
    service: &BadgeService,
    issuer: &Issuer,
    image: UploadedImage,
) -> Versioned<BadgeClass> {
    service
        .create_badge_class(welding(issuer), image)
        .await
        .unwrap()
}
