mod common;

use chrono::{TimeZone, Utc};
use openbadges::{
    image_pipeline::UploadedImage,
    models::{ExpiresDuration, ExtensionItem, ExtensionOwner, RecipientType, StaffMember, StaffRole},
    publish::{CacheKey, Published},
    recipient::hash_recipient,
    service::IssueRequest,
    store::EntityKind,
    BadgeError, ObiVersion, RenderOptions,
};
use serde_json::json;

fn email(identifier: &str) -> IssueRequest {
    IssueRequest::new(identifier, RecipientType::Email)
}

#[tokio::test]
async fn issued_assertion_renders_for_both_versions() {
    let (service, _) = common::service();
    let issuer = common::issuer(&service).await;
    let badge_class = common::badge_class(
        &service,
        &issuer,
        UploadedImage::new("badge.png", common::pixel_png()),
    )
    .await;

    let instance = service
        .issue(&badge_class.entity_id, email("a@example.com"))
        .await
        .unwrap();
    let id = &instance.entity_id;
    let salt = instance.salt.clone().unwrap();

    let v2 = service
        .render_assertion(id, &RenderOptions::new(ObiVersion::V2_0))
        .await
        .unwrap();
    assert_eq!(v2["@context"], "https://w3id.org/openbadges/v2");
    assert_eq!(
        v2["id"],
        format!("https://badges.example.org/public/assertions/{id}")
    );
    assert_eq!(
        v2["badge"],
        format!(
            "https://badges.example.org/public/badges/{}",
            badge_class.entity_id
        )
    );
    assert_eq!(v2["verification"], json!({"type": "HostedBadge"}));
    assert_eq!(
        v2["recipient"],
        json!({
            "hashed": true,
            "type": "email",
            "identity": hash_recipient("a@example.com", Some(&salt)),
            "salt": salt,
        })
    );

    let v1 = service
        .render_assertion(id, &RenderOptions::new(ObiVersion::V1_1))
        .await
        .unwrap();
    assert_eq!(v1["@context"], "https://w3id.org/openbadges/v1");
    assert_eq!(
        v1["id"],
        format!("https://badges.example.org/public/assertions/{id}?v=1_1")
    );
    assert_eq!(v1["uid"], json!(id));
    assert_eq!(v1["verify"]["type"], "hosted");
}

#[tokio::test]
async fn one_year_expiry() {
    let (service, _) = common::service();
    let issuer = common::issuer(&service).await;
    let mut badge_class = common::welding(&issuer);
    badge_class.expires_amount = Some(1);
    badge_class.expires_duration = Some(ExpiresDuration::Years);
    let badge_class = service
        .create_badge_class(
            badge_class,
            UploadedImage::new("badge.svg", common::badge_svg("red")),
        )
        .await
        .unwrap();

    let request = IssueRequest {
        issued_on: Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()),
        ..email("a@example.com")
    };
    let instance = service
        .issue(&badge_class.entity_id, request)
        .await
        .unwrap();

    assert_eq!(
        instance.expires_at,
        Some(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap())
    );
    let doc = service
        .render_assertion(&instance.entity_id, &RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(doc["issuedOn"], "2024-01-15T12:00:00Z");
    assert_eq!(doc["expires"], "2025-01-15T12:00:00Z");
}

#[tokio::test]
async fn issuer_deletion_is_guarded_by_live_assertions() {
    let (service, publisher) = common::service();
    let issuer = common::issuer(&service).await;
    let badge_class = common::badge_class(
        &service,
        &issuer,
        UploadedImage::new("badge.svg", common::badge_svg("red")),
    )
    .await;
    let instance = service
        .issue(&badge_class.entity_id, email("a@example.com"))
        .await
        .unwrap();

    let err = service.delete_issuer(&issuer.entity_id).await.unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(
        err,
        BadgeError::HasDependents {
            dependents: EntityKind::BadgeInstance,
            ..
        }
    ));

    service.revoke(&instance.entity_id, "issued in error").await.unwrap();
    publisher.clear();
    service.delete_issuer(&issuer.entity_id).await.unwrap();

    let events = publisher.events();
    assert!(events.contains(&Published::Deleted(CacheKey::entity(
        EntityKind::Issuer,
        &issuer.entity_id
    ))));
    assert!(events.contains(&Published::Deleted(CacheKey::entity(
        EntityKind::BadgeInstance,
        &instance.entity_id
    ))));
    assert!(service
        .get_issuer(&issuer.entity_id)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn revocation_is_terminal() {
    let (service, _) = common::service();
    let issuer = common::issuer(&service).await;
    let badge_class = common::badge_class(
        &service,
        &issuer,
        UploadedImage::new("badge.svg", common::badge_svg("red")),
    )
    .await;
    let instance = service
        .issue(&badge_class.entity_id, email("a@example.com"))
        .await
        .unwrap();
    let id = &instance.entity_id;

    assert!(matches!(
        service.revoke(id, "").await,
        Err(BadgeError::MissingReason)
    ));
    let revoked = service.revoke(id, "bad").await.unwrap();
    assert!(revoked.revoked);
    assert_eq!(revoked.revocation_reason.as_deref(), Some("bad"));
    for _ in 0..2 {
        assert!(matches!(
            service.revoke(id, "bad").await,
            Err(BadgeError::AlreadyRevoked)
        ));
    }

    for version in [ObiVersion::V1_1, ObiVersion::V2_0] {
        let plain = service
            .render_assertion(id, &RenderOptions::new(version))
            .await
            .unwrap();
        let expanded = service
            .render_assertion(id, &RenderOptions::new(version).expanded())
            .await
            .unwrap();
        assert_eq!(plain, expanded);
        assert_eq!(plain["revoked"], true);
        assert_eq!(plain["revocationReason"], "bad");
        assert_eq!(plain.len(), 5);
    }
}

#[tokio::test]
async fn last_owner_survives_staff_sync() {
    let (service, _) = common::service();
    let issuer = common::issuer(&service).await;
    let id = &issuer.entity_id;

    service
        .set_issuer_staff(
            id,
            vec![
                StaffMember::new("owner", StaffRole::Owner),
                StaffMember::new("editor", StaffRole::Editor),
            ],
        )
        .await
        .unwrap();
    assert_eq!(service.issuer_editors(id).await.unwrap(), vec!["owner", "editor"]);

    let staff = service
        .set_issuer_staff(id, vec![StaffMember::new("editor", StaffRole::Editor)])
        .await
        .unwrap();

    let members: Vec<_> = staff
        .iter()
        .map(|s| (s.user_id.as_str(), s.role))
        .collect();
    assert_eq!(
        members,
        vec![("owner", StaffRole::Owner), ("editor", StaffRole::Editor)]
    );
    assert_eq!(service.issuer_owners(id).await.unwrap(), vec!["owner"]);
}

#[tokio::test]
async fn repeated_sync_changes_nothing() {
    let (service, publisher) = common::service();
    let issuer = common::issuer(&service).await;
    let badge_class = common::badge_class(
        &service,
        &issuer,
        UploadedImage::new("badge.svg", common::badge_svg("red")),
    )
    .await;
    let id = &badge_class.entity_id;
    let extensions = vec![ExtensionItem::new(
        "extensions:ApplyLink",
        json!({"url": "https://example.org/apply"}),
    )];

    service
        .set_extensions(ExtensionOwner::BadgeClass, id, extensions.clone())
        .await
        .unwrap();
    service
        .set_tags(id, vec!["welding".to_owned()])
        .await
        .unwrap();
    let before = service.get_badge_class(id).await.unwrap();

    publisher.clear();
    service
        .set_extensions(ExtensionOwner::BadgeClass, id, extensions)
        .await
        .unwrap();
    service
        .set_tags(id, vec!["welding".to_owned()])
        .await
        .unwrap();

    assert!(publisher.events().is_empty());
    assert_eq!(service.get_badge_class(id).await.unwrap(), before);

    let doc = service
        .render_badge_class(id, &RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(
        doc["extensions:ApplyLink"],
        json!({"url": "https://example.org/apply"})
    );
    assert_eq!(doc["tags"], json!(["welding"]));
}
