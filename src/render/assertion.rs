use serde_json::{json, Map, Value};

use crate::{
    models::{BadgeInstance, BadgeInstanceEvidence, EvidenceItem, Extension},
    obi_version::ObiVersion,
    render::{
        insert_extensions, insert_extra, insert_image, insert_opt, insert_source_urls,
        render_badge_class, timestamp, BadgeClassView, JsonLdDocument, RenderOptions, Urls,
    },
};

/// An assertion with its badge class and the children its document includes.
#[derive(Clone, Copy, Debug)]
pub struct AssertionView<'a> {
    pub instance: &'a BadgeInstance,
    pub badge_class: BadgeClassView<'a>,
    pub evidence: &'a [BadgeInstanceEvidence],
    pub extensions: &'a [Extension],
}

impl AssertionView<'_> {
    pub fn jsonld_id(&self, urls: &Urls) -> String {
        urls.jsonld_id(
            &self.instance.provenance,
            urls.assertion(&self.instance.entity_id),
        )
    }
}

pub fn evidence_json(item: &EvidenceItem) -> Value {
    let mut doc = Map::new();
    doc.insert("type".into(), "Evidence".into());
    insert_opt(&mut doc, "id", item.evidence_url.as_deref());
    insert_opt(&mut doc, "narrative", item.narrative.as_deref());
    Value::Object(doc)
}

/// The single evidence URL of a 1.1 assertion.
///
/// One item with a URL links to it directly; anything else that has
/// evidence links to the hosted assertion, which lists every item.
pub fn v1_evidence_url(
    instance: &BadgeInstance,
    evidence: &[BadgeInstanceEvidence],
    urls: &Urls,
) -> Option<String> {
    match evidence {
        [] => None,
        [single] => Some(
            single
                .item
                .evidence_url
                .clone()
                .unwrap_or_else(|| urls.assertion(&instance.entity_id)),
        ),
        _ => Some(urls.assertion(&instance.entity_id)),
    }
}

/// Renders an assertion.
///
/// A revoked assertion renders as a bare revocation notice no matter which
/// options are given.
pub fn render_assertion(
    view: &AssertionView,
    opts: &RenderOptions,
    urls: &Urls,
) -> JsonLdDocument {
    let instance = view.instance;
    let version = opts.version;
    let id = urls.versioned(&view.jsonld_id(urls), opts);

    let mut doc = JsonLdDocument::new();
    doc.insert("@context".into(), version.context_iri().into());
    doc.insert("type".into(), "Assertion".into());
    doc.insert("id".into(), id.into());

    if instance.revoked {
        doc.insert("revoked".into(), true.into());
        doc.insert(
            "revocationReason".into(),
            instance.revocation_reason.clone().unwrap_or_default().into(),
        );
        return doc;
    }

    let badge = if opts.expand_badge_class {
        Value::Object(render_badge_class(&view.badge_class, opts, urls))
    } else {
        urls.versioned(&view.badge_class.jsonld_id(urls), opts).into()
    };
    doc.insert("badge".into(), badge);

    insert_image(
        &mut doc,
        instance,
        Some(urls.assertion_image(&instance.entity_id)),
    );

    let public_url = urls.assertion(&instance.entity_id);
    match version {
        ObiVersion::V1_1 => {
            doc.insert("uid".into(), instance.entity_id.clone().into());
            doc.insert(
                "verify".into(),
                json!({"url": urls.versioned(&public_url, opts), "type": "hosted"}),
            );
        }
        ObiVersion::V2_0 => {
            doc.insert("verification".into(), json!({"type": "HostedBadge"}));
        }
    }

    insert_source_urls(&mut doc, &instance.provenance, public_url, version);

    if let Some(evidence_url) = v1_evidence_url(instance, view.evidence, urls) {
        let evidence = match version {
            ObiVersion::V1_1 => evidence_url.into(),
            ObiVersion::V2_0 => view
                .evidence
                .iter()
                .map(|e| evidence_json(&e.item))
                .collect(),
        };
        doc.insert("evidence".into(), evidence);
    }

    if version == ObiVersion::V2_0 {
        insert_opt(&mut doc, "narrative", instance.narrative.as_deref());
    }

    doc.insert("issuedOn".into(), timestamp(&instance.issued_on).into());
    if let Some(expires_at) = &instance.expires_at {
        doc.insert("expires".into(), timestamp(expires_at).into());
    }

    let mut recipient = Map::new();
    recipient.insert("hashed".into(), instance.hashed.into());
    recipient.insert("type".into(), instance.recipient_type.to_string().into());
    recipient.insert("identity".into(), instance.identity().into());
    if instance.hashed {
        insert_opt(&mut recipient, "salt", instance.salt.as_deref());
    }
    doc.insert("recipient".into(), Value::Object(recipient));

    insert_extensions(&mut doc, view.extensions);
    insert_extra(&mut doc, instance, opts);

    doc
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        models::Provenance,
        recipient::hash_recipient,
        render::fixtures::{urls, Graph},
    };

    fn all_options() -> Vec<RenderOptions> {
        let mut options = vec![];
        for version in [ObiVersion::V1_1, ObiVersion::V2_0] {
            let base = RenderOptions::new(version);
            options.extend([
                base,
                base.expanded(),
                base.canonical(),
                base.without_extra(),
                RenderOptions {
                    expand_issuer: false,
                    ..base.expanded()
                },
            ]);
        }
        options
    }

    #[test]
    fn context_matches_version() {
        let graph = Graph::new();
        for opts in all_options() {
            let doc = render_assertion(&graph.assertion_view(), &opts, &urls());
            assert_eq!(doc["@context"], opts.version.context_iri());
        }
    }

    #[test]
    fn v2_document() {
        let mut graph = Graph::new();
        graph.instance.narrative = Some("Did the work".to_owned());
        graph.instance.expires_at = Some(Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap());

        let doc = render_assertion(&graph.assertion_view(), &RenderOptions::default(), &urls());

        assert_eq!(
            Value::Object(doc.clone()),
            json!({
                "@context": "https://w3id.org/openbadges/v2",
                "type": "Assertion",
                "id": "http://localhost:8000/public/assertions/ASSERTION",
                "badge": "http://localhost:8000/public/badges/BADGE",
                "image": "http://localhost:8000/public/assertions/ASSERTION/image",
                "verification": {"type": "HostedBadge"},
                "evidence": [{"type": "Evidence", "id": "https://portfolio.example/1"}],
                "narrative": "Did the work",
                "issuedOn": "2024-01-15T00:00:00Z",
                "expires": "2025-01-15T00:00:00Z",
                "recipient": {
                    "hashed": true,
                    "type": "email",
                    "identity": hash_recipient("a@example.com", Some("abc123")),
                    "salt": "abc123",
                },
            })
        );

        let keys: Vec<_> = doc.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "@context",
                "type",
                "id",
                "badge",
                "image",
                "verification",
                "evidence",
                "narrative",
                "issuedOn",
                "expires",
                "recipient",
            ]
        );
    }

    #[test]
    fn v1_document() {
        let mut graph = Graph::new();
        graph.instance.narrative = Some("Did the work".to_owned());

        let doc = render_assertion(
            &graph.assertion_view(),
            &RenderOptions::new(ObiVersion::V1_1),
            &urls(),
        );

        assert_eq!(
            doc["id"],
            "http://localhost:8000/public/assertions/ASSERTION?v=1_1"
        );
        assert_eq!(doc["uid"], "ASSERTION");
        assert_eq!(
            doc["verify"],
            json!({
                "url": "http://localhost:8000/public/assertions/ASSERTION?v=1_1",
                "type": "hosted",
            })
        );
        assert_eq!(doc["evidence"], "https://portfolio.example/1");
        assert!(!doc.contains_key("narrative"));
        assert!(!doc.contains_key("verification"));
    }

    #[test]
    fn v1_evidence_url_branches() {
        let mut graph = Graph::new();
        let hosted = "http://localhost:8000/public/assertions/ASSERTION";

        graph.evidence[0].item.evidence_url = None;
        graph.evidence[0].item.narrative = Some("narrative only".to_owned());
        assert_eq!(
            v1_evidence_url(&graph.instance, &graph.evidence, &urls()).as_deref(),
            Some(hosted)
        );

        graph.evidence.push(BadgeInstanceEvidence::new(
            "ASSERTION",
            EvidenceItem::url("https://portfolio.example/2"),
        ));
        assert_eq!(
            v1_evidence_url(&graph.instance, &graph.evidence, &urls()).as_deref(),
            Some(hosted)
        );

        graph.evidence.clear();
        assert_eq!(v1_evidence_url(&graph.instance, &graph.evidence, &urls()), None);
        let doc = render_assertion(&graph.assertion_view(), &RenderOptions::default(), &urls());
        assert!(!doc.contains_key("evidence"));
    }

    #[test]
    fn unhashed_recipient_has_no_salt() {
        let mut graph = Graph::new();
        graph.instance.hashed = false;

        let doc = render_assertion(&graph.assertion_view(), &RenderOptions::default(), &urls());

        assert_eq!(
            doc["recipient"],
            json!({"hashed": false, "type": "email", "identity": "a@example.com"})
        );
    }

    #[test]
    fn expanded_embeds_badge_class_and_issuer() {
        let graph = Graph::new();
        let doc = render_assertion(
            &graph.assertion_view(),
            &RenderOptions::default().expanded(),
            &urls(),
        );

        assert_eq!(doc["badge"]["type"], "BadgeClass");
        assert_eq!(doc["badge"]["issuer"]["type"], "Issuer");

        let badge_only = render_assertion(
            &graph.assertion_view(),
            &RenderOptions {
                expand_issuer: false,
                ..RenderOptions::default().expanded()
            },
            &urls(),
        );
        assert_eq!(
            badge_only["badge"]["issuer"],
            "http://localhost:8000/public/issuers/ISSUER"
        );
    }

    #[test]
    fn revoked_renders_only_the_notice() {
        let mut graph = Graph::new();
        graph.instance.revoke("bad").unwrap();
        graph.instance.provenance.original_json = Some(r#"{"x-extra": 1}"#.to_owned());

        for opts in all_options() {
            let doc = render_assertion(&graph.assertion_view(), &opts, &urls());
            let keys: Vec<_> = doc.keys().map(String::as_str).collect();
            assert_eq!(
                keys,
                vec!["@context", "type", "id", "revoked", "revocationReason"]
            );
            assert_eq!(doc["revoked"], true);
            assert_eq!(doc["revocationReason"], "bad");

            let expanded = render_assertion(
                &graph.assertion_view(),
                &RenderOptions {
                    expand_badge_class: !opts.expand_badge_class,
                    expand_issuer: !opts.expand_issuer,
                    ..opts
                },
                &urls(),
            );
            assert_eq!(doc, expanded);
        }
    }

    #[test]
    fn imported_passthrough() {
        let mut graph = Graph::new();
        graph.instance.provenance = Provenance::imported(
            "import",
            "https://elsewhere.example/assertion/1",
            &json!({
                "id": "https://elsewhere.example/assertion/1",
                "recipient": {"identity": "spoofed"},
                "image": {"id": "https://elsewhere.example/a.png", "author": "Jo"},
                "expires": "2030-06-01T08:00:00",
                "x-note": "kept",
            }),
        );

        let doc = render_assertion(&graph.assertion_view(), &RenderOptions::default(), &urls());

        assert_eq!(doc["id"], "https://elsewhere.example/assertion/1");
        assert_eq!(
            doc["image"],
            json!({"id": "http://localhost:8000/public/assertions/ASSERTION/image", "author": "Jo"})
        );
        assert_eq!(doc["recipient"]["hashed"], true);
        assert_eq!(doc["expires"], "2030-06-01T08:00:00Z");
        assert_eq!(doc["x-note"], "kept");
        assert_eq!(
            doc["hostedUrl"],
            "http://localhost:8000/public/assertions/ASSERTION"
        );
    }
}
