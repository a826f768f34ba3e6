use serde_json::Value;

use crate::{
    models::{Extension, Issuer},
    render::{
        insert_extensions, insert_extra, insert_image, insert_opt, insert_source_urls,
        JsonLdDocument, RenderOptions, Urls,
    },
};

/// An issuer with the children its document includes.
#[derive(Clone, Copy, Debug)]
pub struct IssuerView<'a> {
    pub issuer: &'a Issuer,
    pub extensions: &'a [Extension],
}

impl IssuerView<'_> {
    pub fn jsonld_id(&self, urls: &Urls) -> String {
        urls.jsonld_id(
            &self.issuer.provenance,
            urls.issuer(&self.issuer.entity_id),
        )
    }
}

pub fn render_issuer(view: &IssuerView, opts: &RenderOptions, urls: &Urls) -> JsonLdDocument {
    let issuer = view.issuer;

    let mut doc = JsonLdDocument::new();
    doc.insert("@context".into(), opts.version.context_iri().into());
    doc.insert("type".into(), "Issuer".into());
    doc.insert(
        "id".into(),
        urls.versioned(&view.jsonld_id(urls), opts).into(),
    );
    doc.insert("name".into(), issuer.name.clone().into());
    insert_opt(&mut doc, "url", issuer.url.as_deref());
    insert_opt(&mut doc, "email", issuer.email.as_deref());
    insert_opt(&mut doc, "description", issuer.description.as_deref());
    doc.insert("category".into(), issuer.category.clone().into());
    doc.insert("slug".into(), Value::String(issuer.entity_id.clone()));

    let image_url = issuer
        .image
        .as_ref()
        .map(|_| urls.issuer_image(&issuer.entity_id));
    insert_image(&mut doc, issuer, image_url);

    insert_source_urls(
        &mut doc,
        &issuer.provenance,
        urls.issuer(&issuer.entity_id),
        opts.version,
    );
    insert_extensions(&mut doc, view.extensions);
    insert_extra(&mut doc, issuer, opts);

    doc
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        models::Provenance,
        obi_version::ObiVersion,
        render::fixtures::{urls, Graph},
    };

    #[test]
    fn renders_local_issuer() {
        let graph = Graph::new();
        let doc = render_issuer(&graph.issuer_view(), &RenderOptions::default(), &urls());

        assert_eq!(
            Value::Object(doc),
            json!({
                "@context": "https://w3id.org/openbadges/v2",
                "type": "Issuer",
                "id": "http://localhost:8000/public/issuers/ISSUER",
                "name": "Acme",
                "url": "https://acme.example",
                "email": "badges@acme.example",
                "category": "n/a",
                "slug": "ISSUER",
                "image": "http://localhost:8000/public/issuers/ISSUER/image",
            })
        );
    }

    #[test]
    fn imported_issuer_keeps_provenance_but_not_identity() {
        let mut graph = Graph::new();
        let original = json!({
            "@context": "https://w3id.org/openbadges/v2",
            "id": "https://elsewhere.example/issuer",
            "name": "Imported name",
            "image": {"id": "https://elsewhere.example/img.png", "caption": "Logo"},
            "telephone": "555-1234",
        });
        graph.issuer.provenance =
            Provenance::imported("import", "https://elsewhere.example/issuer", &original);

        let doc = render_issuer(
            &graph.issuer_view(),
            &RenderOptions::new(ObiVersion::V1_1),
            &urls(),
        );

        assert_eq!(doc["@context"], "https://w3id.org/openbadges/v1");
        // external ids never get a version suffix
        assert_eq!(doc["id"], "https://elsewhere.example/issuer");
        assert_eq!(doc["name"], "Acme");
        assert_eq!(
            doc["image"],
            json!({"id": "http://localhost:8000/public/issuers/ISSUER/image", "caption": "Logo"})
        );
        assert_eq!(doc["source_url"], "https://elsewhere.example/issuer");
        assert_eq!(
            doc["hosted_url"],
            "http://localhost:8000/public/issuers/ISSUER"
        );
        assert_eq!(doc["telephone"], "555-1234");

        let keys: Vec<_> = doc.keys().map(String::as_str).collect();
        assert_eq!(keys.last(), Some(&"telephone"));

        let without_extra = render_issuer(
            &graph.issuer_view(),
            &RenderOptions::new(ObiVersion::V1_1).without_extra(),
            &urls(),
        );
        assert!(!without_extra.contains_key("telephone"));
    }
}
