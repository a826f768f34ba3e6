use serde_json::{Map, Value};

use crate::{
    models::{AlignmentItem, BadgeClass, BadgeClassAlignment, BadgeClassTag, Extension},
    obi_version::ObiVersion,
    render::{
        insert_extensions, insert_extra, insert_image, insert_opt, insert_source_urls,
        render_issuer, IssuerView, JsonLdDocument, RenderOptions, Urls,
    },
};

/// A badge class with its issuer and the children its document includes.
#[derive(Clone, Copy, Debug)]
pub struct BadgeClassView<'a> {
    pub badge_class: &'a BadgeClass,
    pub issuer: IssuerView<'a>,
    pub alignments: &'a [BadgeClassAlignment],
    pub tags: &'a [BadgeClassTag],
    pub extensions: &'a [Extension],
}

impl BadgeClassView<'_> {
    pub fn jsonld_id(&self, urls: &Urls) -> String {
        urls.jsonld_id(
            &self.badge_class.provenance,
            urls.badge_class(&self.badge_class.entity_id),
        )
    }

    /// The criteria URL, falling back to the public criteria page.
    pub fn criteria_url(&self, urls: &Urls) -> String {
        match &self.badge_class.criteria_url {
            Some(url) => url.clone(),
            None => urls.badge_class_criteria(&self.badge_class.entity_id),
        }
    }
}

pub fn alignment_json(item: &AlignmentItem) -> Value {
    let mut doc = Map::new();
    doc.insert("targetName".into(), item.target_name.clone().into());
    doc.insert("targetUrl".into(), item.target_url.clone().into());
    insert_opt(&mut doc, "targetDescription", item.target_description.as_deref());
    insert_opt(&mut doc, "targetFramework", item.target_framework.as_deref());
    insert_opt(&mut doc, "targetCode", item.target_code.as_deref());
    Value::Object(doc)
}

/// Renders a badge class. With `expand_issuer`, `issuer` holds the issuer
/// document instead of its id.
pub fn render_badge_class(
    view: &BadgeClassView,
    opts: &RenderOptions,
    urls: &Urls,
) -> JsonLdDocument {
    let badge_class = view.badge_class;
    let version = opts.version;

    let mut doc = JsonLdDocument::new();
    doc.insert("@context".into(), version.context_iri().into());
    doc.insert("type".into(), "BadgeClass".into());
    doc.insert(
        "id".into(),
        urls.versioned(&view.jsonld_id(urls), opts).into(),
    );
    doc.insert("name".into(), badge_class.name.clone().into());
    doc.insert(
        "description".into(),
        badge_class.description_nonnull().into(),
    );
    let issuer = if opts.expand_issuer {
        Value::Object(render_issuer(&view.issuer, opts, urls))
    } else {
        urls.versioned(&view.issuer.jsonld_id(urls), opts).into()
    };
    doc.insert("issuer".into(), issuer);

    if badge_class.image.is_some() {
        insert_image(
            &mut doc,
            badge_class,
            Some(urls.badge_class_image(&badge_class.entity_id)),
        );
    }

    let criteria = match version {
        ObiVersion::V1_1 => view.criteria_url(urls).into(),
        ObiVersion::V2_0 => {
            let mut criteria = Map::new();
            insert_opt(&mut criteria, "id", badge_class.criteria_url.as_deref());
            insert_opt(
                &mut criteria,
                "narrative",
                badge_class.criteria_text.as_deref(),
            );
            Value::Object(criteria)
        }
    };
    doc.insert("criteria".into(), criteria);

    insert_source_urls(
        &mut doc,
        &badge_class.provenance,
        urls.badge_class(&badge_class.entity_id),
        version,
    );

    if version == ObiVersion::V2_0 {
        doc.insert(
            "alignment".into(),
            view.alignments
                .iter()
                .map(|a| alignment_json(&a.item))
                .collect(),
        );
        doc.insert(
            "tags".into(),
            view.tags.iter().map(|t| Value::from(t.name.clone())).collect(),
        );
    }

    insert_extensions(&mut doc, view.extensions);
    insert_extra(&mut doc, badge_class, opts);

    doc
}
