//! Outbound notification mail.
//!
//! Delivery is a side effect of issuing and creating issuers; it never makes
//! those operations fail.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::{
    config::Settings,
    models::{BadgeClass, BadgeInstance, Issuer, RecipientType},
    recipient::RecipientBlacklist,
    render::Urls,
};

pub const NOTIFY_EARNER_TEMPLATE: &str = "issuer/email/notify_earner";
pub const NOTIFY_ACCOUNT_HOLDER_TEMPLATE: &str = "issuer/email/notify_account_holder";
pub const NOTIFY_ADMINS_TEMPLATE: &str = "issuer/email/notify_admins";

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]+").expect("valid punctuation pattern"));

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, template: &str, recipient: &str, context: &Value) -> Result<()>;
}

/// Writes mail to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, template: &str, recipient: &str, context: &Value) -> Result<()> {
        log::info!("mail {template} to {recipient}: {context}");
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SentMail {
    pub template: String,
    pub recipient: String,
    pub context: Value,
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, template: &str, recipient: &str, context: &Value) -> Result<()> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire lock: {}", e))?
            .push(SentMail {
                template: template.to_owned(),
                recipient: recipient.to_owned(),
                context: context.clone(),
            });
        Ok(())
    }
}

fn display_name(name: &str) -> String {
    PUNCTUATION.replace_all(name, "").into_owned()
}

/// An assertion to tell its recipient about.
pub struct EarnerNotice<'a> {
    pub instance: &'a BadgeInstance,
    pub badge_class: &'a BadgeClass,
    pub issuer: &'a Issuer,
    /// The recipient email belongs to a verified account
    pub account_holder: bool,
    pub renotify: bool,
}

/// Mails the recipient of an email-addressed assertion, unless the address is blacklisted.
pub async fn notify_earner(
    mailer: &dyn Mailer,
    blacklist: &dyn RecipientBlacklist,
    settings: &Settings,
    notice: EarnerNotice<'_>,
) {
    let instance = notice.instance;
    if instance.recipient_type != RecipientType::Email {
        return;
    }

    match blacklist
        .is_blacklisted(RecipientType::Email, &instance.recipient_identifier)
        .await
    {
        Ok(false) => {}
        Ok(true) => {
            log::info!(
                "not notifying blacklisted earner of assertion {}",
                instance.entity_id
            );
            return;
        }
        Err(e) => {
            log::warn!("blacklist check failed, not notifying earner: {e:#}");
            return;
        }
    }

    let urls = Urls::new(settings);
    let issuer = notice.issuer;
    let assertion_url = urls.assertion(&instance.entity_id);

    let mut context = json!({
        "badge_name": notice.badge_class.name,
        "badge_id": instance.entity_id,
        "badge_description": notice.badge_class.description_nonnull(),
        "help_email": settings.help_email,
        "issuer_name": display_name(&issuer.name),
        "issuer_url": issuer.url,
        "issuer_email": issuer.email,
        "issuer_detail": urls.issuer(&issuer.entity_id),
        "issuer_image_url": issuer.image.as_ref().map(|_| urls.issuer_image(&issuer.entity_id)),
        "badge_instance_url": assertion_url,
        "image_url": format!("{assertion_url}/image?type=png"),
        "download_url": format!("{assertion_url}?action=download"),
        "site_name": settings.site_name,
        "site_url": settings.origin(),
    });
    if notice.renotify {
        context["renotify"] = json!("Reminder");
    }

    let template = if notice.account_holder {
        NOTIFY_ACCOUNT_HOLDER_TEMPLATE
    } else {
        NOTIFY_EARNER_TEMPLATE
    };

    if let Err(e) = mailer
        .send(template, &instance.recipient_identifier, &context)
        .await
    {
        log::warn!(
            "failed to notify earner of assertion {}: {e:#}",
            instance.entity_id
        );
    }
}

/// Tells every configured admin about a newly created issuer.
pub async fn notify_admins(mailer: &dyn Mailer, settings: &Settings, issuer: &Issuer) {
    let context = json!({
        "issuer_name": display_name(&issuer.name),
        "site_name": settings.site_name,
    });

    for admin in &settings.admin_emails {
        if let Err(e) = mailer.send(NOTIFY_ADMINS_TEMPLATE, admin, &context).await {
            log::warn!("failed to notify {admin} of issuer {}: {e:#}", issuer.entity_id);
        }
    }
}
