use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{BadgeError, Result};

const DEFAULT_HTTP_ORIGIN: &str = "http://localhost:8000";
const DEFAULT_MEDIA_URL: &str = "/media/";
const DEFAULT_REBAKE_BATCH_SIZE: usize = 100;

/// Runtime settings for issuing, rendering and baking.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Scheme and host every locally hosted JSON-LD id is built from
    pub http_origin: String,
    /// Prefix for URLs of stored media files; relative values are joined to `http_origin`
    pub media_url: String,
    /// Number of assertions rebaked per batch after a badge class image change
    pub rebake_batch_size: usize,
    pub help_email: String,
    pub site_name: String,
    /// Recipients of the new-issuer notification
    pub admin_emails: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            http_origin: DEFAULT_HTTP_ORIGIN.to_owned(),
            media_url: DEFAULT_MEDIA_URL.to_owned(),
            rebake_batch_size: DEFAULT_REBAKE_BATCH_SIZE,
            help_email: "help@badgr.io".to_owned(),
            site_name: "mybadges.org".to_owned(),
            admin_emails: vec![],
        }
    }
}

impl Settings {
    /// Reads `BADGR_*` environment variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let rebake_batch_size = match env::var("BADGR_REBAKE_BATCH_SIZE") {
            Ok(value) => value.trim().parse::<usize>().map_err(|_| {
                BadgeError::Config(format!("BADGR_REBAKE_BATCH_SIZE '{value}' is not a number"))
            })?,
            Err(_) => defaults.rebake_batch_size,
        };

        let admin_emails = env::var("BADGR_ADMIN_EMAILS")
            .map(|emails| {
                emails
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or(defaults.admin_emails);

        let settings = Settings {
            http_origin: env::var("BADGR_HTTP_ORIGIN").unwrap_or(defaults.http_origin),
            media_url: env::var("BADGR_MEDIA_URL").unwrap_or(defaults.media_url),
            rebake_batch_size,
            help_email: env::var("BADGR_HELP_EMAIL").unwrap_or(defaults.help_email),
            site_name: env::var("BADGR_SITE_NAME").unwrap_or(defaults.site_name),
            admin_emails,
        };
        settings.validate()?;

        log::debug!("loaded settings from environment: {settings:?}");

        Ok(settings)
    }

    /// Parses settings from a JSON document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.http_origin.starts_with("http://") || self.http_origin.starts_with("https://")) {
            return Err(BadgeError::Config(format!(
                "http_origin '{}' must be an http(s) URL",
                self.http_origin
            )));
        }
        if self.rebake_batch_size == 0 {
            return Err(BadgeError::Config(
                "rebake_batch_size must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Origin without a trailing slash.
    pub fn origin(&self) -> &str {
        self.http_origin.trim_end_matches('/')
    }
}
