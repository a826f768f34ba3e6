//! Recipient identifiers: salting and hashing, blacklist checks, and lookup
//! of the account (if any) an identifier belongs to.

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::{BadgeInstance, RecipientType};

/// New per-assertion salt.
pub fn generate_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `sha256$` followed by the hex digest of the lowercased identifier and salt.
pub fn hash_recipient(identifier: &str, salt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identifier.to_lowercase().as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    format!("sha256${}", hex::encode(hasher.finalize()))
}

/// Identifiers that must never be awarded badges.
#[async_trait]
pub trait RecipientBlacklist: Send + Sync {
    async fn is_blacklisted(&self, recipient_type: RecipientType, identifier: &str)
        -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: RwLock<HashSet<(RecipientType, String)>>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, recipient_type: RecipientType, identifier: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        entries.insert((recipient_type, identifier.to_lowercase()));
        Ok(())
    }
}

#[async_trait]
impl RecipientBlacklist for InMemoryBlacklist {
    async fn is_blacklisted(
        &self,
        recipient_type: RecipientType,
        identifier: &str,
    ) -> Result<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(entries.contains(&(recipient_type, identifier.to_lowercase())))
    }
}

/// A user account claiming a recipient identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientIdentity {
    pub user_id: String,
    pub verified: bool,
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn lookup(
        &self,
        recipient_type: RecipientType,
        identifier: &str,
    ) -> Result<Option<RecipientIdentity>>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    identities: RwLock<HashMap<(RecipientType, String), RecipientIdentity>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        recipient_type: RecipientType,
        identifier: &str,
        user_id: &str,
        verified: bool,
    ) -> Result<()> {
        let mut identities = self
            .identities
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;
        identities.insert(
            (recipient_type, identifier.to_lowercase()),
            RecipientIdentity {
                user_id: user_id.to_owned(),
                verified,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn lookup(
        &self,
        recipient_type: RecipientType,
        identifier: &str,
    ) -> Result<Option<RecipientIdentity>> {
        let identities = self
            .identities
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;
        Ok(identities
            .get(&(recipient_type, identifier.to_lowercase()))
            .cloned())
    }
}

/// An imported assertion whose recipient has an account that is not yet verified.
///
/// No matching identity means the assertion is unclaimed, not pending.
pub fn is_pending(instance: &BadgeInstance, identity: Option<&RecipientIdentity>) -> bool {
    instance.provenance.is_imported() && identity.is_some_and(|identity| !identity.verified)
}
