//! Open Badges issuing core.
//!
//! This crate renders issuers, badge classes and assertions as Open Badges
//! 1.1 and 2.0 JSON-LD, keeps their child collections in sync, and bakes
//! assertions into PNG and SVG badge images.

/// Blob storage backends (local filesystem, in-memory)
pub mod blob_store;

/// Content Identifier (CID) utilities and encoding
pub mod cid;

/// Runtime settings
pub mod config;

pub mod error;

/// Processing of uploaded issuer and badge class images
pub mod image_pipeline;

/// Outbound notifications
pub mod mail;

/// Persisted entities and their child records
pub mod models;

/// Open Badges versions and JSON-LD contexts
pub mod obi_version;

/// Cache invalidation after writes
pub mod publish;

/// Recipient hashing, blacklist and account lookup
pub mod recipient;

/// Desired-state diff of child collections
pub mod reconcile;

/// Open Badges JSON-LD documents
pub mod render;

/// Issuing operations over the store, blob storage and collaborators
pub mod service;

/// Entity storage with optimistic concurrency
pub mod store;

pub use config::Settings;
pub use error::{BadgeError, Result};
pub use obi_version::ObiVersion;
pub use render::{JsonLdDocument, RenderOptions};
pub use service::{BadgeService, Collaborators};
