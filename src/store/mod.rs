//! Durable entity storage seam.
//!
//! Records are JSON bodies keyed by `(EntityKind, id)`, optionally owned by a
//! parent record. Every write goes through a [`Transaction`], which commits
//! all of its writes or none of them.

pub mod in_memory;

pub use in_memory::InMemoryEntityStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{BadgeError, Result};

/// Every persisted record type.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum EntityKind {
    Issuer,
    IssuerStaff,
    IssuerExtension,
    BadgeClass,
    BadgeClassAlignment,
    BadgeClassTag,
    BadgeClassExtension,
    BadgeInstance,
    BadgeInstanceEvidence,
    BadgeInstanceExtension,
    BadgeInstanceBakedImage,
}

/// A record as held by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub kind: EntityKind,
    pub id: String,
    pub parent_id: Option<String>,
    /// Incremented on every successful put
    pub version: u64,
    /// Store-wide insertion sequence, fixed at creation
    pub seq: u64,
    pub body: Value,
}

/// Condition a write requires of the current stored record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precondition {
    Any,
    Absent,
    Exists,
    Version(u64),
}

impl Precondition {
    pub fn holds(&self, current: Option<&StoredRecord>) -> bool {
        match (self, current) {
            (Precondition::Any, _) => true,
            (Precondition::Absent, None) => true,
            (Precondition::Exists, Some(_)) => true,
            (Precondition::Version(v), Some(record)) => record.version == *v,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Put {
        kind: EntityKind,
        id: String,
        parent_id: Option<String>,
        body: Value,
        expected: Precondition,
    },
    Delete {
        kind: EntityKind,
        id: String,
        expected: Precondition,
    },
    /// Checks a precondition without writing
    Assert {
        kind: EntityKind,
        id: String,
        expected: Precondition,
    },
    /// Requires that no record of `kind` is owned by `parent_id`, counting the
    /// writes staged before it in the same transaction
    AssertNoChildren { kind: EntityKind, parent_id: String },
}

impl Write {
    pub fn target(&self) -> (EntityKind, &str) {
        match self {
            Write::Put { kind, id, .. }
            | Write::Delete { kind, id, .. }
            | Write::Assert { kind, id, .. } => (*kind, id),
            Write::AssertNoChildren { kind, parent_id } => (*kind, parent_id),
        }
    }

    pub fn expected(&self) -> Precondition {
        match self {
            Write::Put { expected, .. }
            | Write::Delete { expected, .. }
            | Write::Assert { expected, .. } => *expected,
            Write::AssertNoChildren { .. } => Precondition::Any,
        }
    }
}

/// An ordered set of writes applied atomically.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
    pub writes: Vec<Write>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Adds a record that must not exist yet.
    pub fn insert<T: Record>(&mut self, record: &T) -> Result<&mut Self> {
        self.writes.push(Write::Put {
            kind: record.kind(),
            id: record.id().to_owned(),
            parent_id: record.parent_id().map(ToOwned::to_owned),
            body: serde_json::to_value(record)?,
            expected: Precondition::Absent,
        });
        Ok(self)
    }

    /// Replaces a record, failing if it changed since it was loaded.
    pub fn update<T: Record>(&mut self, record: &Versioned<T>) -> Result<&mut Self> {
        self.writes.push(Write::Put {
            kind: record.record.kind(),
            id: record.record.id().to_owned(),
            parent_id: record.record.parent_id().map(ToOwned::to_owned),
            body: serde_json::to_value(&record.record)?,
            expected: Precondition::Version(record.version),
        });
        Ok(self)
    }

    pub fn remove<T: Record>(&mut self, record: &Versioned<T>) -> &mut Self {
        self.writes.push(Write::Delete {
            kind: record.record.kind(),
            id: record.record.id().to_owned(),
            expected: Precondition::Version(record.version),
        });
        self
    }

    /// Requires a record to be unchanged since it was loaded, without writing it.
    pub fn assert_unchanged<T: Record>(&mut self, record: &Versioned<T>) -> &mut Self {
        self.writes.push(Write::Assert {
            kind: record.record.kind(),
            id: record.record.id().to_owned(),
            expected: Precondition::Version(record.version),
        });
        self
    }

    pub fn assert_exists(&mut self, kind: EntityKind, id: &str) -> &mut Self {
        self.writes.push(Write::Assert {
            kind,
            id: id.to_owned(),
            expected: Precondition::Exists,
        });
        self
    }

    /// Requires every child of `kind` under `parent_id` to be removed by the
    /// writes added so far.
    pub fn assert_no_children(&mut self, kind: EntityKind, parent_id: &str) -> &mut Self {
        self.writes.push(Write::AssertNoChildren {
            kind,
            parent_id: parent_id.to_owned(),
        });
        self
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>>;

    /// Records of `kind` owned by `parent_id`, in insertion order.
    async fn children(&self, kind: EntityKind, parent_id: &str) -> Result<Vec<StoredRecord>>;

    /// At most `limit` records of `kind` owned by `parent_id` with `seq > after_seq`,
    /// in insertion order.
    async fn children_after(
        &self,
        kind: EntityKind,
        parent_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<StoredRecord>>;

    /// Records of `kind` whose top-level `field` equals `value`, in insertion order.
    async fn find(&self, kind: EntityKind, field: &str, value: &Value)
        -> Result<Vec<StoredRecord>>;

    /// Applies every write, or none if any precondition fails.
    async fn commit(&self, tx: Transaction) -> Result<()>;
}

/// A typed persisted record.
pub trait Record: Serialize + DeserializeOwned {
    fn kind(&self) -> EntityKind;

    fn id(&self) -> &str;

    fn parent_id(&self) -> Option<&str> {
        None
    }
}

/// A record together with the store version it was loaded at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
    pub seq: u64,
}

impl<T: DeserializeOwned> Versioned<T> {
    fn from_stored(stored: StoredRecord) -> Result<Self> {
        Ok(Versioned {
            record: serde_json::from_value(stored.body)?,
            version: stored.version,
            seq: stored.seq,
        })
    }
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.record
    }
}

impl<T> std::ops::DerefMut for Versioned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.record
    }
}

pub async fn load<T: DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    id: &str,
) -> Result<Option<Versioned<T>>> {
    store
        .get(kind, id)
        .await?
        .map(Versioned::from_stored)
        .transpose()
}

/// Loads a record by entity id, falling back to its legacy slug.
pub async fn load_by_id_or_slug<T: DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    id_or_slug: &str,
) -> Result<Versioned<T>> {
    if let Some(record) = load(store, kind, id_or_slug).await? {
        return Ok(record);
    }

    let by_slug = store
        .find(kind, "slug", &Value::String(id_or_slug.to_owned()))
        .await?;
    match by_slug.into_iter().next() {
        Some(stored) => Versioned::from_stored(stored),
        None => Err(BadgeError::not_found(kind, id_or_slug)),
    }
}

pub async fn load_children<T: DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    parent_id: &str,
) -> Result<Vec<Versioned<T>>> {
    store
        .children(kind, parent_id)
        .await?
        .into_iter()
        .map(Versioned::from_stored)
        .collect()
}

/// One page of children, resuming after the record with sequence `after_seq`.
pub async fn load_children_after<T: DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    parent_id: &str,
    after_seq: u64,
    limit: usize,
) -> Result<Vec<Versioned<T>>> {
    store
        .children_after(kind, parent_id, after_seq, limit)
        .await?
        .into_iter()
        .map(Versioned::from_stored)
        .collect()
}

pub async fn find_records<T: DeserializeOwned>(
    store: &dyn EntityStore,
    kind: EntityKind,
    field: &str,
    value: &Value,
) -> Result<Vec<Versioned<T>>> {
    store
        .find(kind, field, value)
        .await?
        .into_iter()
        .map(Versioned::from_stored)
        .collect()
}
