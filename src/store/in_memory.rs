use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    error::{BadgeError, Result},
    store::{EntityKind, EntityStore, StoredRecord, Transaction, Write},
};

#[derive(Default)]
struct State {
    records: HashMap<(EntityKind, String), StoredRecord>,
    next_seq: u64,
}

type Staged = HashMap<(EntityKind, String), Option<StoredRecord>>;

impl State {
    fn sorted(&self, mut records: Vec<StoredRecord>) -> Vec<StoredRecord> {
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Whether `parent_id` owns a record of `kind` once `staged` is applied.
    fn has_children(&self, staged: &Staged, kind: EntityKind, parent_id: &str) -> bool {
        let owned =
            |r: &StoredRecord| r.kind == kind && r.parent_id.as_deref() == Some(parent_id);
        staged.values().flatten().any(owned)
            || self
                .records
                .iter()
                .any(|(key, r)| owned(r) && !staged.contains_key(key))
    }
}

/// In-memory entity storage for testing
///
/// Not persistent. A single lock guards all records, so a commit is observed
/// either entirely or not at all.
#[derive(Default)]
pub struct InMemoryEntityStore {
    state: RwLock<State>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of a kind, for tests and diagnostics.
    pub async fn count(&self, kind: EntityKind) -> usize {
        let state = self.state.read().await;
        state.records.keys().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>> {
        log::trace!("get {kind} {id}.");

        let state = self.state.read().await;
        Ok(state.records.get(&(kind, id.to_owned())).cloned())
    }

    async fn children(&self, kind: EntityKind, parent_id: &str) -> Result<Vec<StoredRecord>> {
        log::trace!("children {kind} of {parent_id}.");

        let state = self.state.read().await;
        let records = state
            .records
            .values()
            .filter(|r| r.kind == kind && r.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();

        Ok(state.sorted(records))
    }

    async fn children_after(
        &self,
        kind: EntityKind,
        parent_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<StoredRecord>> {
        log::trace!("children {kind} of {parent_id} after seq {after_seq}, limit {limit}.");

        let state = self.state.read().await;
        let mut page: Vec<&StoredRecord> = state
            .records
            .values()
            .filter(|r| {
                r.kind == kind && r.seq > after_seq && r.parent_id.as_deref() == Some(parent_id)
            })
            .collect();
        page.sort_unstable_by_key(|r| r.seq);
        page.truncate(limit);

        Ok(page.into_iter().cloned().collect())
    }

    async fn find(
        &self,
        kind: EntityKind,
        field: &str,
        value: &Value,
    ) -> Result<Vec<StoredRecord>> {
        log::trace!("find {kind} where {field} = {value}.");

        let state = self.state.read().await;
        let records = state
            .records
            .values()
            .filter(|r| r.kind == kind && r.body.get(field) == Some(value))
            .cloned()
            .collect();

        Ok(state.sorted(records))
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let mut state = self.state.write().await;

        // check every precondition against the state as it evolves through the transaction
        let mut staged = Staged::new();
        for write in &tx.writes {
            if let Write::AssertNoChildren { kind, parent_id } = write {
                if state.has_children(&staged, *kind, parent_id) {
                    log::debug!("commit rejected: {parent_id} still owns {kind} records");
                    return Err(BadgeError::Conflict {
                        kind: *kind,
                        id: parent_id.clone(),
                    });
                }
                continue;
            }

            let (kind, id) = write.target();
            let key = (kind, id.to_owned());
            let current = match staged.get(&key) {
                Some(staged) => staged.clone(),
                None => state.records.get(&key).cloned(),
            };

            if !write.expected().holds(current.as_ref()) {
                log::debug!(
                    "commit rejected: {kind} {id} does not satisfy {:?}",
                    write.expected()
                );
                return Err(BadgeError::Conflict {
                    kind,
                    id: id.to_owned(),
                });
            }

            match write {
                Write::Put {
                    parent_id, body, ..
                } => {
                    let (version, seq) = match &current {
                        Some(existing) => (existing.version + 1, existing.seq),
                        None => {
                            state.next_seq += 1;
                            (1, state.next_seq)
                        }
                    };
                    staged.insert(
                        key,
                        Some(StoredRecord {
                            kind,
                            id: id.to_owned(),
                            parent_id: parent_id.clone(),
                            version,
                            seq,
                            body: body.clone(),
                        }),
                    );
                }
                Write::Delete { .. } => {
                    staged.insert(key, None);
                }
                Write::Assert { .. } | Write::AssertNoChildren { .. } => {}
            }
        }

        let writes = staged.len();
        for (key, record) in staged {
            match record {
                Some(record) => {
                    state.records.insert(key, record);
                }
                None => {
                    state.records.remove(&key);
                }
            }
        }

        log::trace!("committed {writes} record changes.");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::Precondition;

    fn put(id: &str, parent: Option<&str>, expected: Precondition) -> Write {
        Write::Put {
            kind: EntityKind::BadgeClassTag,
            id: id.to_owned(),
            parent_id: parent.map(ToOwned::to_owned),
            body: json!({ "name": id }),
            expected,
        }
    }

    #[tokio::test]
    async fn put_bumps_version() {
        let store = InMemoryEntityStore::new();
        store
            .commit(Transaction {
                writes: vec![put("a", None, Precondition::Absent)],
            })
            .await
            .unwrap();
        store
            .commit(Transaction {
                writes: vec![put("a", None, Precondition::Version(1))],
            })
            .await
            .unwrap();

        let record = store.get(EntityKind::BadgeClassTag, "a").await.unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.seq, 1);
    }

    #[tokio::test]
    async fn failed_precondition_applies_nothing() {
        let store = InMemoryEntityStore::new();
        store
            .commit(Transaction {
                writes: vec![put("a", Some("bc"), Precondition::Absent)],
            })
            .await
            .unwrap();

        let err = store
            .commit(Transaction {
                writes: vec![
                    put("b", Some("bc"), Precondition::Absent),
                    Write::Delete {
                        kind: EntityKind::BadgeClassTag,
                        id: "a".to_owned(),
                        expected: Precondition::Absent,
                    },
                ],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BadgeError::Conflict { .. }));
        let ids: Vec<_> = store
            .children(EntityKind::BadgeClassTag, "bc")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a".to_owned()]);
    }

    #[tokio::test]
    async fn children_keep_insertion_order() {
        let store = InMemoryEntityStore::new();
        for id in ["z", "a", "m"] {
            store
                .commit(Transaction {
                    writes: vec![put(id, Some("bc"), Precondition::Absent)],
                })
                .await
                .unwrap();
        }

        let ids: Vec<_> = store
            .children(EntityKind::BadgeClassTag, "bc")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn no_children_counts_staged_writes() {
        let store = InMemoryEntityStore::new();
        store
            .commit(Transaction {
                writes: vec![put("a", Some("bc"), Precondition::Absent)],
            })
            .await
            .unwrap();

        let late_child = store
            .commit(Transaction {
                writes: vec![
                    put("b", Some("bc"), Precondition::Absent),
                    Write::AssertNoChildren {
                        kind: EntityKind::BadgeClassTag,
                        parent_id: "bc".to_owned(),
                    },
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(late_child, BadgeError::Conflict { .. }));

        store
            .commit(Transaction {
                writes: vec![
                    Write::Delete {
                        kind: EntityKind::BadgeClassTag,
                        id: "a".to_owned(),
                        expected: Precondition::Version(1),
                    },
                    Write::AssertNoChildren {
                        kind: EntityKind::BadgeClassTag,
                        parent_id: "bc".to_owned(),
                    },
                ],
            })
            .await
            .unwrap();
        assert_eq!(store.count(EntityKind::BadgeClassTag).await, 0);
    }

    #[tokio::test]
    async fn children_after_pages_in_insertion_order() {
        let store = InMemoryEntityStore::new();
        for id in ["z", "a", "m", "q"] {
            store
                .commit(Transaction {
                    writes: vec![
                        put(id, Some("bc"), Precondition::Absent),
                        put(&format!("other-{id}"), Some("other"), Precondition::Absent),
                    ],
                })
                .await
                .unwrap();
        }

        let first = store
            .children_after(EntityKind::BadgeClassTag, "bc", 0, 2)
            .await
            .unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);

        let rest = store
            .children_after(EntityKind::BadgeClassTag, "bc", first[1].seq, 10)
            .await
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "q"]);

        let done = store
            .children_after(EntityKind::BadgeClassTag, "bc", rest[1].seq, 10)
            .await
            .unwrap();
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn find_matches_top_level_field() {
        let store = InMemoryEntityStore::new();
        store
            .commit(Transaction {
                writes: vec![
                    put("a", None, Precondition::Absent),
                    put("b", None, Precondition::Absent),
                ],
            })
            .await
            .unwrap();

        let found = store
            .find(EntityKind::BadgeClassTag, "name", &json!("b"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "b");
    }

    #[tokio::test]
    async fn assert_checks_without_writing() {
        let store = InMemoryEntityStore::new();
        let err = store
            .commit(Transaction {
                writes: vec![
                    Write::Assert {
                        kind: EntityKind::BadgeClass,
                        id: "missing".to_owned(),
                        expected: Precondition::Exists,
                    },
                    put("a", Some("missing"), Precondition::Absent),
                ],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BadgeError::Conflict { kind: EntityKind::BadgeClass, .. }));
        assert_eq!(store.count(EntityKind::BadgeClassTag).await, 0);
    }
}
