//! Diff of a desired list of child descriptors against stored children.
//!
//! The plan is computed here; applying it inside one [`Transaction`] is the
//! caller's job.
//!
//! [`Transaction`]: crate::store::Transaction

use std::{collections::HashSet, hash::Hash};

use crate::{
    models::{IssuerStaff, StaffMember, StaffRole},
    store::Versioned,
};

/// Semantic identity of a child descriptor or record.
pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> Self::Key;
}

#[derive(Debug, PartialEq)]
pub struct ReconcilePlan<D, E> {
    pub to_add: Vec<D>,
    pub to_remove: Vec<E>,
    /// Desired descriptor paired with the stored record it changes
    pub to_update: Vec<(D, E)>,
}

impl<D, E> ReconcilePlan<D, E> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }
}

/// Computes which desired items to create, which existing records to delete,
/// and which matched records need their mutable field rewritten.
///
/// Desired items repeating an earlier key are ignored. Order of `to_add`
/// follows `desired`; order of `to_remove` follows `existing`.
pub fn reconcile<D, E>(
    desired: Vec<D>,
    existing: Vec<E>,
    needs_update: impl Fn(&D, &E) -> bool,
) -> ReconcilePlan<D, E>
where
    D: Keyed,
    E: Keyed<Key = D::Key>,
{
    let mut seen = HashSet::new();
    let desired: Vec<D> = desired
        .into_iter()
        .filter(|item| seen.insert(item.key()))
        .collect();

    let mut existing: Vec<Option<E>> = existing.into_iter().map(Some).collect();
    let mut to_add = Vec::new();
    let mut to_update = Vec::new();

    for item in desired {
        let key = item.key();
        let matched = existing
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|record| record.key() == key))
            .and_then(Option::take);

        match matched {
            Some(record) if needs_update(&item, &record) => to_update.push((item, record)),
            Some(_) => {}
            None => to_add.push(item),
        }
    }

    ReconcilePlan {
        to_add,
        to_remove: existing.into_iter().flatten().collect(),
        to_update,
    }
}

/// Staff plan that never leaves the issuer without an owner.
///
/// When the plan would remove or demote every owner and add none, the first
/// such owner (in stored order) is dropped from the plan and keeps its role.
pub fn reconcile_staff(
    desired: Vec<StaffMember>,
    existing: Vec<Versioned<IssuerStaff>>,
) -> ReconcilePlan<StaffMember, Versioned<IssuerStaff>> {
    let existing_owners: Vec<String> = existing
        .iter()
        .filter(|staff| staff.role == StaffRole::Owner)
        .map(|staff| staff.user_id.clone())
        .collect();

    let mut plan = reconcile(desired, existing, |member, staff| member.role != staff.role);

    let added_owners = plan
        .to_add
        .iter()
        .filter(|member| member.role == StaffRole::Owner)
        .count();
    let lost_owners: Vec<&str> = existing_owners
        .iter()
        .map(String::as_str)
        .filter(|user_id| {
            plan.to_remove.iter().any(|staff| staff.user_id == *user_id)
                || plan.to_update.iter().any(|(member, staff)| {
                    staff.user_id == *user_id && member.role != StaffRole::Owner
                })
        })
        .collect();

    if added_owners > 0 || lost_owners.is_empty() || lost_owners.len() < existing_owners.len() {
        return plan;
    }

    let keep = lost_owners[0].to_owned();
    log::debug!("keeping last owner {keep}");
    plan.to_remove.retain(|staff| staff.user_id != keep);
    plan.to_update.retain(|(_, staff)| staff.user_id != keep);
    plan
}
