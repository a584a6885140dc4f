//! Speculative rewrites applied to a cached value before the server answers.
//!
//! Each policy is a pure function of the current value. Finding nothing to
//! rewrite yields [`PatchOutcome::Unchanged`]: the real state arrives with the
//! refetch after settle.

use erp_sync_core::{CacheValue, Entity, RecordId, Row};
use serde::{Deserialize, Serialize};

use crate::entry_store::PatchOutcome;

/// Which cached lists an optimistic create prepends to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimisticCreate {
    /// Any cached list, including an empty one.
    #[default]
    AnyList,
    /// Only lists that already hold at least one row.
    NonEmptyList,
}

/// Prepend an optimistic row built from `payload`.
pub fn apply_create<E: Entity>(
    current: Option<&CacheValue<E>>,
    temporary_id: RecordId,
    payload: &E,
    policy: OptimisticCreate,
) -> PatchOutcome<E> {
    let Some(CacheValue::List(rows)) = current else {
        return PatchOutcome::Unchanged;
    };
    if rows.is_empty() && policy == OptimisticCreate::NonEmptyList {
        return PatchOutcome::Unchanged;
    }
    let mut next = Vec::with_capacity(rows.len() + 1);
    next.push(Row::optimistic(temporary_id, payload.clone()));
    next.extend(rows.iter().cloned());
    PatchOutcome::Replace(CacheValue::List(next))
}

/// Merge `patch` into every row with identifier `target`.
pub fn apply_update<E: Entity>(
    current: Option<&CacheValue<E>>,
    target: RecordId,
    patch: &E::Patch,
) -> PatchOutcome<E> {
    match current {
        Some(CacheValue::List(rows)) if rows.iter().any(|row| row.id == target) => {
            let next = rows
                .iter()
                .map(|row| {
                    let mut row = row.clone();
                    if row.id == target {
                        row.data.apply(patch);
                    }
                    row
                })
                .collect();
            PatchOutcome::Replace(CacheValue::List(next))
        }
        Some(CacheValue::Item(row)) if row.id == target => {
            let mut row = row.clone();
            row.data.apply(patch);
            PatchOutcome::Replace(CacheValue::Item(row))
        }
        _ => PatchOutcome::Unchanged,
    }
}

/// Filter the row with identifier `target` out of a cached list.
pub fn apply_delete<E: Entity>(current: Option<&CacheValue<E>>, target: RecordId) -> PatchOutcome<E> {
    match current {
        Some(CacheValue::List(rows)) if rows.iter().any(|row| row.id == target) => {
            PatchOutcome::Replace(CacheValue::List(
                rows.iter().filter(|row| row.id != target).cloned().collect(),
            ))
        }
        _ => PatchOutcome::Unchanged,
    }
}
