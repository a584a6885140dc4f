use serde::{Deserialize, Serialize};

use crate::id::RecordId;

/// One cached record: the entity fields plus its identifier.
///
/// On the wire the entity's fields are flattened next to `id`, matching the
/// backend's JSON rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row<E> {
    /// Server-assigned or temporary identifier.
    pub id: RecordId,
    /// True for rows synthesized by an optimistic create.
    #[serde(default, rename = "isOptimistic", skip_serializing_if = "is_false")]
    pub is_optimistic: bool,
    /// Entity payload.
    #[serde(flatten)]
    pub data: E,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

impl<E> Row<E> {
    /// Row confirmed by the backend.
    pub const fn new(id: RecordId, data: E) -> Self {
        Self {
            id,
            is_optimistic: false,
            data,
        }
    }

    /// Speculative row shown before the backend confirms a create.
    pub const fn optimistic(id: RecordId, data: E) -> Self {
        Self {
            id,
            is_optimistic: true,
            data,
        }
    }
}

/// Value held by one cache entry: a single record or an ordered list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheValue<E> {
    /// Ordered list of records.
    List(Vec<Row<E>>),
    /// Single record (detail view).
    Item(Row<E>),
}

impl<E> CacheValue<E> {
    /// Borrow the list, if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Row<E>]> {
        match self {
            Self::List(rows) => Some(rows),
            Self::Item(_) => None,
        }
    }

    /// Borrow the single record, if this is an item value.
    #[must_use]
    pub const fn as_item(&self) -> Option<&Row<E>> {
        match self {
            Self::Item(row) => Some(row),
            Self::List(_) => None,
        }
    }

    /// Iterate over every row in the value.
    pub fn rows(&self) -> impl Iterator<Item = &Row<E>> {
        match self {
            Self::List(rows) => rows.iter(),
            Self::Item(row) => std::slice::from_ref(row).iter(),
        }
    }

    /// Find a row by identifier.
    #[must_use]
    pub fn find(&self, id: RecordId) -> Option<&Row<E>> {
        self.rows().find(|row| row.id == id)
    }

    /// Number of rows held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(rows) => rows.len(),
            Self::Item(_) => 1,
        }
    }

    /// Returns true for an empty list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        qty: i64,
    }

    #[test]
    fn rows_flatten_entity_fields() {
        let row = Row::new(RecordId::Assigned(1), Sample { qty: 5 });
        let json = serde_json::to_value(&row).unwrap_or_else(|err| panic!("must serialize: {err}"));
        assert_eq!(json, serde_json::json!({"id": 1, "qty": 5}));

        let optimistic = Row::optimistic(RecordId::Temporary(2), Sample { qty: 1 });
        let json =
            serde_json::to_value(&optimistic).unwrap_or_else(|err| panic!("must serialize: {err}"));
        assert_eq!(json, serde_json::json!({"id": "temp-2", "isOptimistic": true, "qty": 1}));
    }

    #[test]
    fn value_deserializes_lists_and_items() {
        let list: CacheValue<Sample> = serde_json::from_str(r#"[{"id": 1, "qty": 5}]"#)
            .unwrap_or_else(|err| panic!("must parse list: {err}"));
        assert_eq!(list.len(), 1);
        assert!(list.as_list().is_some());

        let item: CacheValue<Sample> = serde_json::from_str(r#"{"id": 4, "qty": 2}"#)
            .unwrap_or_else(|err| panic!("must parse item: {err}"));
        assert_eq!(item.as_item().map(|row| row.data.qty), Some(2));
        assert!(item.find(RecordId::Assigned(4)).is_some());
        assert!(item.find(RecordId::Assigned(5)).is_none());
    }
}
