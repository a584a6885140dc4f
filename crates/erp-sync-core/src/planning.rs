use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entity::{Entity, FieldPatch, deserialize_field_patch, merge_field, merge_optional};

/// Production planning line shown on the planning dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningSchedule {
    /// Item code being produced.
    #[serde(default)]
    pub item_code: String,
    /// Display name of the item.
    #[serde(default)]
    pub item_name: Option<String>,
    /// Planned quantity.
    #[serde(default)]
    pub qty: i64,
    /// Planned production start.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub planned_start: Option<OffsetDateTime>,
    /// Free-form remarks.
    #[serde(default)]
    pub remarks: Option<String>,
}

impl PlanningSchedule {
    /// Minimal schedule for an item and quantity.
    pub fn new(item_code: impl Into<String>, qty: i64) -> Self {
        Self {
            item_code: item_code.into(),
            item_name: None,
            qty,
            planned_start: None,
            remarks: None,
        }
    }
}

/// Fields of a [`PlanningSchedule`] that a view may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanningSchedulePatch {
    /// New item code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_code: Option<String>,
    /// New or cleared item name.
    #[serde(
        default,
        deserialize_with = "deserialize_field_patch",
        skip_serializing_if = "Option::is_none"
    )]
    pub item_name: Option<FieldPatch<String>>,
    /// New quantity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<i64>,
    /// New or cleared planned start.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_start",
        deserialize_with = "deserialize_start"
    )]
    pub planned_start: Option<FieldPatch<OffsetDateTime>>,
    /// New or cleared remarks.
    #[serde(
        default,
        deserialize_with = "deserialize_field_patch",
        skip_serializing_if = "Option::is_none"
    )]
    pub remarks: Option<FieldPatch<String>>,
}

impl PlanningSchedulePatch {
    /// Patch that only changes the quantity.
    #[must_use]
    pub fn qty(qty: i64) -> Self {
        Self {
            qty: Some(qty),
            ..Self::default()
        }
    }

    /// Returns true when the patch would not change anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.item_code.is_none()
            && self.item_name.is_none()
            && self.qty.is_none()
            && self.planned_start.is_none()
            && self.remarks.is_none()
    }
}

fn serialize_start<S>(patch: &Option<FieldPatch<OffsetDateTime>>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let value = match patch {
        Some(FieldPatch::Set(ts)) => Some(*ts),
        Some(FieldPatch::Clear) | None => None,
    };
    time::serde::rfc3339::option::serialize(&value, s)
}

fn deserialize_start<'de, D>(d: D) -> Result<Option<FieldPatch<OffsetDateTime>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = time::serde::rfc3339::option::deserialize(d)?;
    Ok(Some(value.map_or(FieldPatch::Clear, FieldPatch::Set)))
}

impl Entity for PlanningSchedule {
    const RESOURCE: &'static str = "planningSchedules";

    type Patch = PlanningSchedulePatch;

    fn apply(&mut self, patch: &Self::Patch) {
        merge_field(&mut self.item_code, patch.item_code.as_ref());
        merge_optional(&mut self.item_name, patch.item_name.as_ref());
        merge_field(&mut self.qty, patch.qty.as_ref());
        merge_optional(&mut self.planned_start, patch.planned_start.as_ref());
        merge_optional(&mut self.remarks, patch.remarks.as_ref());
    }

    fn matches_search(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.item_code.to_lowercase().contains(&needle)
            || self
                .item_name
                .as_deref()
                .is_some_and(|name| name.to_lowercase().contains(&needle))
    }
}
