use serde::{Deserialize, Serialize};

use crate::entity::{Entity, FieldPatch, deserialize_field_patch, merge_field, merge_optional};

/// Scheduled run of a saved SQL report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSchedule {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Saved report executed by this schedule.
    #[serde(default)]
    pub report_id: Option<i64>,
    /// Cron expression evaluated by the backend.
    #[serde(default)]
    pub cron: String,
    /// Whether the schedule is enabled.
    #[serde(default)]
    pub is_active: bool,
    /// Mail recipients of the rendered report.
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl ReportSchedule {
    /// Active schedule with a name and cron expression.
    pub fn new(name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            report_id: None,
            cron: cron.into(),
            is_active: true,
            recipients: Vec::new(),
        }
    }
}

/// Fields of a [`ReportSchedule`] that a view may change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportSchedulePatch {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New or cleared report reference.
    #[serde(
        default,
        deserialize_with = "deserialize_field_patch",
        skip_serializing_if = "Option::is_none"
    )]
    pub report_id: Option<FieldPatch<i64>>,
    /// New cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Enable or disable the schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    /// Replacement recipient list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<Vec<String>>,
}

impl ReportSchedulePatch {
    /// Patch toggling the active flag.
    #[must_use]
    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::default()
        }
    }

    /// Returns true when the patch would not change anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.report_id.is_none()
            && self.cron.is_none()
            && self.is_active.is_none()
            && self.recipients.is_none()
    }
}

impl Entity for ReportSchedule {
    const RESOURCE: &'static str = "schedules";

    type Patch = ReportSchedulePatch;

    fn apply(&mut self, patch: &Self::Patch) {
        merge_field(&mut self.name, patch.name.as_ref());
        merge_optional(&mut self.report_id, patch.report_id.as_ref());
        merge_field(&mut self.cron, patch.cron.as_ref());
        merge_field(&mut self.is_active, patch.is_active.as_ref());
        merge_field(&mut self.recipients, patch.recipients.as_ref());
    }

    fn matches_search(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        needle.is_empty() || self.name.to_lowercase().contains(&needle)
    }
}
