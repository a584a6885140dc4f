use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Entity shape that can live in the cache.
///
/// Partial updates are typed: each entity names its own patch struct, so the
/// set of fields a view may change is fixed at compile time.
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Root segment of the resource's cache keys, e.g. `"planningSchedules"`.
    const RESOURCE: &'static str;

    /// Partial update payload sent with `PUT <endpoint>/<id>`.
    type Patch: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Merge the fields present in `patch` into `self`.
    fn apply(&mut self, patch: &Self::Patch);

    /// Free-text match used when a list key carries a search term.
    fn matches_search(&self, term: &str) -> bool;
}

/// Patch for an optional field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch<T> {
    /// Overwrite with a new value.
    Set(T),
    /// Clear the field.
    Clear,
}

impl<T: Clone> FieldPatch<T> {
    /// Apply the patch to an optional slot.
    pub fn apply_to(&self, slot: &mut Option<T>) {
        *slot = match self {
            Self::Set(value) => Some(value.clone()),
            Self::Clear => None,
        };
    }
}

impl<T: Serialize> Serialize for FieldPatch<T> {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Set(value) => value.serialize(s),
            Self::Clear => s.serialize_none(),
        }
    }
}

/// Deserialize an `Option<FieldPatch<T>>` field where an explicit `null`
/// means [`FieldPatch::Clear`] and an absent field means "leave unchanged".
///
/// Use together with `#[serde(default)]`.
///
/// # Errors
/// Propagates the inner deserializer's error.
pub fn deserialize_field_patch<'de, D, T>(d: D) -> Result<Option<FieldPatch<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(|value| Some(value.map_or(FieldPatch::Clear, FieldPatch::Set)))
}

/// Overwrite `slot` when the patch carries a value.
pub fn merge_field<T: Clone>(slot: &mut T, patch: Option<&T>) {
    if let Some(value) = patch {
        *slot = value.clone();
    }
}

/// Apply an optional-field patch when present.
pub fn merge_optional<T: Clone>(slot: &mut Option<T>, patch: Option<&FieldPatch<T>>) {
    if let Some(patch) = patch {
        patch.apply_to(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Probe {
        #[serde(
            default,
            deserialize_with = "deserialize_field_patch",
            skip_serializing_if = "Option::is_none"
        )]
        note: Option<FieldPatch<String>>,
    }

    #[test]
    fn absent_null_and_value_are_distinguished() {
        let absent: Probe = serde_json::from_str("{}").unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(absent.note, None);

        let cleared: Probe =
            serde_json::from_str(r#"{"note": null}"#).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(cleared.note, Some(FieldPatch::Clear));

        let set: Probe =
            serde_json::from_str(r#"{"note": "hi"}"#).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(set.note, Some(FieldPatch::Set("hi".to_owned())));
    }

    #[test]
    fn clear_serializes_as_null() {
        let probe = Probe {
            note: Some(FieldPatch::Clear),
        };
        let json = serde_json::to_string(&probe).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(json, r#"{"note":null}"#);
    }

    #[test]
    fn merge_helpers_only_touch_present_fields() {
        let mut qty = 5;
        merge_field(&mut qty, None);
        assert_eq!(qty, 5);
        merge_field(&mut qty, Some(&9));
        assert_eq!(qty, 9);

        let mut note = Some("old".to_owned());
        merge_optional(&mut note, None);
        assert_eq!(note.as_deref(), Some("old"));
        merge_optional(&mut note, Some(&FieldPatch::Clear));
        assert_eq!(note, None);
    }
}
