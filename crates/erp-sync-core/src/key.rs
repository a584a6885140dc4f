use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

use crate::entity::Entity;
use crate::id::RecordId;

/// Segment used by detail keys: `[root, "detail", id]`.
pub const DETAIL_SEGMENT: &str = "detail";

/// One primitive element of a [`CacheKey`].
///
/// Floating point values are deliberately not representable: keys compare by
/// structural equality and must hash consistently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// JSON-style `null`.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeyPart {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for KeyPart {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<RecordId> for KeyPart {
    fn from(value: RecordId) -> Self {
        match value {
            RecordId::Assigned(id) => Self::Int(id),
            RecordId::Temporary(_) => Self::Str(value.to_string()),
        }
    }
}

impl<T> From<Option<T>> for KeyPart
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Str(value) => write!(f, "{value:?}"),
        }
    }
}

/// Structural identifier of one cache slot, e.g. `["planningSchedules", ""]`.
///
/// Keys are immutable once built; deriving a related key (a family prefix or a
/// child key) always yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<[KeyPart]>);

impl CacheKey {
    /// Build a key from ordered parts.
    pub fn new<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = KeyPart>,
    {
        Self(parts.into_iter().collect())
    }

    /// Ordered key parts.
    #[must_use]
    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Number of parts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key (which prefixes every key).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First part, usually the resource name.
    #[must_use]
    pub fn root(&self) -> Option<&KeyPart> {
        self.0.first()
    }

    /// Returns true when `prefix` is an element-wise prefix of this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Key made of the first `len` parts.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0.iter().take(len).cloned().collect())
    }

    /// New key with one more trailing part.
    #[must_use]
    pub fn child(&self, part: impl Into<KeyPart>) -> Self {
        Self(
            self.0
                .iter()
                .cloned()
                .chain(std::iter::once(part.into()))
                .collect(),
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

impl Serialize for CacheKey {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<KeyPart>::deserialize(d).map(Self::new)
    }
}

/// Build a [`CacheKey`] from heterogeneous primitive parts.
///
/// ```
/// use erp_sync_core::cache_key;
/// let key = cache_key!["planningSchedules", ""];
/// assert_eq!(key.to_string(), r#"["planningSchedules",""]"#);
/// ```
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),* $(,)?) => {
        $crate::key::CacheKey::new([$($crate::key::KeyPart::from($part)),*])
    };
}

/// Derive a key from semantic parts.
#[must_use]
pub fn key_of(parts: Vec<KeyPart>) -> CacheKey {
    CacheKey::new(parts)
}

/// Structural, order-sensitive key comparison.
#[must_use]
pub fn keys_equal(a: &CacheKey, b: &CacheKey) -> bool {
    a == b
}

/// Returns true when `key` belongs to the family addressed by `prefix`.
#[must_use]
pub fn key_matches_prefix(key: &CacheKey, prefix: &CacheKey) -> bool {
    key.starts_with(prefix)
}

/// Key family of one REST resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKeys {
    root: String,
}

impl ResourceKeys {
    /// Key family rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// Key family of an entity type.
    #[must_use]
    pub fn of<E: Entity>() -> Self {
        Self::new(E::RESOURCE)
    }

    /// Resource name.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// `[root]`: prefix of every key of the resource.
    #[must_use]
    pub fn all(&self) -> CacheKey {
        CacheKey::new([KeyPart::from(self.root.as_str())])
    }

    /// `[root, search]`: a filtered list.
    #[must_use]
    pub fn list(&self, search: &str) -> CacheKey {
        self.all().child(search)
    }

    /// `[root, "detail", id]`: a single record.
    #[must_use]
    pub fn detail(&self, id: RecordId) -> CacheKey {
        self.all().child(DETAIL_SEGMENT).child(id)
    }
}

/// Request shape addressed by a resource key, as understood by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyShape<'a> {
    /// `[root]`: the unfiltered list.
    All,
    /// `[root, search]` (`null` search means unfiltered).
    List {
        /// Free-text search term.
        search: &'a str,
    },
    /// `[root, "detail", id]`.
    Detail {
        /// Record identifier.
        id: RecordId,
    },
}

impl<'a> KeyShape<'a> {
    /// Classify a key of the resource named `root`.
    ///
    /// Keys rooted at another resource have no shape.
    #[must_use]
    pub fn parse(key: &'a CacheKey, root: &str) -> Option<Self> {
        let [KeyPart::Str(first), rest @ ..] = key.parts() else {
            return None;
        };
        if first != root {
            return None;
        }
        match rest {
            [] => Some(Self::All),
            [KeyPart::Null] => Some(Self::List { search: "" }),
            [KeyPart::Str(search)] => Some(Self::List { search }),
            [KeyPart::Str(segment), KeyPart::Int(id)] if segment == DETAIL_SEGMENT => {
                Some(Self::Detail {
                    id: RecordId::Assigned(*id),
                })
            }
            _ => None,
        }
    }
}
