//! Domain types shared by the erp-sync cache engine: structural cache keys,
//! record identifiers, cached value shapes and typed entity contracts.

/// Entity and typed patch contracts.
pub mod entity;
/// Transport error taxonomy.
pub mod error;
/// Identifier types.
pub mod id;
/// Structural cache keys.
pub mod key;
/// Production planning schedules.
pub mod planning;
/// SQL report schedules.
pub mod report;
/// Cached value shapes.
pub mod value;

pub use entity::{Entity, FieldPatch};
pub use error::{ErrorPayload, TransportError};
pub use id::{MutationId, RecordId, TemporaryIds};
pub use key::{CacheKey, KeyPart, KeyShape, ResourceKeys, key_matches_prefix, key_of, keys_equal};
pub use planning::{PlanningSchedule, PlanningSchedulePatch};
pub use report::{ReportSchedule, ReportSchedulePatch};
pub use value::{CacheValue, Row};
