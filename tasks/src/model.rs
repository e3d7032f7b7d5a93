use chrono::{DateTime, Utc};
use serde_json::Value;

use backend::store::{DocId, Document, Fields};

pub type TaskId = DocId;

/// Field names stamped by the client. Caller-supplied values under these
/// keys are ignored on create and update.
pub const OWNER_ID_FIELD: &str = "owner_id";
pub const CREATED_AT_FIELD: &str = "created_at";
pub const UPDATED_AT_FIELD: &str = "updated_at";

pub const RESERVED_FIELDS: [&str; 3] = [OWNER_ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// User-owned task record.
///
/// `fields` holds the caller-supplied payload; ownership and timestamps
/// are lifted out of the document into typed form.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: Fields,
}

impl Task {
    /// Lift a stored document into a `Task`. Returns `None` when the
    /// system-stamped fields are missing or malformed.
    pub fn from_document(doc: Document) -> Option<Self> {
        let mut fields = doc.fields;

        let owner_id = match fields.remove(OWNER_ID_FIELD)? {
            Value::String(s) => s,
            _ => return None,
        };
        let created_at = timestamp(fields.remove(CREATED_AT_FIELD)?)?;
        let updated_at = timestamp(fields.remove(UPDATED_AT_FIELD)?)?;

        Some(Self {
            id: doc.id,
            owner_id,
            created_at,
            updated_at,
            fields,
        })
    }
}

/// Timestamps are stored as unix-epoch microseconds.
fn timestamp(value: Value) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value.as_i64()?)
}
