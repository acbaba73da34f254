/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A resolved or mapped record: field name -> value.
pub type Record = serde_json::Map<String, serde_json::Value>;
