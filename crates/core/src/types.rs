/// Viewer session identifiers are opaque UUID strings.
pub type SessionId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
