//! Error types for chronas-core
//!
//! Every failure the core can report is a variant here. None of the core's
//! own logic retries; retrying belongs to the store collaborator.

/// Main error type for ledger, link graph and aggregation operations
#[derive(Debug, thiserror::Error)]
pub enum ChronasError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A range key such as `"1850-18x0"` could not be parsed.
    /// Unpacking treats it as empty; only `parse_range_key` surfaces it.
    #[error("Malformed range key: {0}")]
    MalformedRange(String),

    #[error("Duplicate year {0} in year map")]
    DuplicateYear(i32),

    /// One side of an edge was persisted, the other was not.
    /// The graph is left asymmetric until repaired explicitly.
    #[error("Asymmetric link write: '{written}' persisted but '{failed}' failed: {reason}")]
    AsymmetricLinkWrite {
        written: String,
        failed: String,
        reason: String,
    },

    /// The aggregation cursor failed mid-stream. Derived records already
    /// written stay in place.
    #[error("Aggregation stream aborted after year {last_year:?} ({records_written} records written): {reason}")]
    StreamAbort {
        last_year: Option<i32>,
        records_written: usize,
        reason: String,
    },

    /// A multi-year edit was recorded as `revision_id` but stopped applying
    /// at `failed_year`. Reverting the revision restores every year.
    #[error("Bulk edit '{revision_id}' stopped at year {failed_year} (last applied {last_applied:?}): {reason}")]
    PartialBulkApply {
        revision_id: String,
        last_applied: Option<i32>,
        failed_year: i32,
        reason: String,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChronasError {
    /// Short machine-readable name, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::MalformedRange(_) => "malformed_range",
            Self::DuplicateYear(_) => "duplicate_year",
            Self::AsymmetricLinkWrite { .. } => "asymmetric_link_write",
            Self::StreamAbort { .. } => "stream_abort",
            Self::PartialBulkApply { .. } => "partial_bulk_apply",
            Self::BadRequest(_) => "bad_request",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
            Self::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for ChronasError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<mongodb::error::Error> for ChronasError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for ChronasError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON serialization failed: {}", err))
    }
}

impl From<bson::de::Error> for ChronasError {
    fn from(err: bson::de::Error) -> Self {
        Self::Database(format!("BSON deserialization failed: {}", err))
    }
}

impl From<tokio::task::JoinError> for ChronasError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Background task failed: {}", err))
    }
}

/// Result type alias for chronas-core operations
pub type Result<T> = std::result::Result<T, ChronasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(ChronasError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(ChronasError::DuplicateYear(1850).kind(), "duplicate_year");
        let err = ChronasError::StreamAbort {
            last_year: Some(1850),
            records_written: 2,
            reason: "cursor closed".into(),
        };
        assert_eq!(err.kind(), "stream_abort");
        assert!(err.to_string().contains("1850"));

        let err = ChronasError::PartialBulkApply {
            revision_id: "r-1".into(),
            last_applied: Some(1851),
            failed_year: 1852,
            reason: "write refused".into(),
        };
        assert_eq!(err.kind(), "partial_bulk_apply");
        assert!(err.to_string().contains("r-1"));

        let err = ChronasError::Config("BLOCKING_YEAR_SPAN must be at least 1".into());
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_json_error_maps_to_bad_request() {
        let err: ChronasError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ChronasError::BadRequest(_)));
    }
}
