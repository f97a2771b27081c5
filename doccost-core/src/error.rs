//! Error types for DocCost

use thiserror::Error;

/// Result type alias for DocCost operations
pub type Result<T> = std::result::Result<T, CostError>;

/// DocCost error types
#[derive(Error, Debug)]
pub enum CostError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// User supplied value rejected at the input boundary
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    /// Schema document could not be interpreted
    #[error("Invalid schema for '{collection}': {reason}")]
    InvalidSchema { collection: String, reason: String },

    /// Database not found in the catalog
    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    /// Collection not found in a database
    #[error("Collection '{collection}' not found in database '{database}'")]
    CollectionNotFound { database: String, collection: String },

    /// Key used by a query is not a property of the collection
    #[error("{role} key '{key}' is not a property of collection '{collection}'. Available properties: {available}")]
    UnknownKey {
        role: KeyRole,
        key: String,
        collection: String,
        available: String,
    },

    /// Sharding enabled without a key
    #[error("Sharding key must be provided when sharding is enabled for collection '{0}'")]
    MissingShardingKey(String),

    /// Settings lack a number needed by a formula
    #[error("Missing statistic: {0}")]
    MissingStatistic(String),

    /// A size or count left the representable range
    #[error("Arithmetic overflow while computing {0}")]
    Overflow(&'static str),
}

/// What a key is used for in a query, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Output,
    Filter,
    Join,
    GroupBy,
    Aggregate,
    Sharding,
}

impl std::fmt::Display for KeyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyRole::Output => "Output",
            KeyRole::Filter => "Filter",
            KeyRole::Join => "Join",
            KeyRole::GroupBy => "Group by",
            KeyRole::Aggregate => "Aggregate",
            KeyRole::Sharding => "Sharding",
        };
        f.write_str(name)
    }
}

impl CostError {
    /// Shorthand for an input-validation failure
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CostError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error was caused by the caller's parameters
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CostError::InvalidInput { .. }
                | CostError::UnknownKey { .. }
                | CostError::MissingShardingKey(_)
                | CostError::MissingStatistic(_)
                | CostError::Overflow(_)
        )
    }

    /// Check if the error refers to something absent from the catalog
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CostError::DatabaseNotFound(_) | CostError::CollectionNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_message() {
        let err = CostError::UnknownKey {
            role: KeyRole::GroupBy,
            key: "foo".into(),
            collection: "Stock".into(),
            available: "IDP, IDW".into(),
        };
        assert_eq!(
            err.to_string(),
            "Group by key 'foo' is not a property of collection 'Stock'. Available properties: IDP, IDW"
        );
        assert!(err.is_user_error());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(CostError::DatabaseNotFound("db9".into()).is_not_found());
        assert!(!CostError::invalid_input("servers", "must be at least 1").is_not_found());
    }
}
