use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Input is empty: {0}")]
    EmptyInput(String),

    #[error("Could not find a header row of period labels (expected a row of month or date columns)")]
    HeaderNotFound,

    #[error("Row {row} ('{account}') has {found} value columns but the header defines {expected}")]
    RowLengthMismatch {
        row: usize,
        account: String,
        expected: usize,
        found: usize,
    },

    #[error("Row {row}, column {column}: '{value}' is not a valid amount")]
    InvalidNumber {
        row: usize,
        column: usize,
        value: String,
    },

    #[error("Row {row}: account '{name}' appears more than once in section {section}")]
    DuplicateAccount {
        row: usize,
        name: String,
        section: String,
    },

    #[error("Row {row}: account '{name}' is not inside an Income, COGS, Expense or Other section")]
    AccountOutsideSection { row: usize, name: String },

    #[error("Input exceeds the configured {kind} limit: {actual} > {limit}")]
    InputTooLarge {
        kind: String,
        limit: usize,
        actual: usize,
    },

    #[error("{table} is missing a required '{column}' column")]
    MissingColumn { table: String, column: String },

    #[error("Row {row}: '{value}' is not a recognised date")]
    InvalidDate { row: usize, value: String },

    #[error("Invalid configuration for {field}: {details}")]
    InvalidConfig { field: String, details: String },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "excel")]
    #[error("Excel error: {0}")]
    Excel(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl InsightError {
    /// True for errors raised while turning an export into rows or a model.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput(_)
                | Self::HeaderNotFound
                | Self::RowLengthMismatch { .. }
                | Self::InvalidNumber { .. }
                | Self::DuplicateAccount { .. }
                | Self::AccountOutsideSection { .. }
                | Self::InputTooLarge { .. }
                | Self::MissingColumn { .. }
                | Self::InvalidDate { .. }
        )
    }

    /// The 1-based source row the error points at, when there is one.
    pub fn row(&self) -> Option<usize> {
        match self {
            Self::RowLengthMismatch { row, .. }
            | Self::InvalidNumber { row, .. }
            | Self::DuplicateAccount { row, .. }
            | Self::AccountOutsideSection { row, .. }
            | Self::InvalidDate { row, .. } => Some(*row),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_length_message_names_row_and_account() {
        let err = InsightError::RowLengthMismatch {
            row: 9,
            account: "Utilities".to_string(),
            expected: 13,
            found: 12,
        };
        let message = err.to_string();
        assert!(message.contains("Row 9"));
        assert!(message.contains("Utilities"));
        assert!(err.is_parse_error());
        assert_eq!(err.row(), Some(9));
    }

    #[test]
    fn test_config_error_is_not_a_parse_error() {
        let err = InsightError::InvalidConfig {
            field: "variance.pct_threshold".to_string(),
            details: "must be positive".to_string(),
        };
        assert!(!err.is_parse_error());
        assert_eq!(err.row(), None);
    }
}
