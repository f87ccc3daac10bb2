//! Crate-wide error type and the non-fatal warning channel.
//!
//! Configuration errors ([`CsvTapeError::InvalidSource`],
//! [`CsvTapeError::InvalidDelimiter`], [`CsvTapeError::InvalidType`],
//! [`CsvTapeError::HeaderAfterData`]) are raised before any parsing
//! begins. [`CsvTapeError::InvalidQuotedField`] aborts the parse in
//! progress. [`CsvTapeError::StrictParseError`] only aborts in strict
//! mode. [`ParseWarning`]s never abort — see the warning channel below.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CsvTapeError>;

#[derive(Debug, Error)]
pub enum CsvTapeError {
    #[error("source is not readable: {0}")]
    InvalidSource(String),

    #[error("invalid delimiter: {0}")]
    InvalidDelimiter(String),

    #[error("unsupported type: {0}")]
    InvalidType(String),

    #[error("header row {header} is not before data row {data}")]
    HeaderAfterData { header: usize, data: usize },

    #[error("unterminated quoted field at byte {byte_pos} (row {row}, column {col})")]
    InvalidQuotedField {
        row: usize,
        col: usize,
        byte_pos: usize,
    },

    #[error(
        "strict mode: column {col} (row {row}) failed to parse as the pinned type at byte {byte_pos}"
    )]
    StrictParseError {
        row: usize,
        col: usize,
        byte_pos: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A non-fatal condition encountered while scanning a row. Collected on
/// the returned [`crate::file::File`] and, unless `silence_warnings` is
/// set, also logged through the `log` crate as the parse proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarning {
    /// A row had fewer fields than the column count; the remaining
    /// columns were filled with missing values for that row.
    TooFewFields {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// A row had more fields than the column count; the extras were
    /// discarded and the row was advanced to its terminator.
    TooManyFields {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// A non-strict parse failure was coerced to missing.
    CoercedToMissing { row: usize, col: usize },
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseWarning::TooFewFields {
                row,
                expected,
                found,
            } => write!(
                f,
                "row {row}: expected {expected} fields, found {found}; filling remainder with missing"
            ),
            ParseWarning::TooManyFields {
                row,
                expected,
                found,
            } => write!(
                f,
                "row {row}: expected {expected} fields, found {found}; discarding extras"
            ),
            ParseWarning::CoercedToMissing { row, col } => {
                write!(f, "row {row}, column {col}: failed to parse, coerced to missing")
            }
        }
    }
}

/// Appends `warning` to `sink` and, unless `silence`, logs it.
pub(crate) fn emit_warning(sink: &mut Vec<ParseWarning>, silence: bool, warning: ParseWarning) {
    if !silence {
        log::warn!("{warning}");
    }
    sink.push(warning);
}
