use crate::boxes::FourCC;

/// Coarse classification of [`Error`] values.
///
/// Consumers mostly care about one distinction: an unsupported version can be
/// skipped, everything else aborts the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Alignment,
    Overrun,
    UnsupportedVersion,
    Structure,
    Schema,
    Data,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of data")]
    EndOfData,

    #[error("bit cursor is not byte-aligned")]
    Alignment,

    #[error("overrun in '{box_type}': payload holds {limit_bits} bits, fields need {needed_bits}")]
    Overrun {
        box_type: FourCC,
        limit_bits: u64,
        needed_bits: u64,
    },

    #[error("unsupported version {version} for box '{box_type}'")]
    UnsupportedVersion { box_type: FourCC, version: u8 },

    #[error("unsupported box type '{0}'")]
    UnsupportedType(FourCC),

    #[error("invalid box size {size} at offset {offset}")]
    InvalidSize { offset: u64, size: u64 },

    #[error("structure: {0}")]
    Structure(String),

    #[error("schema: {0}")]
    Schema(String),

    #[error("no resolver for dynamic field '{field}'")]
    UnresolvedField { field: String },

    #[error("field '{field}': {reason}")]
    FieldValue { field: String, reason: String },

    #[error("varint exceeds {max_groups} groups or overflows u64")]
    VarintTooLong { max_groups: usize },

    #[error("header of '{box_type}' changed from {provisional} to {actual} bytes on rewrite")]
    HeaderSizeChanged {
        box_type: FourCC,
        provisional: u64,
        actual: u64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Alignment => ErrorKind::Alignment,
            Error::Overrun { .. } => ErrorKind::Overrun,
            Error::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Error::UnsupportedType(_) | Error::InvalidSize { .. } | Error::Structure(_) => {
                ErrorKind::Structure
            }
            Error::Schema(_) | Error::UnresolvedField { .. } | Error::HeaderSizeChanged { .. } => {
                ErrorKind::Schema
            }
            Error::EndOfData | Error::FieldValue { .. } | Error::VarintTooLong { .. } => {
                ErrorKind::Data
            }
        }
    }

    /// Only an unsupported box version lets a caller skip the box and carry on
    /// with its siblings.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::UnsupportedVersion
    }

    pub(crate) fn field(field: &str, reason: impl Into<String>) -> Self {
        Error::FieldValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// End-of-file from the underlying reader becomes [`Error::EndOfData`].
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::EndOfData
        } else {
            Error::Io(err)
        }
    }
}
