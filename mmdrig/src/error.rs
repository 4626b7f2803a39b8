use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unexpected end of input at offset {offset}: need {needed} bytes, {remaining} left")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("unsupported format: {message}")]
    UnsupportedFormat { message: String },

    #[error("{field} index {index} is out of range (len={len})")]
    ReferentialIntegrity {
        field: &'static str,
        index: i64,
        len: usize,
    },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },
}

impl Error {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}
