use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid frame length {0}")]
    InvalidFrameLength(i32),

    #[error("VarInt too big")]
    VarIntTooBig,

    #[error("string too long: {length} > {max}")]
    StringTooLong { length: usize, max: usize },

    #[error("property map too large: {count} > {max}")]
    PropertyMapTooLarge { count: usize, max: usize },

    #[error("unexpected end of buffer reading {what}: need {needed}, have {remaining}")]
    UnexpectedEof {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("negative length {length} for {what}")]
    NegativeLength { what: &'static str, length: i32 },

    #[error("invalid UTF-8 in string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("invalid {what} ordinal {value}")]
    InvalidOrdinal { what: &'static str, value: i64 },

    #[error("compression failure: {0}")]
    Compression(#[from] snap::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Fatal errors close the connection; the rest are answered with an error report.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooLarge { .. }
                | ProtocolError::InvalidFrameLength(_)
                | ProtocolError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
