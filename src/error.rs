use thiserror::Error;

/// Failure converting a slice of payload bytes into a typed value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid date/time bytes {0:02x?}")]
    Date(Vec<u8>),

    #[error("invalid utf-8 in text field: {0}")]
    Text(#[from] std::str::Utf8Error),

    #[error("numeric field width must be 1..=16 bytes, got {len}")]
    Width { len: usize },

    #[error("field at offset {offset} length {length} runs past payload end ({available} bytes)")]
    OutOfRange {
        offset: usize,
        length: usize,
        available: usize,
    },
}

/// Why a single frame could not be turned into a record.
///
/// Every variant is scoped to one frame; the proxy logs it and carries on
/// forwarding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    ShortFrame { len: usize },

    #[error("invalid payload size: header says {declared}, frame carries {actual}")]
    InvalidPayloadSize { declared: usize, actual: usize },

    #[error("invalid CRC: calculated {expected:#06x}, frame carries {received:#06x}")]
    InvalidCrc { expected: u16, received: u16 },

    #[error("unknown protocol version {0:#06x}")]
    UnknownProtocol(u16),

    #[error("unknown message type {0:#06x}")]
    UnknownMessageType(u16),

    #[error("no matching record layout found for {layout}")]
    NoValidRecord { layout: String },

    #[error("failed to decode field {field}: {source}")]
    Field {
        field: String,
        #[source]
        source: DecodeError,
    },
}

/// Rejections raised while loading the layout catalog.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("error reading layout {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing layout {path}: {message}")]
    Parse { path: String, message: String },

    #[error("layout {layout}: field {field}: {reason}")]
    InvalidField {
        layout: String,
        field: String,
        reason: String,
    },

    #[error("layout {0} defined more than once")]
    Duplicate(String),
}
