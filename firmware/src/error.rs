//! Error types for the tag engine and the scale.
//!
//! Low-level bus failures are retried inside [`crate::nfc::TagIo`] and only
//! surface here once the attempt budget is spent. Protocol-level failures
//! (malformed NDEF, bad JSON, unknown family) are never retried.

/// Result type alias for tag operations.
pub type Result<T> = std::result::Result<T, TagError>;

/// Failures of the contactless-tag engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// Presence probe found no tag.
    #[error("no tag present")]
    TagAbsent,

    /// Tag was present but vanished during a multi-step operation.
    #[error("tag removed during operation")]
    TagRemovedMidOperation,

    /// A bus transfer overran its timeout; bus recovery was attempted.
    #[error("bus timeout after {elapsed_ms}ms")]
    BusTimeout { elapsed_ms: u64 },

    /// Page read failed after every retry.
    #[error("failed to read page {page}")]
    ReadFailed { page: u8 },

    /// Page write failed after every retry.
    #[error("failed to write page {page}")]
    WriteFailed { page: u8 },

    /// Capacity probe could not classify the tag, even with fallbacks.
    #[error("unknown tag family")]
    UnknownTagFamily,

    /// Tag is not an NTAG21x (UID is not 7 bytes).
    #[error("unsupported tag (uid length {uid_len})")]
    UnsupportedTag { uid_len: usize },

    /// Payload does not fit the short-record length field.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Encoded message does not fit the tag's user area.
    #[error("message needs {needed} bytes, tag has {available}")]
    CapacityExceeded { needed: usize, available: usize },

    /// Structurally invalid NDEF data.
    #[error("malformed NDEF: {reason}")]
    MalformedNdef { reason: &'static str },

    /// No NDEF TLV tag in the scanned window.
    #[error("no NDEF TLV found")]
    NoTlvFound,

    /// Record payload extends past the declared TLV length.
    #[error("payload ends at {end}, TLV declares {tlv_len} bytes")]
    PayloadOverrun { end: usize, tlv_len: usize },

    /// Payload decoded but is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    JsonParseError(String),

    /// Page was written but the read-back differs.
    #[error("verify mismatch on page {page} at byte {index}: wrote {expected:#04x}, read {actual:#04x}")]
    WriteVerifyMismatch {
        page: u8,
        index: usize,
        expected: u8,
        actual: u8,
    },

    /// Another read or write is in flight.
    #[error("NFC busy")]
    Busy,

    /// Location tag scanned with no spool seen before it.
    #[error("location tag without a previously scanned spool")]
    NoPriorSpool,

    /// Reader hardware did not answer at start-up.
    #[error("no NFC reader found")]
    ReaderNotFound,

    /// The spool database refused an update.
    #[error("spool database rejected {0}")]
    Rejected(&'static str),
}

impl TagError {
    /// Short text for the device display.
    pub fn display_text(&self) -> &'static str {
        match self {
            TagError::TagAbsent => "No tag",
            TagError::TagRemovedMidOperation => "Tag removed",
            TagError::BusTimeout { .. } | TagError::ReadFailed { .. } => "Tag read error",
            TagError::WriteFailed { .. } | TagError::WriteVerifyMismatch { .. } => "Write failed",
            TagError::UnknownTagFamily | TagError::UnsupportedTag { .. } => "Unknown tag type",
            TagError::PayloadTooLarge { .. } | TagError::CapacityExceeded { .. } => "Too much data",
            TagError::MalformedNdef { .. }
            | TagError::NoTlvFound
            | TagError::PayloadOverrun { .. }
            | TagError::JsonParseError(_) => "Unknown tag",
            TagError::Busy => "NFC busy!",
            TagError::NoPriorSpool => "Scan spool first",
            TagError::ReaderNotFound => "No RFID Board found",
            TagError::Rejected(_) => "Failed",
        }
    }
}

/// Failures of the weight side.
#[derive(Debug, thiserror::Error)]
pub enum ScaleError {
    /// Load-cell amplifier did not become ready.
    #[error("load cell not found")]
    SensorNotFound,

    /// Calibration produced a non-positive factor.
    #[error("invalid calibration factor {factor}")]
    InvalidCalibration { factor: f32 },

    /// Settings store failed.
    #[error("settings store: {0}")]
    Settings(#[from] anyhow::Error),
}
