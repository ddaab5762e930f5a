//! Reader hardware abstraction.
//!
//! A frontend exposes the four primitives the tag engine needs from a
//! PN532-class reader: a presence probe, single page read and write, and a
//! bus un-wedge. Each call is one transfer; retries, verification and
//! timeouts are layered on top by [`super::TagIo`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Transfer-level failures reported by a frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The reader did not answer in time.
    Timeout,
    /// The tag did not acknowledge the command (page out of range, tag gone).
    Nak,
    /// Anything else the transport reports.
    Io(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Timeout => write!(f, "timeout"),
            BusError::Nak => write!(f, "nak"),
            BusError::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

/// Raw tag identifier (4, 7 or 10 bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uid(Vec<u8>);

impl Uid {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// NTAG21x tags carry a 7-byte UID.
    pub fn is_ntag(&self) -> bool {
        self.0.len() == 7
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Reader hardware driven by the tag engine.
pub trait NfcFrontend: Send + 'static {
    /// Chip and firmware version; `Err` when the board does not answer.
    fn firmware_version(&mut self) -> impl Future<Output = Result<u32, BusError>> + Send;

    /// Look for a tag in the field for at most `timeout`.
    fn detect(&mut self, timeout: Duration) -> impl Future<Output = Result<Option<Uid>, BusError>> + Send;

    /// Read one 4-byte page.
    fn read_page(&mut self, page: u8) -> impl Future<Output = Result<[u8; 4], BusError>> + Send;

    /// Write one 4-byte page.
    fn write_page(&mut self, page: u8, data: [u8; 4]) -> impl Future<Output = Result<(), BusError>> + Send;

    /// Best-effort bus un-wedge (see [`super::bus::pulse_recovery`]).
    fn recover_bus(&mut self) -> impl Future<Output = ()> + Send;
}
