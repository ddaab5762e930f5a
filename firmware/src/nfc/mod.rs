//! Contactless tag engine for NTAG213/215/216 spool tags.
//!
//! Layers, bottom up:
//!
//! - [`frontend`]: the reader hardware trait (PN532-class, I2C)
//! - [`bus`]: manual I2C un-wedge sequence
//! - [`tag_io`]: paged read/write with retries, verification and bus recovery
//! - [`capacity`]: memory family detection by boundary probing
//! - [`ndef`]: TLV/NDEF framing of the JSON payload
//! - [`fast_path`]: spool-id lookup in the first user pages
//! - [`reader`]: session state machine, scan loop and write task
//!
//! [`sim`] provides an in-memory tag and reader for the host build.

pub mod bus;
pub mod capacity;
pub mod fast_path;
pub mod frontend;
pub mod layout;
pub mod ndef;
pub mod reader;
pub mod sim;
pub mod tag_io;

pub use frontend::{BusError, NfcFrontend, Uid};
pub use layout::{MemoryLayout, TagFamily};
pub use reader::{Admission, ReaderSnapshot, ReaderState, ReaderStateMachine, SessionHandle};
pub use tag_io::TagIo;
