//! In-memory NTAG21x and reader, used by the host build and the tests.
//!
//! The frontend and its [`SimTagHandle`] share one state cell. The handle
//! places and removes tags and injects faults; the frontend serves the
//! engine. Pages past the tag's readable limit NAK like the real part does
//! once the user area ends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::bus::{RecoveryLines, pulse_recovery};
use super::frontend::{BusError, NfcFrontend, Uid};
use super::layout::{CC_MAGIC, CC_PAGE, FIRST_USER_PAGE, PAGE_SIZE, TagFamily};
use super::ndef;
use crate::error::Result;

/// Default 7-byte NTAG UID.
pub const DEFAULT_UID: [u8; 7] = [0x04, 0x5A, 0x21, 0x6C, 0x3B, 0x70, 0x80];

/// Firmware word a PN532 v1.6 reports.
pub const SIM_FIRMWARE: u32 = 0x3201_0607;

#[derive(Debug, Clone)]
pub struct SimTag {
    uid: Vec<u8>,
    pages: Vec<[u8; 4]>,
    readable_limit: u8,
}

impl SimTag {
    /// Factory-fresh tag of the given family.
    pub fn new(family: TagFamily) -> Self {
        let total = family.total_pages().max(usize::from(CC_PAGE) + 1);
        let mut pages = vec![[0u8; 4]; total];
        pages[0] = [DEFAULT_UID[0], DEFAULT_UID[1], DEFAULT_UID[2], 0x88];
        pages[1] = [DEFAULT_UID[3], DEFAULT_UID[4], DEFAULT_UID[5], DEFAULT_UID[6]];
        pages[usize::from(CC_PAGE)] = [CC_MAGIC, 0x10, family.cc_size_byte(), 0x00];
        Self {
            uid: DEFAULT_UID.to_vec(),
            pages,
            readable_limit: family.last_user_page().unwrap_or(CC_PAGE),
        }
    }

    pub fn with_uid(mut self, uid: &[u8]) -> Self {
        self.uid = uid.to_vec();
        self
    }

    /// Pages above `page` NAK (a damaged or smaller-than-declared tag).
    pub fn with_readable_limit(mut self, page: u8) -> Self {
        self.readable_limit = page;
        self
    }

    /// Overwrite the capability container size byte.
    pub fn with_cc_size(mut self, size_byte: u8) -> Self {
        self.pages[usize::from(CC_PAGE)][2] = size_byte;
        self
    }

    /// Store raw bytes at the start of the user area.
    pub fn with_user_bytes(mut self, bytes: &[u8]) -> Self {
        for (index, chunk) in bytes.chunks(PAGE_SIZE).enumerate() {
            let page = usize::from(FIRST_USER_PAGE) + index;
            if let Some(slot) = self.pages.get_mut(page) {
                slot[..chunk.len()].copy_from_slice(chunk);
            }
        }
        self
    }

    /// Store an encoded JSON message.
    pub fn with_json(self, json: &str) -> Result<Self> {
        let tlv = ndef::encode(json)?;
        Ok(self.with_user_bytes(&tlv))
    }

    fn readable(&self, page: u8) -> bool {
        page <= self.readable_limit && usize::from(page) < self.pages.len()
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_reads: u32,
    corrupt_reads: u32,
    fail_writes: u32,
    corrupt_writes: u32,
    remove_after_failed_read: bool,
    stall: Option<Duration>,
}

#[derive(Debug)]
struct SimState {
    tag: Option<SimTag>,
    firmware: Option<u32>,
    faults: Faults,
    reads: u32,
    writes: u32,
    recoveries: u32,
    clock_pulses: u32,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bus lines of the simulated reader; only the clock is observable.
#[derive(Default)]
struct SimLines {
    data_released: bool,
    pulses: u32,
}

impl RecoveryLines for SimLines {
    fn release_data(&mut self) {
        self.data_released = true;
    }

    fn drive_clock(&mut self, high: bool) {
        if !high && self.data_released {
            self.pulses += 1;
        }
    }

    fn release_clock(&mut self) {}
}

/// Simulated reader.
pub struct SimFrontend {
    state: Shared,
}

impl SimFrontend {
    pub fn new() -> (Self, SimTagHandle) {
        let state = Arc::new(Mutex::new(SimState {
            tag: None,
            firmware: Some(SIM_FIRMWARE),
            faults: Faults::default(),
            reads: 0,
            writes: 0,
            recoveries: 0,
            clock_pulses: 0,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimTagHandle { state },
        )
    }

    fn take_stall(&self) -> Option<Duration> {
        lock(&self.state).faults.stall.take()
    }
}

impl NfcFrontend for SimFrontend {
    async fn firmware_version(&mut self) -> std::result::Result<u32, BusError> {
        lock(&self.state).firmware.ok_or(BusError::Timeout)
    }

    async fn detect(&mut self, timeout: Duration) -> std::result::Result<Option<Uid>, BusError> {
        if let Some(stall) = self.take_stall() {
            tokio::time::sleep(stall).await;
        }
        let uid = lock(&self.state).tag.as_ref().map(|tag| Uid::new(&tag.uid));
        if uid.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(uid)
    }

    async fn read_page(&mut self, page: u8) -> std::result::Result<[u8; 4], BusError> {
        if let Some(stall) = self.take_stall() {
            tokio::time::sleep(stall).await;
        }
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.reads += 1;
        let faults = &mut state.faults;
        if faults.fail_reads > 0 {
            faults.fail_reads -= 1;
            if faults.remove_after_failed_read {
                faults.remove_after_failed_read = false;
                state.tag = None;
            }
            return Err(BusError::Nak);
        }
        let corrupt = if faults.corrupt_reads > 0 {
            faults.corrupt_reads -= 1;
            true
        } else {
            false
        };
        let tag = state.tag.as_ref().ok_or(BusError::Nak)?;
        if !tag.readable(page) {
            return Err(BusError::Nak);
        }
        let mut data = tag.pages[usize::from(page)];
        if corrupt {
            data[0] ^= 0xFF;
        }
        Ok(data)
    }

    async fn write_page(&mut self, page: u8, data: [u8; 4]) -> std::result::Result<(), BusError> {
        if let Some(stall) = self.take_stall() {
            tokio::time::sleep(stall).await;
        }
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.writes += 1;
        if state.faults.fail_writes > 0 {
            state.faults.fail_writes -= 1;
            return Err(BusError::Nak);
        }
        let mut stored = data;
        if state.faults.corrupt_writes > 0 {
            state.faults.corrupt_writes -= 1;
            stored[0] ^= 0xFF;
        }
        let tag = state.tag.as_mut().ok_or(BusError::Nak)?;
        if page < FIRST_USER_PAGE || !tag.readable(page) {
            return Err(BusError::Nak);
        }
        tag.pages[usize::from(page)] = stored;
        Ok(())
    }

    async fn recover_bus(&mut self) {
        let mut lines = SimLines::default();
        pulse_recovery(&mut lines).await;
        let mut state = lock(&self.state);
        state.recoveries += 1;
        state.clock_pulses += lines.pulses;
    }
}

/// Test and operator control over the simulated field.
#[derive(Clone)]
pub struct SimTagHandle {
    state: Shared,
}

impl SimTagHandle {
    pub fn place(&self, tag: SimTag) {
        lock(&self.state).tag = Some(tag);
    }

    pub fn remove(&self) {
        lock(&self.state).tag = None;
    }

    pub fn is_present(&self) -> bool {
        lock(&self.state).tag.is_some()
    }

    /// Make the reader stop answering the version query.
    pub fn disconnect_reader(&self) {
        lock(&self.state).firmware = None;
    }

    pub fn page(&self, page: u8) -> Option<[u8; 4]> {
        let state = lock(&self.state);
        state
            .tag
            .as_ref()
            .and_then(|tag| tag.pages.get(usize::from(page)).copied())
    }

    /// User-area contents of the present tag.
    pub fn user_bytes(&self) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        let tag = state.tag.as_ref()?;
        let end = (usize::from(tag.readable_limit) + 1).min(tag.pages.len());
        Some(
            tag.pages[usize::from(FIRST_USER_PAGE)..end]
                .iter()
                .flatten()
                .copied()
                .collect(),
        )
    }

    pub fn fail_next_reads(&self, count: u32) {
        lock(&self.state).faults.fail_reads = count;
    }

    pub fn corrupt_next_reads(&self, count: u32) {
        lock(&self.state).faults.corrupt_reads = count;
    }

    pub fn fail_next_writes(&self, count: u32) {
        lock(&self.state).faults.fail_writes = count;
    }

    pub fn corrupt_next_writes(&self, count: u32) {
        lock(&self.state).faults.corrupt_writes = count;
    }

    /// The next injected read failure also takes the tag out of the field.
    pub fn remove_after_failed_read(&self) {
        lock(&self.state).faults.remove_after_failed_read = true;
    }

    /// Delay the next transfer by `duration`.
    pub fn stall_next(&self, duration: Duration) {
        lock(&self.state).faults.stall = Some(duration);
    }

    pub fn reads(&self) -> u32 {
        lock(&self.state).reads
    }

    pub fn writes(&self) -> u32 {
        lock(&self.state).writes
    }

    pub fn recoveries(&self) -> u32 {
        lock(&self.state).recoveries
    }

    /// SCL pulses seen across all recoveries.
    pub fn clock_pulses(&self) -> u32 {
        lock(&self.state).clock_pulses
    }
}
