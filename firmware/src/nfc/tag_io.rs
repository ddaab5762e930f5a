//! Paged tag access with bounded retries.
//!
//! Every primitive takes the frontend lock for exactly one transfer, so a
//! write task and the scan loop interleave at page granularity. Which of
//! them owns tag *semantics* is decided by the session's
//! `write_in_progress` flag, not by this lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::frontend::{NfcFrontend, Uid};
use super::layout::{CC_PAGE, MemoryLayout, PAGE_SIZE};
use crate::error::{Result, TagError};

/// Hardware read plus two retries.
pub const READ_ATTEMPTS: u32 = 3;
pub const READ_SETTLE: Duration = Duration::from_millis(25);
/// Presence re-check between read retries.
pub const PRESENCE_RECHECK: Duration = Duration::from_millis(100);

pub const WRITE_ATTEMPTS: u32 = 3;
pub const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);
pub const VERIFY_SETTLE: Duration = Duration::from_millis(20);
pub const VERIFY_ATTEMPTS: u32 = 3;
pub const VERIFY_RETRY_DELAY: Duration = Duration::from_millis(30);
/// Gap between consecutive page writes of one message.
pub const PAGE_GAP: Duration = Duration::from_millis(10);

pub const POST_WRITE_SETTLE: Duration = Duration::from_millis(300);
pub const STABILITY_CHECKS: u32 = 5;
pub const STABILITY_INTERVAL: Duration = Duration::from_millis(200);
pub const STABILITY_PROBE: Duration = Duration::from_millis(1000);

/// Nominal budget of one page transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(100);
/// Overrun beyond the budget that counts as a wedged bus.
pub const RECOVERY_MARGIN: Duration = Duration::from_millis(50);
/// Transfers are abandoned after this long regardless of the budget.
pub const HARD_CEILING: Duration = Duration::from_secs(1);

/// Retrying page I/O over a shared frontend.
pub struct TagIo<F> {
    frontend: Arc<Mutex<F>>,
}

impl<F> Clone for TagIo<F> {
    fn clone(&self) -> Self {
        Self {
            frontend: Arc::clone(&self.frontend),
        }
    }
}

impl<F: NfcFrontend> TagIo<F> {
    pub fn new(frontend: F) -> Self {
        Self {
            frontend: Arc::new(Mutex::new(frontend)),
        }
    }

    /// Reader chip version, or [`TagError::ReaderNotFound`].
    pub async fn firmware_version(&self) -> Result<u32> {
        let mut fe = self.frontend.lock().await;
        match timeout(HARD_CEILING, fe.firmware_version()).await {
            Ok(Ok(version)) => Ok(version),
            Ok(Err(e)) => {
                warn!(error = %e, "reader did not report a firmware version");
                Err(TagError::ReaderNotFound)
            }
            Err(_) => Err(TagError::ReaderNotFound),
        }
    }

    pub async fn recover_bus(&self) {
        self.frontend.lock().await.recover_bus().await;
    }

    /// Presence probe.
    ///
    /// Transport errors read as "no tag"; only a probe that hits the hard
    /// ceiling is reported as [`TagError::BusTimeout`].
    pub async fn detect(&self, wait: Duration) -> Result<Option<Uid>> {
        let mut fe = self.frontend.lock().await;
        let started = Instant::now();
        let outcome = timeout(wait + HARD_CEILING, fe.detect(wait)).await;
        recover_if_overrun(&mut *fe, started, wait).await;
        match outcome {
            Ok(Ok(uid)) => Ok(uid),
            Ok(Err(e)) => {
                debug!(error = %e, "presence probe failed");
                Ok(None)
            }
            Err(_) => Err(TagError::BusTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    pub async fn is_present(&self, wait: Duration) -> bool {
        matches!(self.detect(wait).await, Ok(Some(_)))
    }

    /// One read attempt, no retry. Used where a failure carries meaning.
    pub async fn try_read_page(&self, page: u8) -> Result<[u8; 4]> {
        let mut fe = self.frontend.lock().await;
        let started = Instant::now();
        let outcome = timeout(HARD_CEILING, fe.read_page(page)).await;
        recover_if_overrun(&mut *fe, started, TRANSFER_TIMEOUT).await;
        match outcome {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => {
                debug!(page, error = %e, "page read failed");
                Err(TagError::ReadFailed { page })
            }
            Err(_) => Err(TagError::BusTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Read a page, retrying while the tag stays in the field.
    pub async fn read_page(&self, page: u8) -> Result<[u8; 4]> {
        let mut last = TagError::ReadFailed { page };
        for attempt in 1..=READ_ATTEMPTS {
            match self.try_read_page(page).await {
                Ok(data) => return Ok(data),
                Err(e) => last = e,
            }
            if attempt < READ_ATTEMPTS {
                sleep(READ_SETTLE).await;
                if !self.is_present(PRESENCE_RECHECK).await {
                    debug!(page, attempt, "tag left the field during read");
                    return Err(TagError::TagRemovedMidOperation);
                }
            }
        }
        Err(last)
    }

    async fn try_write_page(&self, page: u8, data: [u8; 4]) -> Result<()> {
        let mut fe = self.frontend.lock().await;
        let started = Instant::now();
        let outcome = timeout(HARD_CEILING, fe.write_page(page, data)).await;
        recover_if_overrun(&mut *fe, started, TRANSFER_TIMEOUT).await;
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(page, error = %e, "page write failed");
                Err(TagError::WriteFailed { page })
            }
            Err(_) => Err(TagError::BusTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    /// Read back a freshly written page until it matches.
    async fn verify_page(&self, page: u8, expected: [u8; 4]) -> Result<()> {
        let mut last = TagError::ReadFailed { page };
        for attempt in 1..=VERIFY_ATTEMPTS {
            match self.try_read_page(page).await {
                Ok(actual) => match first_difference(&expected, &actual) {
                    None => return Ok(()),
                    Some(index) => {
                        warn!(
                            page,
                            index,
                            expected = expected[index],
                            actual = actual[index],
                            attempt,
                            "verify mismatch"
                        );
                        last = TagError::WriteVerifyMismatch {
                            page,
                            index,
                            expected: expected[index],
                            actual: actual[index],
                        };
                    }
                },
                Err(e) => {
                    debug!(page, attempt, "verify read failed");
                    last = e;
                }
            }
            if attempt < VERIFY_ATTEMPTS {
                sleep(VERIFY_RETRY_DELAY).await;
            }
        }
        Err(last)
    }

    /// Write a page and verify it by reading it back.
    pub async fn write_page(&self, page: u8, data: [u8; 4]) -> Result<()> {
        let mut last = TagError::WriteFailed { page };
        for attempt in 1..=WRITE_ATTEMPTS {
            match self.try_write_page(page, data).await {
                Ok(()) => {
                    sleep(VERIFY_SETTLE).await;
                    match self.verify_page(page, data).await {
                        Ok(()) => return Ok(()),
                        Err(e) => last = e,
                    }
                }
                Err(e) => {
                    debug!(page, attempt, "write attempt failed");
                    last = e;
                }
            }
            if attempt < WRITE_ATTEMPTS {
                sleep(WRITE_RETRY_DELAY).await;
            }
        }
        warn!(page, error = %last, "giving up on page");
        Err(last)
    }

    /// Write an encoded message into the user area, page by page.
    ///
    /// Stops at the first page that cannot be written. Pages before it keep
    /// their new content, so the caller must re-read the tag before
    /// trusting any cached payload.
    pub async fn write_message(&self, layout: &MemoryLayout, tlv: &[u8]) -> Result<()> {
        if !layout.is_known() {
            return Err(TagError::UnknownTagFamily);
        }
        if tlv.len() > layout.user_bytes() {
            return Err(TagError::CapacityExceeded {
                needed: tlv.len(),
                available: layout.user_bytes(),
            });
        }

        info!(bytes = tlv.len(), family = ?layout.family, "writing NDEF message");
        for (index, chunk) in tlv.chunks(PAGE_SIZE).enumerate() {
            let page = layout.first_user_page + index as u8;
            let mut data = [0u8; 4];
            data[..chunk.len()].copy_from_slice(chunk);
            self.write_page(page, data).await?;
            sleep(PAGE_GAP).await;
        }

        self.stabilize().await;
        Ok(())
    }

    /// Give the reader time to settle after a multi-page write.
    async fn stabilize(&self) {
        sleep(POST_WRITE_SETTLE).await;
        for check in 1..=STABILITY_CHECKS {
            if self.try_read_page(CC_PAGE).await.is_ok() {
                debug!(check, "reader responsive after write");
                return;
            }
            if check < STABILITY_CHECKS {
                sleep(STABILITY_INTERVAL).await;
                let _ = self.detect(STABILITY_PROBE).await;
            }
        }
        warn!("reader still unresponsive after write");
    }
}

async fn recover_if_overrun<F: NfcFrontend>(fe: &mut F, started: Instant, budget: Duration) {
    let elapsed = started.elapsed();
    if elapsed > budget + RECOVERY_MARGIN {
        warn!(elapsed_ms = elapsed.as_millis() as u64, "transfer overran its budget");
        fe.recover_bus().await;
    }
}

fn first_difference(expected: &[u8; 4], actual: &[u8; 4]) -> Option<usize> {
    expected.iter().zip(actual).position(|(a, b)| a != b)
}
