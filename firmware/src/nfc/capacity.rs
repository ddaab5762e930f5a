//! Tag memory classification by probing.
//!
//! The capability container only states what the tag *claims*. Clones and
//! damaged tags lie, so the real bound is found by reading just past the
//! end of each family's user area.

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::frontend::NfcFrontend;
use super::layout::{CC_MAGIC, CC_PAGE, FIRST_USER_PAGE, MemoryLayout, PAGE_SIZE, TagFamily};
use super::tag_io::{PRESENCE_RECHECK, TagIo};

/// First page past the T213 user area.
const T213_BOUNDARY: u8 = 40;
/// First page past the T215 user area.
const T215_BOUNDARY: u8 = 130;

/// Binary search ceiling.
pub const MAX_SEARCH_ATTEMPTS: u32 = 15;
const SEARCH_PACE: std::time::Duration = std::time::Duration::from_millis(5);

/// Classify the tag currently in the field.
///
/// Returns [`TagFamily::Unknown`] only when the first user page itself is
/// unreadable; callers treat that as a failed read.
pub async fn classify<F: NfcFrontend>(io: &TagIo<F>) -> MemoryLayout {
    let declared = match io.try_read_page(CC_PAGE).await {
        Ok(cc) => declared_size(cc),
        Err(_) => {
            reselect(io).await;
            if !readable(io, FIRST_USER_PAGE).await {
                warn!("capability container and floor page unreadable");
                return MemoryLayout::unknown();
            }
            None
        }
    };

    let beyond_t213 = readable(io, T213_BOUNDARY).await;
    let beyond_t215 = beyond_t213 && readable(io, T215_BOUNDARY).await;
    let probed = match (beyond_t213, beyond_t215) {
        (false, _) => TagFamily::T213,
        (true, false) => TagFamily::T215,
        (true, true) => TagFamily::T216,
    };
    let probed_last = probed.last_user_page().unwrap_or(FIRST_USER_PAGE);

    if let Some(bytes) = declared {
        let claimed = TagFamily::from_declared_size(bytes);
        if claimed != probed {
            warn!(?claimed, ?probed, "capability container disagrees with probe");
        }
    }

    if readable(io, probed_last).await {
        info!(family = ?probed, last_page = probed_last, "tag classified");
        return MemoryLayout::for_family(probed);
    }

    let ceiling = declared
        .map(declared_last_page)
        .unwrap_or(FIRST_USER_PAGE)
        .max(probed_last);
    debug!(ceiling, "boundary probe inconclusive, searching");
    if let Some(last) = search_last_readable(io, ceiling).await {
        let family = TagFamily::containing(last);
        info!(?family, last_page = last, "tag classified by search");
        return MemoryLayout {
            family,
            first_user_page: FIRST_USER_PAGE,
            last_user_page: last,
        };
    }

    if readable(io, FIRST_USER_PAGE).await {
        warn!("search inconclusive, assuming smallest family");
        MemoryLayout::for_family(TagFamily::T213)
    } else {
        warn!("floor page unreadable");
        MemoryLayout::unknown()
    }
}

/// Data area size in bytes the capability container declares, if it looks
/// valid.
fn declared_size(cc: [u8; 4]) -> Option<usize> {
    if cc[0] != CC_MAGIC || cc[2] == 0 {
        debug!(?cc, "capability container not NDEF formatted");
        return None;
    }
    Some(usize::from(cc[2]) * 8)
}

/// Last user page of a data area of `bytes`, clamped to the largest family.
fn declared_last_page(bytes: usize) -> u8 {
    let last = usize::from(CC_PAGE) + bytes / PAGE_SIZE;
    let max = usize::from(TagFamily::T216.last_user_page().unwrap_or(u8::MAX));
    last.min(max) as u8
}

/// Highest readable page in `FIRST_USER_PAGE..=ceiling`, assuming pages
/// become unreadable monotonically.
async fn search_last_readable<F: NfcFrontend>(io: &TagIo<F>, ceiling: u8) -> Option<u8> {
    let mut low = u16::from(FIRST_USER_PAGE);
    let mut high = u16::from(ceiling);
    let mut found = None;
    let mut attempts = 0;

    while low <= high && attempts < MAX_SEARCH_ATTEMPTS {
        let mid = (low + high) / 2;
        attempts += 1;
        if readable(io, mid as u8).await {
            found = Some(mid as u8);
            low = mid + 1;
        } else {
            high = mid - 1;
        }
        sleep(SEARCH_PACE).await;
    }
    debug!(attempts, ?found, "capacity search finished");
    found
}

/// Single read; a NAK halts the target, so re-select it before returning.
async fn readable<F: NfcFrontend>(io: &TagIo<F>, page: u8) -> bool {
    if io.try_read_page(page).await.is_ok() {
        return true;
    }
    reselect(io).await;
    false
}

async fn reselect<F: NfcFrontend>(io: &TagIo<F>) {
    let _ = io.detect(PRESENCE_RECHECK).await;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::nfc::sim::{SimFrontend, SimTag};

    async fn classify_tag(tag: SimTag) -> MemoryLayout {
        let (frontend, handle) = SimFrontend::new();
        handle.place(tag);
        classify(&TagIo::new(frontend)).await
    }

    #[rstest]
    #[case::t213(TagFamily::T213, 39)]
    #[case::t215(TagFamily::T215, 129)]
    #[case::t216(TagFamily::T216, 225)]
    #[tokio::test(start_paused = true)]
    async fn classifies_each_family(#[case] family: TagFamily, #[case] last: u8) {
        let layout = classify_tag(SimTag::new(family)).await;
        assert_eq!(layout.family, family);
        assert_eq!(layout.last_user_page, last);
    }

    #[rstest]
    #[case::t213_claims_t216(TagFamily::T213, 0x6D)]
    #[case::t215_claims_t213(TagFamily::T215, 0x12)]
    #[case::t216_claims_nothing(TagFamily::T216, 0x00)]
    #[tokio::test(start_paused = true)]
    async fn probe_wins_over_capability_container(#[case] family: TagFamily, #[case] cc: u8) {
        let layout = classify_tag(SimTag::new(family).with_cc_size(cc)).await;
        assert_eq!(layout.family, family);
    }

    #[tokio::test(start_paused = true)]
    async fn damaged_tag_is_bounded_by_search() {
        let layout = classify_tag(SimTag::new(TagFamily::T215).with_readable_limit(100)).await;
        assert_eq!(layout.family, TagFamily::T215);
        assert_eq!(layout.last_user_page, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn short_tag_below_smallest_family() {
        let layout = classify_tag(SimTag::new(TagFamily::T213).with_readable_limit(20)).await;
        assert_eq!(layout.family, TagFamily::T213);
        assert_eq!(layout.last_user_page, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_tag_is_unknown() {
        let (frontend, _handle) = SimFrontend::new();
        let layout = classify(&TagIo::new(frontend)).await;
        assert_eq!(layout.family, TagFamily::Unknown);
        assert_eq!(layout.user_bytes(), 0);
    }

    #[rstest]
    #[case::t213(0x12, 144, 39, TagFamily::T213)]
    #[case::t215(0x3E, 496, 127, TagFamily::T215)]
    #[case::t216(0x6D, 872, 221, TagFamily::T216)]
    fn declared_size_from_capability_container(
        #[case] size_byte: u8,
        #[case] bytes: usize,
        #[case] last: u8,
        #[case] family: TagFamily,
    ) {
        assert_eq!(declared_size([CC_MAGIC, 0x10, size_byte, 0x00]), Some(bytes));
        assert_eq!(declared_last_page(bytes), last);
        assert_eq!(TagFamily::from_declared_size(bytes), family);
    }

    #[test]
    fn unformatted_capability_container_declares_nothing() {
        assert_eq!(declared_size([0x00, 0x00, 0x12, 0x00]), None);
        assert_eq!(declared_size([CC_MAGIC, 0x10, 0x00, 0x00]), None);
    }
}
