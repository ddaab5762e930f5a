//! Spool-id extraction from the first few user pages.
//!
//! Spool tags are written with `sm_id` as the first JSON key, so a known
//! spool can be recognised from a short header window without walking the
//! whole user area. Anything the window cannot prove is a miss.

use tracing::debug;

use super::frontend::NfcFrontend;
use super::layout::{FIRST_USER_PAGE, PAGE_SIZE};
use super::ndef::parse_frame;
use super::tag_io::TagIo;

/// Bytes in which the TLV tag has to appear.
const TLV_WINDOW: usize = 8;
const MARKER: &[u8] = b"\"sm_id\":\"";

/// Spool id found in a header window, or `None` on a miss.
pub fn scan_window(window: &[u8]) -> Option<String> {
    let frame = parse_frame(window, TLV_WINDOW).ok()?;
    let payload = window.get(frame.payload_start()..)?;

    let marker_at = find(payload, MARKER)?;
    let value_start = marker_at + MARKER.len();
    let value_len = payload[value_start..].iter().position(|&b| b == b'"')?;
    let value = std::str::from_utf8(&payload[value_start..value_start + value_len]).ok()?;

    if value.is_empty() || value == "0" {
        return None;
    }
    Some(value.to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Read `pages` pages from the start of the user area and scan them.
///
/// A failed page read is a miss; the full scan reports the real error.
pub async fn scan<F: NfcFrontend>(io: &TagIo<F>, pages: u8) -> Option<String> {
    let mut window = Vec::with_capacity(usize::from(pages) * PAGE_SIZE);
    for page in FIRST_USER_PAGE..FIRST_USER_PAGE.saturating_add(pages) {
        match io.read_page(page).await {
            Ok(data) => window.extend_from_slice(&data),
            Err(e) => {
                debug!(page, error = %e, "fast path read failed");
                return None;
            }
        }
    }
    let hit = scan_window(&window);
    debug!(?hit, window = window.len(), "fast path scanned");
    hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfc::layout::TagFamily;
    use crate::nfc::sim::{SimFrontend, SimTag};

    /// TLV + record header with a caller-chosen MIME type, then `payload`.
    fn message(mime: &[u8], payload: &[u8]) -> Vec<u8> {
        let record_len = 3 + mime.len() + payload.len();
        let mut raw = vec![0x03, record_len as u8, 0xD2, mime.len() as u8, payload.len() as u8];
        raw.extend_from_slice(mime);
        raw.extend_from_slice(payload);
        raw.push(0xFE);
        raw
    }

    fn window(raw: &[u8]) -> &[u8] {
        &raw[..20.min(raw.len())]
    }

    #[test]
    fn hit_when_value_fits() {
        let raw = message(b"j", br#"{"sm_id":"42","b":1}"#);
        assert_eq!(scan_window(window(&raw)).as_deref(), Some("42"));
    }

    #[test]
    fn miss_when_value_starts_at_byte_18() {
        // 3-byte type: payload at 8, value at 18, closing quote at 20
        let raw = message(b"abc", br#"{"sm_id":"12"}"#);
        assert_eq!(raw[18], b'1');
        assert_eq!(scan_window(window(&raw)), None);
    }

    #[test]
    fn miss_when_single_char_value_loses_its_quote() {
        let raw = message(b"json", br#"{"sm_id":"5"}"#);
        assert_eq!(raw[19], b'5');
        assert_eq!(scan_window(window(&raw)), None);
    }

    #[test]
    fn miss_for_unregistered_id() {
        let raw = message(b"j", br#"{"sm_id":"0","b":1}"#);
        assert_eq!(scan_window(window(&raw)), None);
    }

    #[test]
    fn miss_for_empty_id() {
        let raw = message(b"j", br#"{"sm_id":"","b":1}"#);
        assert_eq!(scan_window(window(&raw)), None);
    }

    #[test]
    fn miss_without_marker() {
        let raw = message(b"j", br#"{"brand":"x"}"#);
        assert_eq!(scan_window(window(&raw)), None);
    }

    #[test]
    fn miss_without_tlv_in_first_eight_bytes() {
        let mut raw = vec![0u8; 8];
        raw.extend(message(b"j", br#"{"sm_id":"42"}"#));
        assert_eq!(scan_window(&raw), None);
    }

    #[test]
    fn standard_mime_type_never_fits_default_window() {
        let raw = crate::nfc::ndef::encode(r#"{"sm_id":"42"}"#).unwrap();
        assert_eq!(scan_window(window(&raw)), None);
        assert_eq!(scan_window(&raw[..40]).as_deref(), Some("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_reads_requested_pages() {
        let (frontend, handle) = SimFrontend::new();
        let raw = message(b"j", br#"{"sm_id":"42","b":1}"#);
        handle.place(SimTag::new(TagFamily::T213).with_user_bytes(&raw));
        let io = TagIo::new(frontend);

        assert_eq!(scan(&io, 5).await.as_deref(), Some("42"));
        assert_eq!(handle.reads(), 5);
    }
}
