//! NDEF message framing for a single MIME/JSON short record.
//!
//! Layout written to the tag user area:
//!
//! ```text
//! 03 LL | D2 10 PL "application/json" <payload> | FE
//! ```
//!
//! `LL` is one byte when the record fits in 254 bytes, otherwise `FF` plus a
//! big-endian u16.

use serde_json::{Map, Value};

use crate::error::{Result, TagError};

pub const TLV_NDEF: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;
pub const TLV_LONG_LENGTH: u8 = 0xFF;

/// MB | ME | SR | TNF=MIME media.
pub const RECORD_HEADER: u8 = 0xD2;
pub const MIME_JSON: &[u8] = b"application/json";

const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;

/// Largest payload the one-byte short-record length can describe.
pub const MAX_SHORT_PAYLOAD: usize = 255;

/// Window in which the TLV tag must appear.
const TLV_SEARCH_WINDOW: usize = 16;

/// Key the fast path expects first in every spool payload.
pub const SPOOL_ID_KEY: &str = "sm_id";

/// Frame a JSON payload as a TLV-wrapped NDEF message.
///
/// Tag capacity is not checked here; see [`super::TagIo::write_message`].
pub fn encode(json: &str) -> Result<Vec<u8>> {
    let payload = json.as_bytes();
    if payload.len() > MAX_SHORT_PAYLOAD {
        return Err(TagError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_SHORT_PAYLOAD,
        });
    }

    let record_len = 3 + MIME_JSON.len() + payload.len();
    let mut out = Vec::with_capacity(record_len + 5);
    out.push(TLV_NDEF);
    if record_len <= 254 {
        out.push(record_len as u8);
    } else {
        out.push(TLV_LONG_LENGTH);
        out.extend_from_slice(&(record_len as u16).to_be_bytes());
    }
    out.push(RECORD_HEADER);
    out.push(MIME_JSON.len() as u8);
    out.push(payload.len() as u8);
    out.extend_from_slice(MIME_JSON);
    out.extend_from_slice(payload);
    out.push(TLV_TERMINATOR);
    Ok(out)
}

/// Position of the NDEF TLV and its parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordFrame {
    /// Offset of the record header byte in the raw buffer.
    pub record_start: usize,
    /// Declared TLV length (record bytes).
    pub tlv_len: usize,
    /// Payload offset relative to `record_start`.
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl RecordFrame {
    /// Absolute index of the first payload byte.
    pub fn payload_start(&self) -> usize {
        self.record_start + self.payload_offset
    }

    /// Offset just past the terminator, when the message is well formed.
    pub fn message_end(&self) -> usize {
        self.record_start + self.tlv_len + 1
    }
}

/// Locate the TLV in the first `search` bytes and parse the record header.
///
/// Only the header is bounds-checked; the payload may lie beyond `raw`.
pub(crate) fn parse_frame(raw: &[u8], search: usize) -> Result<RecordFrame> {
    let window = raw.len().min(search);
    let tlv_pos = raw[..window]
        .iter()
        .position(|&b| b == TLV_NDEF)
        .ok_or(TagError::NoTlvFound)?;

    let truncated = TagError::MalformedNdef {
        reason: "buffer ends inside record header",
    };
    let byte = |i: usize| raw.get(i).copied().ok_or(truncated.clone());

    let mut cursor = tlv_pos + 1;
    let tlv_len = match byte(cursor)? {
        TLV_LONG_LENGTH => {
            let len = u16::from_be_bytes([byte(cursor + 1)?, byte(cursor + 2)?]);
            cursor += 3;
            usize::from(len)
        }
        len => {
            cursor += 1;
            usize::from(len)
        }
    };

    let record_start = cursor;
    let flags = byte(record_start)?;
    let type_len = usize::from(byte(record_start + 1)?);
    let (payload_len, len_field) = if flags & FLAG_SR != 0 {
        (usize::from(byte(record_start + 2)?), 1)
    } else {
        let b = [
            byte(record_start + 2)?,
            byte(record_start + 3)?,
            byte(record_start + 4)?,
            byte(record_start + 5)?,
        ];
        (u32::from_be_bytes(b) as usize, 4)
    };
    let (id_len, id_field) = if flags & FLAG_IL != 0 {
        (usize::from(byte(record_start + 2 + len_field)?), 1)
    } else {
        (0, 0)
    };

    Ok(RecordFrame {
        record_start,
        tlv_len,
        payload_offset: 1 + 1 + len_field + id_field + type_len + id_len,
        payload_len,
    })
}

/// Recover the JSON text from a raw user-area dump.
pub fn decode(raw: &[u8]) -> Result<String> {
    let frame = parse_frame(raw, TLV_SEARCH_WINDOW)?;

    let end = frame.payload_offset + frame.payload_len;
    if end > frame.tlv_len {
        return Err(TagError::PayloadOverrun {
            end,
            tlv_len: frame.tlv_len,
        });
    }
    let payload = raw
        .get(frame.payload_start()..frame.record_start + end)
        .ok_or(TagError::MalformedNdef {
            reason: "buffer ends inside payload",
        })?;

    let mut text = Vec::with_capacity(payload.len());
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for &b in payload {
        if b == 0 {
            break;
        }
        if !is_printable(b) {
            continue;
        }
        text.push(b);
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth <= 0 {
                    break;
                }
            }
            _ => {}
        }
    }

    String::from_utf8(text).map_err(|_| TagError::MalformedNdef {
        reason: "payload is not UTF-8",
    })
}

fn is_printable(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\r') || (b >= 0x20 && b != 0x7F)
}

/// Reorder a JSON object so `sm_id` is its first key.
///
/// A missing id is inserted as `"0"`. Anything that is not a JSON object is
/// returned unchanged.
pub fn prioritize_spool_id(json: &str) -> String {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(json) else {
        return json.to_string();
    };

    let mut ordered = Map::with_capacity(map.len() + 1);
    let id = map
        .get(SPOOL_ID_KEY)
        .cloned()
        .unwrap_or_else(|| Value::String("0".into()));
    ordered.insert(SPOOL_ID_KEY.to_string(), id);
    for (key, value) in map {
        if key != SPOOL_ID_KEY {
            ordered.insert(key, value);
        }
    }
    Value::Object(ordered).to_string()
}
