//! NTAG21x memory families and user-area layouts.

use serde::{Deserialize, Serialize};

/// Bytes per tag page.
pub const PAGE_SIZE: usize = 4;

/// First page of the user area on every NTAG21x.
pub const FIRST_USER_PAGE: u8 = 4;

/// Page holding the capability container.
pub const CC_PAGE: u8 = 3;

/// Capability container magic for NDEF-formatted tags.
pub const CC_MAGIC: u8 = 0xE1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagFamily {
    T213,
    T215,
    T216,
    Unknown,
}

impl TagFamily {
    /// Known families, smallest first.
    pub const KNOWN: [TagFamily; 3] = [TagFamily::T213, TagFamily::T215, TagFamily::T216];

    /// Last page of the user area, or `None` for [`TagFamily::Unknown`].
    pub fn last_user_page(self) -> Option<u8> {
        match self {
            TagFamily::T213 => Some(39),
            TagFamily::T215 => Some(129),
            TagFamily::T216 => Some(225),
            TagFamily::Unknown => None,
        }
    }

    /// Data-area size byte the factory writes into CC byte 2 (size / 8).
    pub fn cc_size_byte(self) -> u8 {
        match self {
            TagFamily::T213 => 0x12,
            TagFamily::T215 => 0x3E,
            TagFamily::T216 => 0x6D,
            TagFamily::Unknown => 0x00,
        }
    }

    /// Total pages including header and configuration pages.
    pub fn total_pages(self) -> usize {
        match self {
            TagFamily::T213 => 45,
            TagFamily::T215 => 135,
            TagFamily::T216 => 231,
            TagFamily::Unknown => 0,
        }
    }

    /// Smallest family whose user area contains `page`.
    pub fn containing(page: u8) -> TagFamily {
        Self::KNOWN
            .into_iter()
            .find(|family| family.last_user_page().is_some_and(|last| page <= last))
            .unwrap_or(TagFamily::T216)
    }

    /// Family whose data area matches a declared byte size.
    pub fn from_declared_size(bytes: usize) -> TagFamily {
        if bytes <= 144 {
            TagFamily::T213
        } else if bytes <= 504 {
            TagFamily::T215
        } else {
            TagFamily::T216
        }
    }
}

/// Writable page range of a classified tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryLayout {
    pub family: TagFamily,
    pub first_user_page: u8,
    pub last_user_page: u8,
}

impl MemoryLayout {
    /// Full user area of a known family.
    pub fn for_family(family: TagFamily) -> Self {
        Self {
            family,
            first_user_page: FIRST_USER_PAGE,
            last_user_page: family.last_user_page().unwrap_or(FIRST_USER_PAGE - 1),
        }
    }

    /// Layout for a tag that could not be read at all.
    pub fn unknown() -> Self {
        Self::for_family(TagFamily::Unknown)
    }

    pub fn is_known(&self) -> bool {
        self.family != TagFamily::Unknown
    }

    pub fn user_pages(&self) -> usize {
        if self.last_user_page < self.first_user_page {
            0
        } else {
            usize::from(self.last_user_page - self.first_user_page) + 1
        }
    }

    /// Capacity of the user area in bytes.
    pub fn user_bytes(&self) -> usize {
        self.user_pages() * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_area_sizes_match_datasheet() {
        assert_eq!(MemoryLayout::for_family(TagFamily::T213).user_bytes(), 144);
        assert_eq!(MemoryLayout::for_family(TagFamily::T215).user_bytes(), 504);
        assert_eq!(MemoryLayout::for_family(TagFamily::T216).user_bytes(), 888);
        assert_eq!(MemoryLayout::unknown().user_bytes(), 0);
    }

    #[test]
    fn containing_picks_smallest_family() {
        assert_eq!(TagFamily::containing(20), TagFamily::T213);
        assert_eq!(TagFamily::containing(39), TagFamily::T213);
        assert_eq!(TagFamily::containing(40), TagFamily::T215);
        assert_eq!(TagFamily::containing(200), TagFamily::T216);
    }
}
