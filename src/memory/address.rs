// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Virtual and physical addresses.

/// Size of a cache line in bytes; translated requests are routed by their
/// line-aligned base address.
pub const CACHE_LINE_SIZE: u64 = 64;

#[derive(Copy, Clone, Default, Ord, Eq, Hash, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Address(pub u64);

impl Address {
    /// Page number of this address for pages of `page_size` bytes.
    #[inline]
    pub const fn page_number(self, page_size: u64) -> u64 {
        self.0 / page_size
    }

    /// Offset of this address inside a page of `page_size` bytes.
    #[inline]
    pub const fn page_offset(self, page_size: u64) -> u64 {
        self.0 % page_size
    }

    /// Start of the cache line containing this address.
    #[inline]
    pub const fn line_aligned(self) -> Self {
        Self(self.0 - self.0 % CACHE_LINE_SIZE)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "0x{:x}", self.0)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "0x{:x}", self.0)
    }
}
