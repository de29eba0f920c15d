// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Memory and page sizes.

use std::num::NonZero;

/// Base page size.
pub const PAGE_4KB: u64 = 4 * 1024;
/// Page size mapped by a single PMD entry.
pub const PAGE_2MB: u64 = 2 * 1024 * 1024;
/// Page size mapped by a single PUD entry.
pub const PAGE_1GB: u64 = 1024 * 1024 * 1024;
/// Region covered by a single PGD entry.
pub const PAGE_512GB: u64 = 512 * PAGE_1GB;

#[derive(Copy, Eq, PartialEq, PartialOrd, Ord, Clone, Hash)]
#[repr(transparent)]
/// A non-zero size in bytes.
pub struct MemorySize(pub NonZero<u64>);

#[allow(non_upper_case_globals)]
impl MemorySize {
    /// A KiB.
    pub const KiB: NonZero<u64> = NonZero::new(1024).unwrap();
    /// A MiB.
    pub const MiB: NonZero<u64> = NonZero::new(Self::KiB.get() * 1024).unwrap();
    /// A GiB.
    pub const GiB: NonZero<u64> = NonZero::new(Self::MiB.get() * 1024).unwrap();

    #[inline]
    /// Constructs a new size.
    pub const fn new(value: u64) -> Option<Self> {
        match NonZero::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Constructs a size from a count of KiB, as page sizes are given in
    /// configuration files.
    pub const fn from_kib(kib: u64) -> Option<Self> {
        match kib.checked_mul(Self::KiB.get()) {
            Some(bytes) => Self::new(bytes),
            None => None,
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Number of `unit`-sized pieces needed to cover this size.
    pub const fn pages(self, unit: Self) -> u64 {
        self.get().div_ceil(unit.get())
    }
}

impl std::fmt::Display for MemorySize {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let bytes = self.get();
        if bytes < Self::KiB.get() {
            write!(fmt, "{}bytes", bytes)
        } else if bytes < Self::MiB.get() || bytes % Self::MiB != 0 {
            write!(fmt, "{}KiB", bytes / Self::KiB)
        } else if bytes < Self::GiB.get() || bytes % Self::GiB != 0 {
            write!(fmt, "{}MiB", bytes / Self::MiB)
        } else {
            write!(fmt, "{}GiB", bytes / Self::GiB)
        }
    }
}

impl std::fmt::Debug for MemorySize {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(self, fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(MemorySize::from_kib(4).unwrap().to_string(), "4KiB");
        assert_eq!(MemorySize::new(PAGE_2MB).unwrap().to_string(), "2MiB");
        assert_eq!(MemorySize::new(PAGE_1GB).unwrap().to_string(), "1GiB");
        assert_eq!(MemorySize::new(PAGE_2MB + PAGE_4KB).unwrap().to_string(), "2052KiB");
        assert_eq!(MemorySize::new(12).unwrap().to_string(), "12bytes");
        assert!(MemorySize::new(0).is_none());
    }

    #[test]
    fn test_pages() {
        let frame = MemorySize::new(PAGE_4KB).unwrap();
        assert_eq!(MemorySize::new(PAGE_4KB).unwrap().pages(frame), 1);
        assert_eq!(MemorySize::new(PAGE_4KB + 1).unwrap().pages(frame), 2);
        assert_eq!(MemorySize::new(PAGE_2MB).unwrap().pages(frame), 512);
    }
}
