// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Simulated 4-level page table of one address space.
//!
//! The table is built lazily by the page table walkers of the cores sharing
//! the address space. It only records where each table or page was placed in
//! physical memory; no descriptor contents are modeled.
//!
//! Table indices are `vaddress / level_page_size`, a unique key for the entry
//! across the whole address space. In confined mode the index of the `k`-th
//! level below CR3 is further reduced modulo `512^k`, which bounds the size
//! of the maps at the price of unrelated addresses aliasing the same entries.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::memory::{Address, PAGE_1GB, PAGE_2MB, PAGE_4KB, PAGE_512GB};

/// Entries per table.
pub const TABLE_ENTRIES: u64 = 512;
/// Size of a table descriptor.
pub const DESCRIPTOR_SIZE: u64 = 8;

/// The page table level a fault fills in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableLevel {
    /// Root table.
    Cr3,
    Pgd,
    Pud,
    Pmd,
    Pte,
}

impl TableLevel {
    /// Walk order, root first.
    pub const ALL: [Self; 5] = [Self::Cr3, Self::Pgd, Self::Pud, Self::Pmd, Self::Pte];

    /// Level number used in fault requests: 4 for the root table down to 0
    /// for a page.
    pub const fn fault_level(self) -> u8 {
        match self {
            Self::Cr3 => 4,
            Self::Pgd => 3,
            Self::Pud => 2,
            Self::Pmd => 1,
            Self::Pte => 0,
        }
    }

    /// Region of virtual memory one entry of this level covers.
    pub const fn page_size(self) -> u64 {
        match self {
            Self::Cr3 => u64::MAX,
            Self::Pgd => PAGE_512GB,
            Self::Pud => PAGE_1GB,
            Self::Pmd => PAGE_2MB,
            Self::Pte => PAGE_4KB,
        }
    }

    /// The next level down.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Cr3 => Some(Self::Pgd),
            Self::Pgd => Some(Self::Pud),
            Self::Pud => Some(Self::Pmd),
            Self::Pmd => Some(Self::Pte),
            Self::Pte => None,
        }
    }

    /// Bound of the confined index space, `512^k` for the `k`-th level below
    /// CR3.
    pub const fn confined_entries(self) -> u64 {
        match self {
            Self::Cr3 => 1,
            Self::Pgd => TABLE_ENTRIES,
            Self::Pud => TABLE_ENTRIES.pow(2),
            Self::Pmd => TABLE_ENTRIES.pow(3),
            Self::Pte => TABLE_ENTRIES.pow(4),
        }
    }

    const fn slot(self) -> usize {
        match self {
            Self::Cr3 => 0,
            Self::Pgd => 1,
            Self::Pud => 2,
            Self::Pmd => 3,
            Self::Pte => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cr3 => "CR3",
            Self::Pgd => "PGD",
            Self::Pud => "PUD",
            Self::Pmd => "PMD",
            Self::Pte => "PTE",
        }
    }
}

impl std::fmt::Display for TableLevel {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.as_str())
    }
}

/// Page table state shared by all cores of an address space.
#[derive(Debug, Default)]
pub struct PageTableStore {
    confined: bool,
    cr3: Option<Address>,
    /// PGD, PUD, PMD and PTE maps, indexed by `TableLevel::slot() - 1`.
    tables: [FxHashMap<u64, Address>; 4],
    mapped_4kb: FxHashSet<u64>,
    mapped_2mb: FxHashSet<u64>,
    mapped_1gb: FxHashSet<u64>,
    /// Table entries with a fault request in flight, one set per level.
    pending: [FxHashSet<u64>; 5],
    /// Pages with a fault in flight, keyed by unconfined 4KB page number.
    pending_page_fault: FxHashSet<u64>,
}

impl PageTableStore {
    pub fn new(confined: bool) -> Self {
        Self {
            confined,
            ..Self::default()
        }
    }

    #[inline]
    pub fn confined(&self) -> bool {
        self.confined
    }

    #[inline]
    pub fn cr3(&self) -> Option<Address> {
        self.cr3
    }

    #[inline]
    pub fn cr3_initialized(&self) -> bool {
        self.cr3.is_some()
    }

    /// Index of the entry of `level` covering `vaddress`.
    pub fn index(&self, level: TableLevel, vaddress: Address) -> u64 {
        if level == TableLevel::Cr3 {
            return 0;
        }
        let index = vaddress.page_number(level.page_size());
        if self.confined {
            index % level.confined_entries()
        } else {
            index
        }
    }

    /// Physical address recorded for entry `index` of `level`.
    pub fn entry(&self, level: TableLevel, index: u64) -> Option<Address> {
        match level {
            TableLevel::Cr3 => self.cr3,
            _ => self.tables[level.slot() - 1].get(&index).copied(),
        }
    }

    pub fn is_present(&self, level: TableLevel, vaddress: Address) -> bool {
        self.entry(level, self.index(level, vaddress)).is_some()
    }

    /// Whether `vaddress` is covered by a 2MB page.
    pub fn is_mapped_2mb(&self, vaddress: Address) -> bool {
        self.mapped_2mb.contains(&self.index(TableLevel::Pmd, vaddress))
    }

    /// Whether `vaddress` is covered by a 1GB page.
    pub fn is_mapped_1gb(&self, vaddress: Address) -> bool {
        self.mapped_1gb.contains(&self.index(TableLevel::Pud, vaddress))
    }

    pub fn is_mapped_4kb(&self, vaddress: Address) -> bool {
        self.mapped_4kb.contains(&self.index(TableLevel::Pte, vaddress))
    }

    /// The highest level that still has to be filled in before `vaddress` is
    /// mapped, `None` if it is mapped.
    pub fn first_unmapped_level(&self, vaddress: Address) -> Option<TableLevel> {
        for level in TableLevel::ALL {
            if !self.is_present(level, vaddress) {
                return Some(level);
            }
            match level {
                TableLevel::Pud if self.is_mapped_1gb(vaddress) => return None,
                TableLevel::Pmd if self.is_mapped_2mb(vaddress) => return None,
                _ => {}
            }
        }
        None
    }

    /// Page size `vaddress` is mapped at, if it is mapped.
    pub fn mapped_page_size(&self, vaddress: Address) -> Option<u64> {
        if !self.cr3_initialized() {
            None
        } else if self.is_mapped_1gb(vaddress) {
            Some(PAGE_1GB)
        } else if self.is_mapped_2mb(vaddress) {
            Some(PAGE_2MB)
        } else if self.is_mapped_4kb(vaddress) {
            Some(PAGE_4KB)
        } else {
            None
        }
    }

    /// Physical address `vaddress` is mapped to.
    pub fn translate(&self, vaddress: Address) -> Option<Address> {
        let level = match self.mapped_page_size(vaddress)? {
            PAGE_1GB => TableLevel::Pud,
            PAGE_2MB => TableLevel::Pmd,
            _ => TableLevel::Pte,
        };
        let frame = self.entry(level, self.index(level, vaddress))?;
        Some(Address(frame.0 + vaddress.page_offset(level.page_size())))
    }

    /// Physical address of the descriptor a walk reads at `level` for
    /// `vaddress`, if the table holding it exists.
    pub fn descriptor_address(&self, level: TableLevel, vaddress: Address) -> Option<Address> {
        let parent = match level {
            TableLevel::Cr3 => return None,
            TableLevel::Pgd => self.cr3?,
            TableLevel::Pud => self.entry(TableLevel::Pgd, self.index(TableLevel::Pgd, vaddress))?,
            TableLevel::Pmd => self.entry(TableLevel::Pud, self.index(TableLevel::Pud, vaddress))?,
            TableLevel::Pte => self.entry(TableLevel::Pmd, self.index(TableLevel::Pmd, vaddress))?,
        };
        let slot = vaddress.page_number(level.page_size()) % TABLE_ENTRIES;
        Some(Address(parent.0 + slot * DESCRIPTOR_SIZE))
    }

    pub fn is_pending(&self, level: TableLevel, index: u64) -> bool {
        self.pending[level.slot()].contains(&index)
    }

    /// Claim the fault for entry `index` of `level`. Returns `false` if
    /// another walker already claimed it.
    pub fn begin_fault(&mut self, level: TableLevel, index: u64) -> bool {
        self.pending[level.slot()].insert(index)
    }

    /// Record that a fault is being resolved for the page of `vaddress`.
    /// Returns `false` if one already is.
    pub fn begin_page_fault(&mut self, vaddress: Address) -> bool {
        self.pending_page_fault.insert(vaddress.page_number(PAGE_4KB))
    }

    pub fn is_page_faulting(&self, vaddress: Address) -> bool {
        self.pending_page_fault.contains(&vaddress.page_number(PAGE_4KB))
    }

    /// Whether any fault touching `vaddress` is still in flight.
    pub fn has_pending_faults(&self, vaddress: Address) -> bool {
        self.is_page_faulting(vaddress)
            || TableLevel::ALL
                .iter()
                .any(|level| self.is_pending(*level, self.index(*level, vaddress)))
    }

    /// Fill in entry `index` of `level` with `paddress`, clearing its pending
    /// marker.
    ///
    /// `page_size` is the size of the allocation: a 2MB allocation at PMD
    /// level or a 1GB allocation at PUD level maps a large page instead of a
    /// next-level table.
    ///
    /// Returns the previous entry if one existed; the store is left unchanged
    /// in that case.
    pub fn fill(
        &mut self,
        level: TableLevel,
        index: u64,
        paddress: Address,
        page_size: u64,
    ) -> Result<(), Address> {
        if let Some(existing) = self.entry(level, index) {
            return Err(existing);
        }
        self.pending[level.slot()].remove(&index);
        match level {
            TableLevel::Cr3 => {
                self.cr3 = Some(paddress);
                return Ok(());
            }
            TableLevel::Pte => {
                self.mapped_4kb.insert(index);
            }
            TableLevel::Pmd if page_size == PAGE_2MB => {
                self.mapped_2mb.insert(index);
            }
            TableLevel::Pud if page_size == PAGE_1GB => {
                self.mapped_1gb.insert(index);
            }
            _ => {}
        }
        self.tables[level.slot() - 1].insert(index, paddress);
        Ok(())
    }

    /// Forget that a fault is being resolved for the page of `vaddress`.
    pub fn end_page_fault(&mut self, vaddress: Address) {
        self.pending_page_fault.remove(&vaddress.page_number(PAGE_4KB));
    }
}
