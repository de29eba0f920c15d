// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Messages exchanged between the core, the translation hierarchy and its
//! external collaborators.

use crate::memory::{Address, MemorySize, TableLevel};

/// Index of a simulated core.
pub type CoreId = usize;

/// Identifier of a memory access issued by a core.
pub type RequestId = u64;

/// A memory access travelling from the core towards the caches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub vaddress: Address,
    pub size: u64,
    pub is_write: bool,
    /// Filled in once the request leaves the hierarchy.
    pub paddress: Option<Address>,
}

impl Request {
    pub const fn new(id: RequestId, vaddress: Address, size: u64, is_write: bool) -> Self {
        Self {
            id,
            vaddress,
            size,
            is_write,
            paddress: None,
        }
    }

    /// Line-aligned physical address the caches route this request by.
    pub fn base_address(&self) -> Option<Address> {
        self.paddress.map(Address::line_aligned)
    }
}

/// A translation served by a level, together with the page size it was
/// served at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub request: Request,
    pub page_size: u64,
}

/// Allocation request sent to the page fault handler.
///
/// `level` 4 asks for the root table (CR3), 3..1 for the next table below a
/// PGD/PUD/PMD entry and 0 for the data frame of a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaultRequest {
    pub core: CoreId,
    pub level: TableLevel,
    /// Index of the table entry being filled, 0 for the root table.
    pub index: u64,
    pub size: MemorySize,
}

/// Reply of the page fault handler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FaultResponse {
    pub core: CoreId,
    /// Echo of the index or address the request carried.
    pub vaddress: u64,
    pub paddress: Address,
    pub size: MemorySize,
}

/// Dummy read issued by a walker to model the latency of a table access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRequest {
    pub id: u64,
    pub core: CoreId,
    pub address: Address,
    pub size: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryResponse {
    pub id: u64,
    pub core: CoreId,
}
