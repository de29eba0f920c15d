// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Page fault emulation
//!
//! When a walk finds its page unmapped, the walker builds the missing part of
//! the page table one level at a time, root first, asking the page fault
//! handler for a frame per missing table (and finally for the page itself).
//! Each request is only sent after the previous one was answered.
//!
//! Several cores may share the address space. The first walker to need an
//! entry claims it in the store's pending set and requests it; any other
//! walker needing the same entry waits until it appears instead of issuing a
//! duplicate request. A core has at most one fault in flight.

use std::collections::VecDeque;

use crate::{
    error::SimulationError,
    memory::{MemorySize, PageTableStore, TableLevel},
    request::{CoreId, FaultRequest, FaultResponse, Request},
};

/// State of the fault engine of a core.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultState {
    Idle,
    /// Waiting for the entry of the given level to be filled in, either by
    /// our own request or by another core's.
    Await(TableLevel),
}

#[derive(Debug)]
struct ActiveFault {
    request: Request,
    level: TableLevel,
    index: u64,
    /// Whether this core sent the request for `level`/`index`.
    issued: bool,
    /// Whether this core marked the page as faulting.
    owns_page: bool,
}

#[derive(Debug)]
pub struct FaultEngine {
    core: CoreId,
    frame_size: MemorySize,
    queue: VecDeque<Request>,
    active: Option<ActiveFault>,
}

impl FaultEngine {
    pub fn new(core: CoreId, frame_size: MemorySize) -> Self {
        Self {
            core,
            frame_size,
            queue: VecDeque::new(),
            active: None,
        }
    }

    pub fn state(&self) -> FaultState {
        match self.active {
            None => FaultState::Idle,
            Some(ActiveFault { level, .. }) => FaultState::Await(level),
        }
    }

    /// Whether the core must stall: a fault is being resolved or waits to be.
    pub fn is_holding(&self) -> bool {
        self.active.is_some() || !self.queue.is_empty()
    }

    /// Queue a walk whose page is not mapped.
    pub fn enqueue(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    /// Start the next queued fault and retry a fault waiting on another core.
    ///
    /// Returns the request whose page became mapped, if any.
    pub fn advance(
        &mut self,
        store: &mut PageTableStore,
        out: &mut Vec<FaultRequest>,
    ) -> Option<Request> {
        if self.active.is_none() {
            let request = self.queue.pop_front()?;
            let owns_page = store.begin_page_fault(request.vaddress);
            log::debug!(
                target: "fault",
                "core {}: page fault for {}",
                self.core,
                request.vaddress
            );
            self.active = Some(ActiveFault {
                request,
                level: TableLevel::Cr3,
                index: 0,
                issued: false,
                owns_page,
            });
        }
        match self.active {
            Some(ActiveFault { issued: false, .. }) => self.next_level(store, out),
            _ => None,
        }
    }

    /// Handle the page fault handler's answer to our last request.
    ///
    /// Returns the request whose page became mapped, if any.
    pub fn on_response(
        &mut self,
        store: &mut PageTableStore,
        response: FaultResponse,
        out: &mut Vec<FaultRequest>,
    ) -> Result<Option<Request>, SimulationError> {
        let Some(active) = self.active.as_mut().filter(|active| active.issued) else {
            return Err(SimulationError::UnexpectedFaultResponse {
                core: self.core,
                address: response.paddress,
            });
        };
        if store
            .fill(
                active.level,
                active.index,
                response.paddress,
                response.size.get(),
            )
            .is_err()
        {
            return Err(SimulationError::DuplicateTableEntry {
                core: self.core,
                level: active.level,
                index: active.index,
                address: active.request.vaddress,
            });
        }
        log::debug!(
            target: "fault",
            "core {}: {} entry {:#x} of {} -> {}",
            self.core,
            active.level,
            active.index,
            active.request.vaddress,
            response.paddress
        );
        active.issued = false;
        Ok(self.next_level(store, out))
    }

    /// Find the next missing entry of the active fault and request it unless
    /// another core already did.
    fn next_level(
        &mut self,
        store: &mut PageTableStore,
        out: &mut Vec<FaultRequest>,
    ) -> Option<Request> {
        let active = self.active.as_mut()?;
        let vaddress = active.request.vaddress;
        let Some(level) = store.first_unmapped_level(vaddress) else {
            let active = self.active.take()?;
            if active.owns_page {
                store.end_page_fault(vaddress);
            }
            log::debug!(target: "fault", "core {}: {} is mapped", self.core, vaddress);
            return Some(active.request);
        };
        let index = store.index(level, vaddress);
        active.level = level;
        active.index = index;
        if store.begin_fault(level, index) {
            active.issued = true;
            out.push(FaultRequest {
                core: self.core,
                level,
                index,
                size: self.frame_size,
            });
        } else {
            log::trace!(
                target: "fault",
                "core {}: {level} entry {index:#x} for {vaddress} is being resolved by another \
                 core",
                self.core
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Address, PAGE_2MB, PAGE_4KB};

    fn frame() -> MemorySize {
        MemorySize::new(PAGE_4KB).unwrap()
    }

    fn respond(request: &FaultRequest, paddress: u64, size: u64) -> FaultResponse {
        FaultResponse {
            core: request.core,
            vaddress: request.index,
            paddress: Address(paddress),
            size: MemorySize::new(size).unwrap(),
        }
    }

    #[test]
    fn test_fresh_address_space_walk() {
        let mut store = PageTableStore::new(false);
        let mut engine = FaultEngine::new(0, frame());
        let request = Request::new(7, Address(0x1000), 8, false);
        engine.enqueue(request);
        assert!(engine.is_holding());
        let mut out = vec![];
        assert_eq!(engine.advance(&mut store, &mut out), None);

        let expected = [
            (TableLevel::Cr3, 0),
            (TableLevel::Pgd, 0),
            (TableLevel::Pud, 0),
            (TableLevel::Pmd, 0),
            (TableLevel::Pte, 1),
        ];
        for (i, (level, index)) in expected.into_iter().enumerate() {
            assert_eq!(out.len(), 1, "step {i}");
            let fault = out.pop().unwrap();
            assert_eq!((fault.level, fault.index), (level, index));
            assert_eq!(engine.state(), FaultState::Await(level));
            // Nothing happens until the response arrives.
            assert_eq!(engine.advance(&mut store, &mut out), None);
            assert!(out.is_empty());
            let done = engine
                .on_response(
                    &mut store,
                    respond(&fault, 0x10_0000 + i as u64 * PAGE_4KB, PAGE_4KB),
                    &mut out,
                )
                .unwrap();
            if level == TableLevel::Pte {
                assert_eq!(done, Some(request));
            } else {
                assert_eq!(done, None);
            }
        }
        assert!(out.is_empty());
        assert_eq!(engine.state(), FaultState::Idle);
        assert!(!engine.is_holding());
        assert!(store.is_mapped_4kb(Address(0x1000)));
        assert!(!store.has_pending_faults(Address(0x1000)));
        assert_eq!(store.translate(Address(0x1abc)), Some(Address(0x10_4abc)));
    }

    #[test]
    fn test_second_core_waits_for_first() {
        let mut store = PageTableStore::new(false);
        let mut first = FaultEngine::new(0, frame());
        let mut second = FaultEngine::new(1, frame());
        let mut out = vec![];
        first.enqueue(Request::new(1, Address(0x1000), 8, false));
        second.enqueue(Request::new(2, Address(0x2000), 8, false));
        first.advance(&mut store, &mut out);
        second.advance(&mut store, &mut out);
        // Only the first core asks for the root table.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].core, 0);
        assert_eq!(second.state(), FaultState::Await(TableLevel::Cr3));
        assert!(second.is_holding());

        let mut first_out = vec![];
        let fault = out.pop().unwrap();
        let response = respond(&fault, 0x1000, PAGE_4KB);
        first
            .on_response(&mut store, response, &mut first_out)
            .unwrap();
        assert_eq!(first_out[0].level, TableLevel::Pgd);
        // The second core now waits on the PGD entry the first one claimed.
        second.advance(&mut store, &mut out);
        assert!(out.is_empty());
        assert_eq!(second.state(), FaultState::Await(TableLevel::Pgd));

        // A response to a core that is not waiting on its own request is
        // fatal.
        let response = respond(&first_out[0], 0x2000, PAGE_4KB);
        let err = second
            .on_response(&mut store, response, &mut out)
            .unwrap_err();
        assert!(matches!(err, SimulationError::UnexpectedFaultResponse { core: 1, .. }));
    }

    #[test]
    fn test_duplicate_entry_is_fatal() {
        let mut store = PageTableStore::new(false);
        let mut engine = FaultEngine::new(3, frame());
        let mut out = vec![];
        engine.enqueue(Request::new(1, Address(0x1000), 8, false));
        engine.advance(&mut store, &mut out);
        let fault = out.pop().unwrap();
        // Someone else filled the root table behind our back.
        store
            .fill(TableLevel::Cr3, 0, Address(0x9000), PAGE_4KB)
            .unwrap();
        let err = engine
            .on_response(&mut store, respond(&fault, 0x1000, PAGE_4KB), &mut out)
            .unwrap_err();
        assert_eq!(
            err,
            SimulationError::DuplicateTableEntry {
                core: 3,
                level: TableLevel::Cr3,
                index: 0,
                address: Address(0x1000),
            }
        );
    }

    #[test]
    fn test_large_page_response_ends_walk_early() {
        let mut store = PageTableStore::new(false);
        let mut engine = FaultEngine::new(0, frame());
        let mut out = vec![];
        let request = Request::new(1, Address(PAGE_2MB + 0x3000), 8, false);
        engine.enqueue(request);
        engine.advance(&mut store, &mut out);
        let mut done = None;
        let mut steps = 0;
        while let Some(fault) = out.pop() {
            steps += 1;
            let size = if fault.level == TableLevel::Pmd {
                PAGE_2MB
            } else {
                PAGE_4KB
            };
            done = engine
                .on_response(&mut store, respond(&fault, 0x4000_0000, size), &mut out)
                .unwrap();
        }
        assert_eq!(steps, 4);
        assert_eq!(done, Some(request));
        assert_eq!(store.mapped_page_size(request.vaddress), Some(PAGE_2MB));
        assert_eq!(store.translate(Address(PAGE_2MB + 0x3000)), Some(Address(0x4000_3000)));
    }

    #[test]
    fn test_already_mapped_page_resolves_without_requests() {
        let mut store = PageTableStore::new(true);
        for (level, index) in [
            (TableLevel::Cr3, 0),
            (TableLevel::Pgd, 0),
            (TableLevel::Pud, 0),
            (TableLevel::Pmd, 0),
            (TableLevel::Pte, 1),
        ] {
            store
                .fill(level, index, Address(0x1000 * (index + 1)), PAGE_4KB)
                .unwrap();
        }
        let mut engine = FaultEngine::new(0, frame());
        let request = Request::new(1, Address(0x1000), 8, false);
        engine.enqueue(request);
        let mut out = vec![];
        assert_eq!(engine.advance(&mut store, &mut out), Some(request));
        assert!(out.is_empty());
        assert!(!engine.is_holding());
    }
}
