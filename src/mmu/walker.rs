// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Page table walker
//!
//! The last stage of a translation hierarchy. The walker keeps a cache of
//! upper level table entries (the walk cache): a hit in its `n`-th class means
//! the `n` table levels above the leaf are already known and only the
//! remaining ones have to be read.
//!
//! Table reads are either charged a fixed `page_walk_latency` each
//! (`self_connected`) or sent one after the other to the memory backend.
//! With fault emulation on, a walk for an unmapped page first has the missing
//! tables allocated by the [`FaultEngine`].

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use indexmap::IndexMap;

use super::{
    fault::{FaultEngine, FaultState},
    level::{schedule, take_ready, Scheduled},
};
use crate::{
    config::WalkerConfig,
    error::{ConfigError, SimulationError},
    memory::{
        Address, PageTableStore, TableLevel, TranslationCache, CACHE_LINE_SIZE, DESCRIPTOR_SIZE,
        PAGE_1GB, PAGE_2MB,
    },
    request::{
        Completion, CoreId, FaultRequest, FaultResponse, MemoryRequest, MemoryResponse, Request,
        RequestId,
    },
};

/// Tables read by a full walk, root first.
const WALK_LEVELS: [TableLevel; 4] = [
    TableLevel::Pgd,
    TableLevel::Pud,
    TableLevel::Pmd,
    TableLevel::Pte,
];

/// A walk waiting for one of its table reads.
#[derive(Copy, Clone, Debug)]
struct Walk {
    request: Request,
    level: TableLevel,
    leaf: TableLevel,
    page_size: u64,
}

#[derive(Debug)]
pub struct PageTableWalker {
    core: CoreId,
    config: WalkerConfig,
    cache: TranslationCache,
    store: Rc<RefCell<PageTableStore>>,
    not_serviced: VecDeque<Request>,
    /// Walks in the memory backend, by id of their outstanding read.
    walks: IndexMap<u64, Walk>,
    ready_by: IndexMap<RequestId, Scheduled>,
    service_back: VecDeque<Completion>,
    faults: FaultEngine,
    memory_requests: Vec<MemoryRequest>,
    fault_requests: Vec<FaultRequest>,
    next_memory_id: u64,
    now: u64,
}

impl PageTableWalker {
    pub fn new(
        core: CoreId,
        config: WalkerConfig,
        store: Rc<RefCell<PageTableStore>>,
    ) -> Result<Self, ConfigError> {
        let cache = TranslationCache::new(&config.classes)?;
        let faults = FaultEngine::new(core, config.frame_size);
        Ok(Self {
            core,
            config,
            cache,
            store,
            not_serviced: VecDeque::new(),
            walks: IndexMap::new(),
            ready_by: IndexMap::new(),
            service_back: VecDeque::new(),
            faults,
            memory_requests: vec![],
            fault_requests: vec![],
            next_memory_id: 0,
            now: 0,
        })
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// The walk cache.
    #[inline]
    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    #[inline]
    pub fn store(&self) -> &Rc<RefCell<PageTableStore>> {
        &self.store
    }

    pub fn state(&self) -> FaultState {
        self.faults.state()
    }

    /// Whether the core must stall on a page fault.
    pub fn is_holding(&self) -> bool {
        self.faults.is_holding()
    }

    /// Walks in progress, not counting faults.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.walks.len() + self.ready_by.len()
    }

    pub fn is_idle(&self) -> bool {
        self.not_serviced.is_empty()
            && self.walks.is_empty()
            && self.ready_by.is_empty()
            && self.service_back.is_empty()
            && !self.faults.is_holding()
    }

    /// Accept a miss from the last TLB level.
    pub fn submit(&mut self, request: Request) {
        self.not_serviced.push_back(request);
    }

    pub fn drain_completions(&mut self) -> impl Iterator<Item = Completion> + '_ {
        self.service_back.drain(..)
    }

    /// Allocation requests for the page fault handler.
    pub fn drain_fault_requests(&mut self) -> impl Iterator<Item = FaultRequest> + '_ {
        self.fault_requests.drain(..)
    }

    /// Table reads for the memory backend.
    pub fn drain_memory_requests(&mut self) -> impl Iterator<Item = MemoryRequest> + '_ {
        self.memory_requests.drain(..)
    }

    /// Drop walk cache entries for `vaddress`.
    pub fn invalidate(&mut self, vaddress: Address) -> usize {
        self.cache.invalidate(vaddress)
    }

    pub fn tick(&mut self, cycle: u64) -> Result<(), SimulationError> {
        self.now = cycle;
        if self.config.emulate_faults {
            self.advance_faults();
        }
        self.dispatch();
        self.serve_ready();
        Ok(())
    }

    fn advance_faults(&mut self) {
        loop {
            let resolved = {
                let mut store = self.store.borrow_mut();
                self.faults.advance(&mut store, &mut self.fault_requests)
            };
            match resolved {
                Some(request) => self.start_walk(request),
                None => break,
            }
        }
    }

    fn dispatch(&mut self) {
        let mut examined = 0;
        while examined < self.config.max_width {
            if self.outstanding() >= self.config.max_outstanding {
                break;
            }
            let Some(request) = self.not_serviced.pop_front() else {
                break;
            };
            examined += 1;
            let unmapped = self.config.emulate_faults
                && self
                    .store
                    .borrow()
                    .first_unmapped_level(request.vaddress)
                    .is_some();
            if unmapped {
                self.faults.enqueue(request);
                self.advance_faults();
            } else {
                self.start_walk(request);
            }
        }
    }

    /// Walk the table for a mapped page, or a page whose mapping is not
    /// modeled.
    fn start_walk(&mut self, request: Request) {
        let page_size = self.page_size(request.vaddress);
        let leaf = match page_size {
            PAGE_1GB => TableLevel::Pud,
            PAGE_2MB => TableLevel::Pmd,
            _ => TableLevel::Pte,
        };
        let full_walk = WALK_LEVELS
            .iter()
            .position(|level| *level == leaf)
            .map_or(WALK_LEVELS.len(), |i| i + 1);
        // Classes of the walk cache beyond the leaf cover levels a huge page
        // walk never reads.
        let skipped = WALK_LEVELS.len() - full_walk;
        let cached = match self.cache.lookup(request.vaddress) {
            Some(class) => {
                self.cache.update_lru(request.vaddress, class);
                class
            }
            None => WALK_LEVELS.len(),
        };
        let reads = cached.saturating_sub(skipped);
        log::trace!(
            target: "ptw",
            "core {}: walk for {} reads {reads} table(s)",
            self.core,
            request.vaddress
        );
        if reads == 0 || self.config.self_connected {
            let ready_at = self
                .now
                .saturating_add(self.config.latency)
                .saturating_add((reads as u64).saturating_mul(self.config.page_walk_latency));
            schedule(&mut self.ready_by, request, ready_at, page_size);
            return;
        }
        let walk = Walk {
            request,
            level: WALK_LEVELS[full_walk - reads],
            leaf,
            page_size,
        };
        self.issue_read(walk);
    }

    fn page_size(&self, vaddress: Address) -> u64 {
        if self.config.emulate_faults {
            if let Some(page_size) = self.store.borrow().mapped_page_size(vaddress) {
                return page_size;
            }
        }
        self.config.frame_size.get()
    }

    fn issue_read(&mut self, walk: Walk) {
        let address = self
            .store
            .borrow()
            .descriptor_address(walk.level, walk.request.vaddress)
            .unwrap_or_else(|| {
                let slot = walk.request.vaddress.page_number(walk.level.page_size());
                Address(slot * DESCRIPTOR_SIZE)
            })
            .line_aligned();
        let id = self.next_memory_id;
        self.next_memory_id += 1;
        log::trace!(
            target: "ptw",
            "core {}: {} read {id} at {address} for {}",
            self.core,
            walk.level,
            walk.request.vaddress
        );
        self.memory_requests.push(MemoryRequest {
            id,
            core: self.core,
            address,
            size: CACHE_LINE_SIZE,
        });
        self.walks.insert(id, walk);
    }

    /// Continue the walk whose table read completed.
    pub fn handle_memory_response(
        &mut self,
        response: MemoryResponse,
    ) -> Result<(), SimulationError> {
        let Some(walk) = self.walks.shift_remove(&response.id) else {
            return Err(SimulationError::UnexpectedMemoryResponse {
                core: self.core,
                id: response.id,
            });
        };
        match walk.level.next().filter(|_| walk.level != walk.leaf) {
            Some(level) => self.issue_read(Walk { level, ..walk }),
            None => schedule(
                &mut self.ready_by,
                walk.request,
                self.now.saturating_add(self.config.latency),
                walk.page_size,
            ),
        }
        Ok(())
    }

    /// Feed the page fault handler's answer to the fault in flight.
    pub fn handle_fault_response(
        &mut self,
        response: FaultResponse,
    ) -> Result<(), SimulationError> {
        let resolved = {
            let mut store = self.store.borrow_mut();
            self.faults.on_response(&mut store, response, &mut self.fault_requests)?
        };
        if let Some(request) = resolved {
            let page_size = self.page_size(request.vaddress);
            schedule(
                &mut self.ready_by,
                request,
                self.now.saturating_add(self.config.latency),
                page_size,
            );
        }
        Ok(())
    }

    fn serve_ready(&mut self) {
        for Scheduled {
            request, page_size, ..
        } in take_ready(&mut self.ready_by, self.now)
        {
            // A completed walk knows every table entry down to its leaf.
            for class in 0..self.cache.num_classes() {
                if self.cache.page_size(class) >= page_size {
                    self.cache.fill(request.vaddress, class);
                }
            }
            self.service_back.push_back(Completion { request, page_size });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Params,
        memory::{MemorySize, PAGE_4KB},
    };

    fn config(params: Params) -> WalkerConfig {
        WalkerConfig::from_params(&params).unwrap()
    }

    fn walker(params: Params) -> PageTableWalker {
        let config = config(params);
        let store = Rc::new(RefCell::new(PageTableStore::new(config.confined)));
        PageTableWalker::new(0, config, store).unwrap()
    }

    fn request(id: RequestId, vaddress: u64) -> Request {
        Request::new(id, Address(vaddress), 8, false)
    }

    fn completed(walker: &mut PageTableWalker) -> Vec<(RequestId, u64)> {
        walker
            .drain_completions()
            .map(|c| (c.request.id, c.page_size))
            .collect()
    }

    #[test]
    fn test_fixed_latency_walks() {
        let mut walker = walker(Params::default());
        walker.submit(request(1, 0x1000));
        walker.tick(0).unwrap();
        walker.tick(129).unwrap();
        assert!(completed(&mut walker).is_empty());
        // latency_PTWC + 4 * page_walk_latency
        walker.tick(130).unwrap();
        assert_eq!(completed(&mut walker), vec![(1, PAGE_4KB)]);

        // Same page: the whole walk is cached.
        walker.submit(request(2, 0x1ff8));
        walker.tick(200).unwrap();
        walker.tick(210).unwrap();
        assert_eq!(completed(&mut walker), vec![(2, PAGE_4KB)]);

        // Same PMD: only the PTE is read.
        walker.submit(request(3, 0x5000));
        walker.tick(300).unwrap();
        walker.tick(339).unwrap();
        assert!(completed(&mut walker).is_empty());
        walker.tick(340).unwrap();
        assert_eq!(completed(&mut walker), vec![(3, PAGE_4KB)]);
        assert!(walker.is_idle());
    }

    #[test]
    fn test_memory_backed_walk_reads_tables_in_order() {
        let mut walker = walker(Params::default().with("self_connected", 0));
        walker.submit(request(1, 0x40_0000_1000));
        walker.tick(0).unwrap();
        for step in 0..4 {
            let reads = walker.drain_memory_requests().collect::<Vec<_>>();
            assert_eq!(reads.len(), 1, "step {step}");
            assert_eq!(reads[0].size, CACHE_LINE_SIZE);
            assert_eq!(reads[0].address.0 % CACHE_LINE_SIZE, 0);
            walker.tick(10 * (step + 1)).unwrap();
            walker
                .handle_memory_response(MemoryResponse {
                    id: reads[0].id,
                    core: 0,
                })
                .unwrap();
        }
        assert_eq!(walker.drain_memory_requests().count(), 0);
        walker.tick(49).unwrap();
        assert!(completed(&mut walker).is_empty());
        walker.tick(50).unwrap();
        assert_eq!(completed(&mut walker), vec![(1, PAGE_4KB)]);

        let err = walker
            .handle_memory_response(MemoryResponse { id: 99, core: 0 })
            .unwrap_err();
        assert_eq!(err, SimulationError::UnexpectedMemoryResponse { core: 0, id: 99 });
    }

    #[test]
    fn test_outstanding_walks_are_bounded() {
        let mut walker = walker(Params::default().with("max_outstanding_PTWC", 2));
        for id in 0..3 {
            walker.submit(request(id, id * PAGE_2MB));
        }
        walker.tick(0).unwrap();
        assert_eq!(walker.outstanding(), 2);
        walker.tick(130).unwrap();
        assert_eq!(completed(&mut walker).len(), 2);
        // The third walk starts once a slot frees up.
        walker.tick(131).unwrap();
        assert_eq!(walker.outstanding(), 1);
        // Its 1GB region was cached by the first walk: two reads left.
        walker.tick(200).unwrap();
        assert!(completed(&mut walker).is_empty());
        walker.tick(201).unwrap();
        assert_eq!(completed(&mut walker), vec![(2, PAGE_4KB)]);
    }

    #[test]
    fn test_page_fault_for_fresh_address_space() {
        let mut walker = walker(Params::default().with("emulate_faults", 1));
        walker.submit(request(1, 0x1000));
        walker.tick(0).unwrap();
        assert!(walker.is_holding());

        let expected = [
            (TableLevel::Cr3, 4, 0),
            (TableLevel::Pgd, 3, 0),
            (TableLevel::Pud, 2, 0),
            (TableLevel::Pmd, 1, 0),
            (TableLevel::Pte, 0, 1),
        ];
        let mut cycle = 0;
        for (i, (level, fault_level, index)) in expected.into_iter().enumerate() {
            let faults = walker.drain_fault_requests().collect::<Vec<_>>();
            assert_eq!(faults.len(), 1, "step {i}");
            assert_eq!(faults[0].level, level);
            assert_eq!(faults[0].level.fault_level(), fault_level);
            assert_eq!(faults[0].index, index);
            assert_eq!(faults[0].size, MemorySize::new(PAGE_4KB).unwrap());
            assert_eq!(walker.state(), FaultState::Await(level));
            cycle += 100;
            walker.tick(cycle).unwrap();
            assert_eq!(walker.drain_fault_requests().count(), 0);
            walker
                .handle_fault_response(FaultResponse {
                    core: 0,
                    vaddress: index,
                    paddress: Address(0x10_0000 * (i as u64 + 1)),
                    size: MemorySize::new(PAGE_4KB).unwrap(),
                })
                .unwrap();
        }
        assert_eq!(walker.drain_fault_requests().count(), 0);
        assert!(!walker.is_holding());
        assert_eq!(walker.state(), FaultState::Idle);
        let store = walker.store().borrow();
        assert!(store.is_mapped_4kb(Address(0x1000)));
        assert_eq!(store.index(TableLevel::Pte, Address(0x1000)), 1);
        assert!(!store.has_pending_faults(Address(0x1000)));
        drop(store);

        walker.tick(cycle + 10).unwrap();
        assert_eq!(completed(&mut walker), vec![(1, PAGE_4KB)]);
        // The next page reuses every table and only faults in its frame.
        walker.submit(request(2, 0x2000));
        walker.tick(cycle + 11).unwrap();
        let faults = walker.drain_fault_requests().collect::<Vec<_>>();
        assert_eq!(faults.len(), 1);
        assert_eq!((faults[0].level, faults[0].index), (TableLevel::Pte, 2));
    }

    #[test]
    fn test_mapped_pages_walk_without_faults() {
        let mut walker = walker(Params::default().with("emulate_faults", 1));
        {
            let mut store = walker.store().borrow_mut();
            store
                .fill(TableLevel::Cr3, 0, Address(0x1000), PAGE_4KB)
                .unwrap();
            store
                .fill(TableLevel::Pgd, 0, Address(0x2000), PAGE_4KB)
                .unwrap();
            store
                .fill(TableLevel::Pud, 0, Address(0x3000), PAGE_4KB)
                .unwrap();
            store
                .fill(TableLevel::Pmd, 0, Address(0x20_0000), PAGE_2MB)
                .unwrap();
        }
        walker.submit(request(1, 0x1_2345));
        walker.tick(0).unwrap();
        assert!(!walker.is_holding());
        assert_eq!(walker.drain_fault_requests().count(), 0);
        // A 2MB page is three table reads deep.
        walker.tick(99).unwrap();
        assert!(completed(&mut walker).is_empty());
        walker.tick(100).unwrap();
        assert_eq!(completed(&mut walker), vec![(1, PAGE_2MB)]);
        assert_eq!(walker.cache().lookup(Address(0x1f_f000)), Some(1));
    }

    #[test]
    fn test_unexpected_fault_response() {
        let mut walker = walker(Params::default().with("emulate_faults", 1));
        let err = walker
            .handle_fault_response(FaultResponse {
                core: 0,
                vaddress: 0,
                paddress: Address(0x1000),
                size: MemorySize::new(PAGE_4KB).unwrap(),
            })
            .unwrap_err();
        assert!(matches!(err, SimulationError::UnexpectedFaultResponse { core: 0, .. }));
    }

    #[test]
    fn test_huge_walk_latency_saturates() {
        let mut walker = walker(
            Params::default()
                .with("latency_PTWC", u64::MAX)
                .with("page_walk_latency", u64::MAX),
        );
        walker.submit(request(1, 0x1000));
        walker.tick(1).unwrap();
        walker.tick(1_000_000).unwrap();
        assert!(completed(&mut walker).is_empty());
        assert_eq!(walker.outstanding(), 1);
        walker.tick(u64::MAX).unwrap();
        assert_eq!(completed(&mut walker), vec![(1, PAGE_4KB)]);
    }
}
