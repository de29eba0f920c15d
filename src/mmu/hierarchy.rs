// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Translation hierarchy of one core: TLB levels `L1..Ln` backed by a page
//! table walker.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use super::{level::TlbLevel, walker::PageTableWalker};
use crate::{
    config::HierarchyConfig,
    error::{ConfigError, SimulationError},
    memory::{Address, PageTableStore},
    request::{CoreId, FaultRequest, FaultResponse, MemoryRequest, MemoryResponse, Request},
};

/// Where the misses of a level go.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NextStage {
    /// The TLB level with this 0-based index.
    Level(usize),
    Walker,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Running,
    /// A page fault is being resolved; only the walker advances.
    StalledOnFault,
    /// Cached translations are being invalidated; nothing is dispatched.
    InShootdown,
}

#[derive(Debug)]
pub struct TlbHierarchy {
    core: CoreId,
    levels: Vec<TlbLevel>,
    walker: PageTableWalker,
    /// Translate through the simulated page table instead of identity.
    emulate_faults: bool,
    max_shootdown_width: usize,
    invalid_addresses: VecDeque<Address>,
    status: Status,
    translated: VecDeque<Request>,
    misses: Vec<Request>,
}

impl TlbHierarchy {
    pub fn new(
        core: CoreId,
        config: &HierarchyConfig,
        store: Rc<RefCell<PageTableStore>>,
    ) -> Result<Self, ConfigError> {
        let levels = config
            .levels
            .iter()
            .enumerate()
            .map(|(i, level)| TlbLevel::new(i + 1, level.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            core,
            levels,
            walker: PageTableWalker::new(core, config.walker.clone(), store)?,
            emulate_faults: config.walker.emulate_faults,
            max_shootdown_width: config.max_shootdown_width,
            invalid_addresses: VecDeque::new(),
            status: Status::Running,
            translated: VecDeque::new(),
            misses: vec![],
        })
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Status as of the last tick.
    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    /// TLB level with 0-based index `index`.
    pub fn level(&self, index: usize) -> Option<&TlbLevel> {
        self.levels.get(index)
    }

    #[inline]
    pub fn walker(&self) -> &PageTableWalker {
        &self.walker
    }

    /// Stage the misses of level `index` are forwarded to.
    pub fn next_stage(&self, index: usize) -> NextStage {
        if index + 1 < self.levels.len() {
            NextStage::Level(index + 1)
        } else {
            NextStage::Walker
        }
    }

    pub fn is_idle(&self) -> bool {
        self.levels.iter().all(TlbLevel::is_idle)
            && self.walker.is_idle()
            && self.translated.is_empty()
            && self.invalid_addresses.is_empty()
    }

    /// Accept a request from the core.
    pub fn submit(&mut self, request: Request) {
        match self.levels.first_mut() {
            Some(level) => level.submit(request),
            None => self.walker.submit(request),
        }
    }

    /// Invalidate every cached translation of `addresses`, in all levels and
    /// the walk cache.
    pub fn shootdown(&mut self, addresses: impl IntoIterator<Item = Address>) {
        let before = self.invalid_addresses.len();
        self.invalid_addresses.extend(addresses);
        log::debug!(
            target: "tlb",
            "core {}: shootdown of {} address(es)",
            self.core,
            self.invalid_addresses.len() - before
        );
    }

    fn evaluate_status(&self) -> Status {
        if !self.invalid_addresses.is_empty() {
            Status::InShootdown
        } else if self.walker.is_holding() {
            Status::StalledOnFault
        } else {
            Status::Running
        }
    }

    pub fn tick(&mut self, cycle: u64) -> Result<(), SimulationError> {
        let status = self.evaluate_status();
        if status != self.status {
            log::trace!(target: "tlb", "core {}: {:?} -> {:?}", self.core, self.status, status);
            self.status = status;
        }
        match status {
            Status::Running => self.tick_levels(cycle),
            Status::InShootdown => self.invalidate_batch(),
            Status::StalledOnFault => {}
        }
        self.walker.tick(cycle)?;
        if let Some(last) = self.levels.last_mut() {
            for completion in self.walker.drain_completions() {
                last.push_back(completion);
            }
        }
        if status == Status::Running {
            self.route_completions();
        }
        Ok(())
    }

    fn tick_levels(&mut self, cycle: u64) {
        for index in 0..self.levels.len() {
            self.levels[index].tick(cycle, &mut self.misses);
            let stage = self.next_stage(index);
            for request in self.misses.drain(..) {
                match stage {
                    NextStage::Level(next) => self.levels[next].submit(request),
                    NextStage::Walker => self.walker.submit(request),
                }
            }
        }
    }

    fn route_completions(&mut self) {
        for index in (1..self.levels.len()).rev() {
            let (upper, lower) = self.levels.split_at_mut(index);
            for completion in lower[0].drain_completions() {
                upper[index - 1].push_back(completion);
            }
        }
        let completions = match self.levels.first_mut() {
            Some(first) => first.drain_completions().collect::<Vec<_>>(),
            None => self.walker.drain_completions().collect(),
        };
        for completion in completions {
            let request = self.translate(completion.request);
            log::trace!(
                target: "tlb",
                "core {}: {} -> {:?}",
                self.core,
                request.vaddress,
                request.paddress
            );
            self.translated.push_back(request);
        }
    }

    fn translate(&self, mut request: Request) -> Request {
        let paddress = if self.emulate_faults {
            self.walker.store().borrow().translate(request.vaddress)
        } else {
            None
        };
        request.paddress = Some(paddress.unwrap_or(request.vaddress));
        request
    }

    fn invalidate_batch(&mut self) {
        for _ in 0..self.max_shootdown_width {
            let Some(address) = self.invalid_addresses.pop_front() else {
                break;
            };
            let mut dropped = self.walker.invalidate(address);
            for level in &mut self.levels {
                dropped += level.invalidate(address);
            }
            log::trace!(
                target: "tlb",
                "core {}: invalidated {dropped} entries for {address}",
                self.core
            );
        }
    }

    /// Translated requests, with their physical address filled in.
    pub fn drain_translated(&mut self) -> impl Iterator<Item = Request> + '_ {
        self.translated.drain(..)
    }

    pub fn drain_fault_requests(&mut self) -> impl Iterator<Item = FaultRequest> + '_ {
        self.walker.drain_fault_requests()
    }

    pub fn drain_memory_requests(&mut self) -> impl Iterator<Item = MemoryRequest> + '_ {
        self.walker.drain_memory_requests()
    }

    pub fn handle_fault_response(
        &mut self,
        response: FaultResponse,
    ) -> Result<(), SimulationError> {
        self.walker.handle_fault_response(response)
    }

    pub fn handle_memory_response(
        &mut self,
        response: MemoryResponse,
    ) -> Result<(), SimulationError> {
        self.walker.handle_memory_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Params,
        memory::{MemorySize, TableLevel, PAGE_4KB},
        request::RequestId,
    };

    fn hierarchy(params: Params) -> TlbHierarchy {
        let config = HierarchyConfig::from_params(&params).unwrap();
        let store = Rc::new(RefCell::new(PageTableStore::new(config.walker.confined)));
        TlbHierarchy::new(0, &config, store).unwrap()
    }

    fn request(id: RequestId, vaddress: u64) -> Request {
        Request::new(id, Address(vaddress), 8, false)
    }

    /// Tick from `start` until something is translated.
    fn run_until_translated(h: &mut TlbHierarchy, start: u64) -> (u64, Vec<Request>) {
        for cycle in start..start + 10_000 {
            h.tick(cycle).unwrap();
            let translated = h.drain_translated().collect::<Vec<_>>();
            if !translated.is_empty() {
                return (cycle, translated);
            }
        }
        panic!("nothing translated after {start}");
    }

    #[test]
    fn test_routing() {
        let mut h = hierarchy(
            Params::default()
                .with("levels", 2)
                .with("latency_L1", 1)
                .with("latency_L2", 3),
        );
        assert_eq!(h.next_stage(0), NextStage::Level(1));
        assert_eq!(h.next_stage(1), NextStage::Walker);
        h.submit(request(1, 0x1234));
        let (cycle, translated) = run_until_translated(&mut h, 0);
        // Walk done at 130, then a cycle to drain plus the latency of each
        // level on the way up.
        assert_eq!(cycle, 136);
        assert_eq!(translated.len(), 1);
        assert_eq!(translated[0].paddress, Some(Address(0x1234)));
        assert_eq!(translated[0].base_address(), Some(Address(0x1200)));

        h.submit(request(2, 0x1ff0));
        let (cycle, _) = run_until_translated(&mut h, 137);
        assert_eq!(cycle, 138);
        assert!(h.is_idle());
    }

    #[test]
    fn test_same_page_misses_walk_once() {
        let mut h = hierarchy(Params::default());
        for id in 0..3 {
            h.submit(request(id, 0x7000 + id * 8));
        }
        h.tick(0).unwrap();
        assert_eq!(h.level(0).unwrap().outstanding(), 1);
        assert_eq!(h.walker().outstanding(), 1);
        let (_, translated) = run_until_translated(&mut h, 1);
        assert_eq!(
            translated.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(h.level(0).unwrap().outstanding(), 0);
    }

    #[test]
    fn test_page_fault_stalls_the_core() {
        let mut h = hierarchy(Params::default().with("emulate_faults", 1));
        h.submit(request(1, 0x1000));
        h.tick(0).unwrap();
        assert_eq!(h.status(), Status::Running);
        let mut faults = h.drain_fault_requests().collect::<Vec<_>>();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].level, TableLevel::Cr3);

        h.submit(request(2, 0x1008));
        h.tick(1).unwrap();
        assert_eq!(h.status(), Status::StalledOnFault);
        assert_eq!(h.level(0).unwrap().queued(), 1);

        let mut cycle = 1;
        let mut frame = 0x10_0000;
        while let Some(fault) = faults.pop() {
            cycle += 1;
            h.tick(cycle).unwrap();
            assert_eq!(h.status(), Status::StalledOnFault);
            h.handle_fault_response(FaultResponse {
                core: 0,
                vaddress: fault.index,
                paddress: Address(frame),
                size: MemorySize::new(PAGE_4KB).unwrap(),
            })
            .unwrap();
            frame += PAGE_4KB;
            faults.extend(h.drain_fault_requests());
        }
        // The second request joins the first one's miss once the core runs
        // again.
        let (_, translated) = run_until_translated(&mut h, cycle + 1);
        assert_eq!(h.status(), Status::Running);
        assert_eq!(
            translated
                .iter()
                .map(|r| (r.id, r.paddress))
                .collect::<Vec<_>>(),
            vec![
                (1, Some(Address(0x10_4000))),
                (2, Some(Address(0x10_4008))),
            ]
        );
    }

    #[test]
    fn test_shootdown_invalidates_cached_translations() {
        let mut h = hierarchy(Params::default().with("max_shootdown_width", 1));
        h.submit(request(1, 0x3000));
        let (cycle, _) = run_until_translated(&mut h, 0);
        assert_eq!(h.level(0).unwrap().cache().lookup(Address(0x3000)), Some(0));
        assert!(h.walker().cache().lookup(Address(0x3000)).is_some());

        h.shootdown([Address(0x3000), Address(0x9000)]);
        h.submit(request(2, 0x3000));
        h.tick(cycle + 1).unwrap();
        assert_eq!(h.status(), Status::InShootdown);
        assert_eq!(h.level(0).unwrap().cache().lookup(Address(0x3000)), None);
        assert!(h.walker().cache().lookup(Address(0x3000)).is_none());
        assert_eq!(h.level(0).unwrap().queued(), 1);
        h.tick(cycle + 2).unwrap();
        assert_eq!(h.status(), Status::InShootdown);
        h.tick(cycle + 3).unwrap();
        assert_eq!(h.status(), Status::Running);
        assert_eq!(h.level(0).unwrap().queued(), 0);
        assert_eq!(h.level(0).unwrap().outstanding(), 1);
    }
}
