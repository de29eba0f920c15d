// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Representation of a simulated machine: one translation hierarchy per
//! core, one page table per address space, and the page fault handler and
//! memory backend they share.

use std::{cell::RefCell, rc::Rc};

use crate::{
    config::SystemConfig,
    devices::{FixedLatencyMemory, FrameAllocator, MemoryBackend, PageFaultHandler},
    error::{ConfigError, SimulationError},
    memory::{Address, PageTableStore},
    mmu::TlbHierarchy,
    request::{CoreId, Request, RequestId},
    workload::Workload,
};

/// Outcome of [`System::run`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles simulated.
    pub cycles: u64,
    pub translated: u64,
    /// Accesses never submitted or never translated because the cycle limit
    /// was hit.
    pub unfinished: u64,
}

#[derive(Debug)]
pub struct System {
    config: SystemConfig,
    hierarchies: Vec<TlbHierarchy>,
    stores: Vec<Rc<RefCell<PageTableStore>>>,
    handler: Box<dyn PageFaultHandler>,
    memory: Box<dyn MemoryBackend>,
    cycle: u64,
    next_request_id: RequestId,
}

impl System {
    /// Machine with a [`FrameAllocator`] and a [`FixedLatencyMemory`].
    pub fn new(config: SystemConfig) -> Result<Self, ConfigError> {
        let handler = FrameAllocator::new(
            config.allocator_latency,
            config.hierarchy.walker.frame_size,
            config.memory_size,
        );
        let memory = FixedLatencyMemory::new(config.memory_latency);
        Self::with_collaborators(config, Box::new(handler), Box::new(memory))
    }

    pub fn with_collaborators(
        config: SystemConfig,
        handler: Box<dyn PageFaultHandler>,
        memory: Box<dyn MemoryBackend>,
    ) -> Result<Self, ConfigError> {
        let stores = (0..config.address_spaces())
            .map(|_| {
                Rc::new(RefCell::new(PageTableStore::new(
                    config.hierarchy.walker.confined,
                )))
            })
            .collect::<Vec<_>>();
        let hierarchies = (0..config.cores)
            .map(|core| {
                let store = Rc::clone(&stores[core / config.cores_per_process]);
                TlbHierarchy::new(core, &config.hierarchy, store)
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(
            "{} core(s) in {} address space(s), {} TLB level(s), faults {}",
            config.cores,
            stores.len(),
            config.hierarchy.levels.len(),
            if config.hierarchy.walker.emulate_faults {
                "emulated"
            } else {
                "not emulated"
            }
        );
        Ok(Self {
            config,
            hierarchies,
            stores,
            handler,
            memory,
            cycle: 0,
            next_request_id: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// The next cycle to be simulated.
    #[inline]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    #[inline]
    pub fn cores(&self) -> usize {
        self.hierarchies.len()
    }

    pub fn hierarchy(&self, core: CoreId) -> Option<&TlbHierarchy> {
        self.hierarchies.get(core)
    }

    /// Page table of the address space `core` runs in.
    pub fn store(&self, core: CoreId) -> Option<&Rc<RefCell<PageTableStore>>> {
        if core >= self.cores() {
            return None;
        }
        self.stores.get(core / self.config.cores_per_process)
    }

    pub fn is_idle(&self) -> bool {
        self.hierarchies.iter().all(TlbHierarchy::is_idle)
    }

    /// Submit an access of `core`, returning the id of its request.
    pub fn submit(
        &mut self,
        core: CoreId,
        vaddress: Address,
        size: u64,
        is_write: bool,
    ) -> Result<RequestId, SimulationError> {
        let hierarchy = self
            .hierarchies
            .get_mut(core)
            .ok_or(SimulationError::UnknownCore(core))?;
        let id = self.next_request_id;
        self.next_request_id += 1;
        hierarchy.submit(Request::new(id, vaddress, size, is_write));
        Ok(id)
    }

    /// Invalidate `addresses` in every core.
    pub fn shootdown(&mut self, addresses: &[Address]) {
        for hierarchy in &mut self.hierarchies {
            hierarchy.shootdown(addresses.iter().copied());
        }
    }

    /// Simulate one cycle.
    pub fn tick(&mut self) -> Result<(), SimulationError> {
        let cycle = self.cycle;
        for hierarchy in &mut self.hierarchies {
            hierarchy.tick(cycle)?;
            for request in hierarchy.drain_fault_requests() {
                self.handler.allocate_page(cycle, request)?;
            }
            for request in hierarchy.drain_memory_requests() {
                self.memory.send(cycle, request);
            }
        }
        for response in self.handler.tick(cycle) {
            self.hierarchies
                .get_mut(response.core)
                .ok_or(SimulationError::UnknownCore(response.core))?
                .handle_fault_response(response)?;
        }
        for response in self.memory.tick(cycle) {
            self.hierarchies
                .get_mut(response.core)
                .ok_or(SimulationError::UnknownCore(response.core))?
                .handle_memory_response(response)?;
        }
        self.cycle += 1;
        Ok(())
    }

    /// Requests translated so far, with the core that issued them.
    pub fn drain_translated(&mut self) -> Vec<(CoreId, Request)> {
        self.hierarchies
            .iter_mut()
            .flat_map(|hierarchy| {
                let core = hierarchy.core();
                hierarchy
                    .drain_translated()
                    .map(move |request| (core, request))
            })
            .collect()
    }

    /// Play `workload`, keeping up to `window` accesses of each core in
    /// flight, until every access is translated or `max_cycles` cycles have
    /// been simulated.
    pub fn run(
        &mut self,
        mut workload: Workload,
        window: usize,
        max_cycles: u64,
    ) -> Result<RunSummary, SimulationError> {
        if let Some(core) = workload.max_core().filter(|core| *core >= self.cores()) {
            return Err(SimulationError::UnknownCore(core));
        }
        let total = workload.len() as u64;
        let start = self.cycle;
        let mut in_flight = vec![0; self.cores()];
        let mut summary = RunSummary::default();
        while summary.translated < total && self.cycle - start < max_cycles {
            for (core, count) in in_flight.iter_mut().enumerate() {
                while *count < window {
                    let Some(access) = workload.next(core) else {
                        break;
                    };
                    self.submit(core, access.address, access.size, access.is_write)?;
                    *count += 1;
                }
            }
            self.tick()?;
            for (core, request) in self.drain_translated() {
                in_flight[core] = in_flight[core].saturating_sub(1);
                summary.translated += 1;
                log::debug!(
                    target: "system",
                    "cycle {}: core {core} {} {} -> {}",
                    self.cycle - 1,
                    if request.is_write { "W" } else { "R" },
                    request.vaddress,
                    request.paddress.unwrap_or(request.vaddress)
                );
            }
        }
        summary.cycles = self.cycle - start;
        summary.unfinished = total - summary.translated;
        if summary.unfinished > 0 {
            log::warn!(
                target: "system",
                "stopped after {} cycles with {} access(es) not translated",
                summary.cycles,
                summary.unfinished
            );
        }
        Ok(summary)
    }
}
