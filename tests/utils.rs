// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use tlbsim::{
    config::{Params, SystemConfig},
    devices::{FixedLatencyMemory, FrameAllocator, MemoryBackend, PageFaultHandler},
    error::SimulationError,
    machine::System,
    memory::{Address, MemorySize},
    request::{CoreId, FaultRequest, FaultResponse, MemoryRequest, MemoryResponse, Request},
};

#[macro_export]
macro_rules! assert_hex_eq {
    ($left: expr, $right: expr$(,)?) => {{
        let left: u64 = $left;
        let right: u64 = $right;
        assert_eq!(
            left,
            right,
            "Comparing {left_s} with {right_s} failed:\n0x{left:016x} {left_s}\n0x{right:016x} \
             {right_s}",
            left_s = stringify!($left),
            right_s = stringify!($right),
            left = left,
            right = right,
        );
    }};
}

/// Cycle each request reached a collaborator, in order.
pub type Log<T> = Rc<RefCell<Vec<(u64, T)>>>;

/// Frame allocator remembering every request it was sent.
#[derive(Debug)]
pub struct RecordingHandler {
    inner: FrameAllocator,
    log: Log<FaultRequest>,
}

impl PageFaultHandler for RecordingHandler {
    fn allocate_page(&mut self, cycle: u64, request: FaultRequest) -> Result<(), SimulationError> {
        self.log.borrow_mut().push((cycle, request));
        self.inner.allocate_page(cycle, request)
    }

    fn tick(&mut self, cycle: u64) -> Vec<FaultResponse> {
        self.inner.tick(cycle)
    }
}

/// Memory backend remembering every read it was sent.
#[derive(Debug)]
pub struct RecordingMemory {
    inner: FixedLatencyMemory,
    log: Log<MemoryRequest>,
}

impl MemoryBackend for RecordingMemory {
    fn send(&mut self, cycle: u64, request: MemoryRequest) {
        self.log.borrow_mut().push((cycle, request));
        self.inner.send(cycle, request);
    }

    fn tick(&mut self, cycle: u64) -> Vec<MemoryResponse> {
        self.inner.tick(cycle)
    }
}

pub fn params(values: &[(&str, u64)]) -> Params {
    values
        .iter()
        .fold(Params::default(), |params, (key, value)| params.with(key, *value))
}

pub fn config(values: &[(&str, u64)]) -> SystemConfig {
    SystemConfig::from_params(&params(values)).unwrap()
}

pub struct TestSystem {
    pub system: System,
    pub faults: Log<FaultRequest>,
    pub reads: Log<MemoryRequest>,
}

/// A system whose collaborators record their traffic. Frames are handed out
/// from `0x8000_0000` on.
pub fn make_test_system(config: SystemConfig) -> TestSystem {
    let faults = Log::<FaultRequest>::default();
    let reads = Log::<MemoryRequest>::default();
    let handler = RecordingHandler {
        inner: FrameAllocator::new(
            config.allocator_latency,
            config.hierarchy.walker.frame_size,
            config.memory_size,
        )
        .with_base(Address(0x8000_0000)),
        log: Rc::clone(&faults),
    };
    let memory = RecordingMemory {
        inner: FixedLatencyMemory::new(config.memory_latency),
        log: Rc::clone(&reads),
    };
    let system = System::with_collaborators(config, Box::new(handler), Box::new(memory)).unwrap();
    TestSystem {
        system,
        faults,
        reads,
    }
}

/// Tick until nothing is left in flight, returning every translation with
/// the cycle it completed in.
pub fn run_until_idle(system: &mut System, max_cycles: u64) -> Vec<(u64, CoreId, Request)> {
    let mut translated = vec![];
    let start = system.cycle();
    loop {
        let cycle = system.cycle();
        assert!(
            cycle - start < max_cycles,
            "still busy after {max_cycles} cycles"
        );
        system.tick().unwrap();
        translated.extend(
            system
                .drain_translated()
                .into_iter()
                .map(|(core, request)| (cycle, core, request)),
        );
        if system.is_idle() {
            return translated;
        }
    }
}

pub fn frame(n: u64) -> Address {
    Address(0x8000_0000 + n * 0x1000)
}

pub const fn kib(n: u64) -> MemorySize {
    match MemorySize::from_kib(n) {
        Some(size) => size,
        None => panic!("zero size"),
    }
}
