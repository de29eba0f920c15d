// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! # External collaborators
//!
//! The translation hierarchies talk to two components outside of them: a
//! page fault handler handing out physical frames and a memory backend
//! serving the table reads of page walks. Both must implement the respective
//! trait here; [`FrameAllocator`] and [`FixedLatencyMemory`] are the
//! implementations the simulator ships with.

use std::collections::VecDeque;

use crate::{
    error::SimulationError,
    request::{FaultRequest, FaultResponse, MemoryRequest, MemoryResponse},
};

mod allocator;
mod memory;

pub use allocator::FrameAllocator;
pub use memory::FixedLatencyMemory;

/// Component resolving page faults.
pub trait PageFaultHandler: std::fmt::Debug {
    /// Ask for a frame. The answer is returned by a later [`Self::tick`].
    fn allocate_page(&mut self, cycle: u64, request: FaultRequest) -> Result<(), SimulationError>;
    /// Answers due at `cycle`.
    fn tick(&mut self, cycle: u64) -> Vec<FaultResponse>;
}

/// Component serving the table reads of page walks.
pub trait MemoryBackend: std::fmt::Debug {
    fn send(&mut self, cycle: u64, request: MemoryRequest);
    /// Reads completed at `cycle`.
    fn tick(&mut self, cycle: u64) -> Vec<MemoryResponse>;
}

/// Messages held back for a fixed number of cycles.
#[derive(Debug)]
struct DelayQueue<T> {
    latency: u64,
    queue: VecDeque<(u64, T)>,
}

impl<T> DelayQueue<T> {
    const fn new(latency: u64) -> Self {
        Self {
            latency,
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, cycle: u64, item: T) {
        let ready_at = cycle.saturating_add(self.latency);
        // Keep the queue sorted even if callers go back in time.
        let at = self.queue.partition_point(|(ready, _)| *ready <= ready_at);
        self.queue.insert(at, (ready_at, item));
    }

    fn pop_ready(&mut self, cycle: u64) -> Vec<T> {
        let ready = self.queue.partition_point(|(at, _)| *at <= cycle);
        self.queue.drain(..ready).map(|(_, item)| item).collect()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}
