// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Page fault handler handing out frames of physical memory in order.

use super::{DelayQueue, PageFaultHandler};
use crate::{
    error::SimulationError,
    memory::{Address, MemorySize},
    request::{FaultRequest, FaultResponse},
};

#[derive(Debug)]
pub struct FrameAllocator {
    frame_size: MemorySize,
    memory_size: MemorySize,
    base: Address,
    /// Offset of the next free frame from `base`.
    next: u64,
    pending: DelayQueue<FaultResponse>,
}

impl FrameAllocator {
    /// Allocator of `frame_size` frames over `memory_size` bytes, answering
    /// after `latency` cycles.
    pub const fn new(latency: u64, frame_size: MemorySize, memory_size: MemorySize) -> Self {
        Self {
            frame_size,
            memory_size,
            base: Address(0),
            next: 0,
            pending: DelayQueue::new(latency),
        }
    }

    /// Start handing out frames at `base` instead of zero.
    pub const fn with_base(mut self, base: Address) -> Self {
        self.base = base;
        self
    }

    /// Frames handed out so far.
    #[inline]
    pub fn allocated(&self) -> u64 {
        self.next / self.frame_size.get()
    }

    /// Frames still available.
    pub fn remaining(&self) -> u64 {
        (self.memory_size.get() - self.next) / self.frame_size.get()
    }
}

impl PageFaultHandler for FrameAllocator {
    fn allocate_page(&mut self, cycle: u64, request: FaultRequest) -> Result<(), SimulationError> {
        if request.size.pages(self.frame_size) != 1 {
            return Err(SimulationError::MultiPageAllocation {
                core: request.core,
                size: request.size,
                frame_size: self.frame_size,
            });
        }
        if self.remaining() == 0 {
            log::error!(
                target: "allocator",
                "memory is drained out: {} frames of {} allocated",
                self.allocated(),
                self.frame_size
            );
            return Err(SimulationError::MemoryDrained {
                core: request.core,
                level: request.level,
                index: request.index,
            });
        }
        let paddress = Address(self.base.0 + self.next);
        self.next += self.frame_size.get();
        log::debug!(
            target: "allocator",
            "core {}: {} entry {:#x} gets frame {paddress}",
            request.core,
            request.level,
            request.index
        );
        self.pending.push(
            cycle,
            FaultResponse {
                core: request.core,
                vaddress: request.index,
                paddress,
                size: request.size,
            },
        );
        Ok(())
    }

    fn tick(&mut self, cycle: u64) -> Vec<FaultResponse> {
        self.pending.pop_ready(cycle)
    }
}
