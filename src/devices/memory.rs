// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Memory backend with a fixed access latency.

use super::{DelayQueue, MemoryBackend};
use crate::request::{MemoryRequest, MemoryResponse};

#[derive(Debug)]
pub struct FixedLatencyMemory {
    pending: DelayQueue<MemoryResponse>,
    reads: u64,
}

impl FixedLatencyMemory {
    pub const fn new(latency: u64) -> Self {
        Self {
            pending: DelayQueue::new(latency),
            reads: 0,
        }
    }

    /// Reads served so far, including the ones still in flight.
    #[inline]
    pub fn reads(&self) -> u64 {
        self.reads
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl MemoryBackend for FixedLatencyMemory {
    fn send(&mut self, cycle: u64, request: MemoryRequest) {
        log::trace!(
            target: "memory",
            "core {}: read {} of {} bytes at {}",
            request.core,
            request.id,
            request.size,
            request.address
        );
        self.reads += 1;
        self.pending.push(
            cycle,
            MemoryResponse {
                id: request.id,
                core: request.core,
            },
        );
    }

    fn tick(&mut self, cycle: u64) -> Vec<MemoryResponse> {
        self.pending.pop_ready(cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Address;

    #[test]
    fn test_reads_complete_after_latency() {
        let mut memory = FixedLatencyMemory::new(100);
        for id in 0..2 {
            memory.send(
                id * 10,
                MemoryRequest {
                    id,
                    core: 3,
                    address: Address(0x1000 + id * 64),
                    size: 64,
                },
            );
        }
        assert!(memory.tick(99).is_empty());
        assert_eq!(memory.tick(100), vec![MemoryResponse { id: 0, core: 3 }]);
        assert_eq!(memory.in_flight(), 1);
        assert_eq!(memory.tick(110), vec![MemoryResponse { id: 1, core: 3 }]);
        assert_eq!(memory.reads(), 2);
    }
}
