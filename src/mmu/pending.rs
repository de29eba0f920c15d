// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Outstanding misses of a TLB level.

use rustc_hash::FxHashMap;

use crate::request::{Request, RequestId};

/// Outcome of registering a miss.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MissEntry {
    /// The request must be forwarded to the next stage.
    Master,
    /// A miss for the same page is already outstanding; the request completes
    /// together with that master request.
    Joined(RequestId),
}

#[derive(Debug)]
struct PendingMiss {
    master: RequestId,
    waiters: Vec<Request>,
}

/// Misses forwarded below a level and not answered yet.
///
/// With deduplication (first level only) misses are keyed by page, so that
/// concurrent misses to one page issue a single request downwards and the
/// rest wait in a group for its completion. Otherwise every miss is tracked
/// on its own.
#[derive(Debug)]
pub struct PendingMissTable {
    /// Page size misses are grouped by, `None` if they are not grouped.
    dedup_page_size: Option<u64>,
    misses: FxHashMap<u64, PendingMiss>,
}

impl PendingMissTable {
    /// Table without deduplication.
    pub fn new() -> Self {
        Self {
            dedup_page_size: None,
            misses: FxHashMap::default(),
        }
    }

    /// Table grouping misses to the same `page_size` page.
    pub fn with_dedup(page_size: u64) -> Self {
        Self {
            dedup_page_size: Some(page_size),
            misses: FxHashMap::default(),
        }
    }

    fn key(&self, request: &Request) -> u64 {
        match self.dedup_page_size {
            Some(page_size) => request.vaddress.page_number(page_size),
            None => request.id,
        }
    }

    /// Number of requests outstanding below this level.
    #[inline]
    pub fn len(&self) -> usize {
        self.misses.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.misses.is_empty()
    }

    /// Register a miss for `request`.
    pub fn try_begin_or_join(&mut self, request: Request) -> MissEntry {
        let key = self.key(&request);
        if let Some(pending) = self.misses.get_mut(&key) {
            if self.dedup_page_size.is_some() {
                pending.waiters.push(request);
                return MissEntry::Joined(pending.master);
            }
        }
        self.misses.insert(
            key,
            PendingMiss {
                master: request.id,
                waiters: vec![],
            },
        );
        MissEntry::Master
    }

    /// Retire the miss `request` answers and return the requests that were
    /// waiting on it.
    pub fn complete(&mut self, request: &Request) -> Vec<Request> {
        let key = self.key(request);
        match self.misses.remove(&key) {
            Some(pending) => pending.waiters,
            None => {
                log::debug!(target: "tlb", "completion for {:?} without a pending miss", request);
                vec![]
            }
        }
    }

    /// Requests waiting on the outstanding miss for `request`'s page.
    pub fn waiters(&self, request: &Request) -> usize {
        self.misses
            .get(&self.key(request))
            .map_or(0, |pending| pending.waiters.len())
    }
}

impl Default for PendingMissTable {
    fn default() -> Self {
        Self::new()
    }
}
