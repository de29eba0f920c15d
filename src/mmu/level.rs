// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! One level of a TLB hierarchy.

use std::collections::VecDeque;

use indexmap::IndexMap;

use super::pending::{MissEntry, PendingMissTable};
use crate::{
    config::TlbLevelConfig,
    error::ConfigError,
    memory::{Address, TranslationCache},
    request::{Completion, Request, RequestId},
};

/// A translation waiting for its latency to elapse.
#[derive(Copy, Clone, Debug)]
pub(super) struct Scheduled {
    pub request: Request,
    pub ready_at: u64,
    pub page_size: u64,
}

/// Schedule `request` to be served at `ready_at`.
pub(super) fn schedule(
    ready_by: &mut IndexMap<RequestId, Scheduled>,
    request: Request,
    ready_at: u64,
    page_size: u64,
) {
    ready_by.insert(
        request.id,
        Scheduled {
            request,
            ready_at,
            page_size,
        },
    );
}

/// Remove every scheduled translation ready at `cycle`, in scheduling order.
pub(super) fn take_ready(
    ready_by: &mut IndexMap<RequestId, Scheduled>,
    cycle: u64,
) -> Vec<Scheduled> {
    let mut ready = vec![];
    ready_by.retain(|_, scheduled| {
        if scheduled.ready_at <= cycle {
            ready.push(*scheduled);
            false
        } else {
            true
        }
    });
    ready
}

#[derive(Debug)]
pub struct TlbLevel {
    /// 1-based level number.
    level: usize,
    config: TlbLevelConfig,
    cache: TranslationCache,
    /// Requests from the level above not dispatched yet.
    not_serviced: VecDeque<Request>,
    /// Translations returned by the level below.
    pushed_back: VecDeque<Completion>,
    ready_by: IndexMap<RequestId, Scheduled>,
    /// Translations served to the level above.
    service_back: VecDeque<Completion>,
    pending: PendingMissTable,
}

impl TlbLevel {
    pub fn new(level: usize, config: TlbLevelConfig) -> Result<Self, ConfigError> {
        let cache = TranslationCache::new(&config.classes)?;
        let pending = if level == 1 {
            PendingMissTable::with_dedup(cache.page_size(0))
        } else {
            PendingMissTable::new()
        };
        Ok(Self {
            level,
            config,
            cache,
            not_serviced: VecDeque::new(),
            pushed_back: VecDeque::new(),
            ready_by: IndexMap::new(),
            service_back: VecDeque::new(),
            pending,
        })
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Misses forwarded below this level and not answered yet.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Requests waiting to be dispatched.
    #[inline]
    pub fn queued(&self) -> usize {
        self.not_serviced.len()
    }

    pub fn is_idle(&self) -> bool {
        self.not_serviced.is_empty()
            && self.pushed_back.is_empty()
            && self.ready_by.is_empty()
            && self.service_back.is_empty()
            && self.pending.is_empty()
    }

    /// Accept a request from the level above.
    pub fn submit(&mut self, request: Request) {
        self.not_serviced.push_back(request);
    }

    /// Accept a translation from the level below.
    pub fn push_back(&mut self, completion: Completion) {
        self.pushed_back.push_back(completion);
    }

    /// Translations ready for the level above.
    pub fn drain_completions(&mut self) -> impl Iterator<Item = Completion> + '_ {
        self.service_back.drain(..)
    }

    /// Drop cached translations for `vaddress`.
    pub fn invalidate(&mut self, vaddress: Address) -> usize {
        self.cache.invalidate(vaddress)
    }

    /// Advance one cycle. Requests that miss and must go to the next stage are
    /// appended to `misses`.
    pub fn tick(&mut self, cycle: u64, misses: &mut Vec<Request>) {
        self.drain_pushed_back(cycle);
        self.dispatch(cycle, misses);
        self.serve_ready(cycle);
    }

    fn drain_pushed_back(&mut self, cycle: u64) {
        let ready_at = cycle.saturating_add(self.config.latency);
        while let Some(Completion { request, page_size }) = self.pushed_back.pop_front() {
            let class = self.cache.class_for_page_size(page_size);
            self.cache.fill(request.vaddress, class);
            let waiters = self.pending.complete(&request);
            log::trace!(
                target: "tlb",
                "L{}: translation for {} returned, {} waiter(s)",
                self.level,
                request.vaddress,
                waiters.len()
            );
            schedule(&mut self.ready_by, request, ready_at, page_size);
            for waiter in waiters {
                schedule(&mut self.ready_by, waiter, ready_at, page_size);
            }
        }
    }

    fn dispatch(&mut self, cycle: u64, misses: &mut Vec<Request>) {
        let hit_latency = if self.config.parallel_mode {
            0
        } else {
            self.config.latency
        };
        let mut examined = 0;
        let mut i = 0;
        while examined < self.config.max_width && i < self.not_serviced.len() {
            examined += 1;
            let request = self.not_serviced[i];
            let hit = if self.config.perfect {
                Some(0)
            } else {
                self.cache.lookup(request.vaddress)
            };
            if let Some(class) = hit {
                self.cache.update_lru(request.vaddress, class);
                let page_size = self.cache.page_size(class);
                let ready_at = cycle.saturating_add(hit_latency);
                schedule(&mut self.ready_by, request, ready_at, page_size);
                self.not_serviced.remove(i);
                continue;
            }
            if self.pending.len() >= self.config.max_outstanding {
                log::trace!(
                    target: "tlb",
                    "L{}: {} outstanding misses, {} stays queued",
                    self.level,
                    self.pending.len(),
                    request.vaddress
                );
                i += 1;
                continue;
            }
            match self.pending.try_begin_or_join(request) {
                MissEntry::Master => {
                    log::trace!(target: "tlb", "L{}: miss for {}", self.level, request.vaddress);
                    misses.push(request);
                }
                MissEntry::Joined(master) => {
                    log::trace!(
                        target: "tlb",
                        "L{}: miss for {} joins request {master}",
                        self.level,
                        request.vaddress
                    );
                }
            }
            self.not_serviced.remove(i);
        }
    }

    fn serve_ready(&mut self, cycle: u64) {
        for Scheduled {
            request, page_size, ..
        } in take_ready(&mut self.ready_by, cycle)
        {
            let class = self.cache.class_for_page_size(page_size);
            self.cache.fill(request.vaddress, class);
            self.service_back.push_back(Completion { request, page_size });
        }
    }
}
