// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Set-associative translation cache
//!
//! A cache is made of independent size classes, one per supported page size,
//! each with its own set/way geometry. Entries only record that a translation
//! is present: the mapping itself lives in the page table store.
//!
//! Each set keeps a strict LRU order in the `lru` field of its ways: the
//! positions of the ways in a set are always a permutation of
//! `0..assoc`, with 0 the most recently used way and `assoc - 1` the next
//! victim.

use crate::{config::SizeClassConfig, error::ConfigError, memory::Address};

#[derive(Copy, Clone, Debug, Default)]
struct Way {
    tag: u64,
    valid: bool,
    lru: usize,
}

#[derive(Debug)]
struct SizeClass {
    page_size: u64,
    sets: usize,
    assoc: usize,
    ways: Box<[Way]>,
}

impl SizeClass {
    fn new(config: &SizeClassConfig) -> Self {
        let sets = config.entries / config.assoc;
        let ways = (0..sets)
            .flat_map(|_| {
                (0..config.assoc).map(|lru| Way {
                    tag: 0,
                    valid: false,
                    lru,
                })
            })
            .collect();
        Self {
            page_size: config.page_size.get(),
            sets,
            assoc: config.assoc,
            ways,
        }
    }

    #[inline]
    fn tag(&self, vaddress: Address) -> u64 {
        vaddress.page_number(self.page_size)
    }

    fn set(&self, tag: u64) -> &[Way] {
        let start = (tag % self.sets as u64) as usize * self.assoc;
        &self.ways[start..start + self.assoc]
    }

    fn set_mut(&mut self, tag: u64) -> &mut [Way] {
        let start = (tag % self.sets as u64) as usize * self.assoc;
        &mut self.ways[start..start + self.assoc]
    }

    fn find(&self, tag: u64) -> Option<usize> {
        self.set(tag)
            .iter()
            .position(|way| way.valid && way.tag == tag)
    }
}

/// Translation cache of one TLB level, or the walk cache of a page table
/// walker.
#[derive(Debug)]
pub struct TranslationCache {
    classes: Vec<SizeClass>,
}

impl TranslationCache {
    /// Create an empty cache.
    ///
    /// Size classes must be given in ascending page size order.
    pub fn new(classes: &[SizeClassConfig]) -> Result<Self, ConfigError> {
        if classes.is_empty() {
            return Err(ConfigError::invalid_value(
                "sizes",
                "a translation cache needs at least one page size",
            ));
        }
        for (i, class) in classes.iter().enumerate() {
            class.validate(i)?;
            if i > 0 && classes[i - 1].page_size >= class.page_size {
                return Err(ConfigError::invalid_value(
                    format!("page_size{}", i + 1),
                    "page sizes must be given in strictly ascending order",
                ));
            }
        }
        Ok(Self {
            classes: classes.iter().map(SizeClass::new).collect(),
        })
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    #[inline]
    pub fn page_size(&self, class: usize) -> u64 {
        self.classes[class].page_size
    }

    /// Find the smallest size class holding a translation for `vaddress`.
    pub fn lookup(&self, vaddress: Address) -> Option<usize> {
        self.classes
            .iter()
            .position(|class| class.find(class.tag(vaddress)).is_some())
    }

    /// Whether size class `class` holds a translation for `vaddress`.
    pub fn contains(&self, vaddress: Address, class: usize) -> bool {
        let class = &self.classes[class];
        class.find(class.tag(vaddress)).is_some()
    }

    /// Overwrite the LRU victim of the set `vaddress` maps to.
    ///
    /// Does not touch the LRU order, see [`Self::update_lru`].
    pub fn insert(&mut self, vaddress: Address, class: usize) {
        let class = &mut self.classes[class];
        let tag = class.tag(vaddress);
        let victim_position = class.assoc - 1;
        let set = class.set_mut(tag);
        if let Some(victim) = set.iter_mut().find(|way| way.lru == victim_position) {
            if victim.valid {
                log::trace!(target: "tlb", "evicting tag {:#x} for {:#x}", victim.tag, tag);
            }
            victim.tag = tag;
            victim.valid = true;
        }
    }

    /// Make the way holding `vaddress` the most recently used of its set.
    pub fn update_lru(&mut self, vaddress: Address, class: usize) {
        let class = &mut self.classes[class];
        let tag = class.tag(vaddress);
        let touched = class.find(tag);
        let set = class.set_mut(tag);
        let position = touched.map_or(0, |way| set[way].lru);
        for way in set.iter_mut() {
            if way.lru < position {
                way.lru += 1;
            }
        }
        if let Some(way) = touched {
            set[way].lru = 0;
        }
    }

    /// Insert `vaddress` unless it is already present, then touch it.
    pub fn fill(&mut self, vaddress: Address, class: usize) {
        if !self.contains(vaddress, class) {
            self.insert(vaddress, class);
        }
        self.update_lru(vaddress, class);
    }

    /// Drop every translation for `vaddress`, returns how many were dropped.
    pub fn invalidate(&mut self, vaddress: Address) -> usize {
        let mut dropped = 0;
        for class in self.classes.iter_mut() {
            let tag = class.tag(vaddress);
            if let Some(way) = class.find(tag) {
                class.set_mut(tag)[way].valid = false;
                dropped += 1;
            }
        }
        dropped
    }

    /// The size class a translation served at `page_size` is cached in.
    ///
    /// Exact matches win, then the largest class not larger than
    /// `page_size`, then the smallest class.
    pub fn class_for_page_size(&self, page_size: u64) -> usize {
        self.classes
            .iter()
            .rposition(|class| class.page_size <= page_size)
            .unwrap_or(0)
    }

    /// LRU position of the way holding `vaddress`, if any.
    pub fn lru_position(&self, vaddress: Address, class: usize) -> Option<usize> {
        let class = &self.classes[class];
        let tag = class.tag(vaddress);
        class.find(tag).map(|way| class.set(tag)[way].lru)
    }

    /// LRU positions of the set `vaddress` maps to, in way order.
    pub fn lru_positions(&self, vaddress: Address, class: usize) -> Vec<usize> {
        let class = &self.classes[class];
        class
            .set(class.tag(vaddress))
            .iter()
            .map(|way| way.lru)
            .collect()
    }
}
