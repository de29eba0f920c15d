// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! # tlbsim
//!
//! Cycle-level model of the address translation path of simulated cores: a
//! multi-level, multi-page-size TLB hierarchy per core backed by a page
//! table walker that lazily builds a 4-level page table and emulates page
//! faults against a frame allocator.
//!
//! A [`machine::System`] ties the per-core [`mmu::TlbHierarchy`] instances
//! to the page tables of their address spaces and to the external
//! collaborators in [`devices`].

pub mod config;
pub mod devices;
pub mod error;
pub mod machine;
pub mod memory;
pub mod mmu;
pub mod request;
pub mod workload;
