// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Address translation: TLB levels, the page table walker and the page fault
//! state machine driving it.

mod fault;
mod hierarchy;
mod level;
mod pending;
mod walker;

pub use fault::{FaultEngine, FaultState};
pub use hierarchy::{NextStage, Status, TlbHierarchy};
pub use level::TlbLevel;
pub use pending::{MissEntry, PendingMissTable};
pub use walker::PageTableWalker;
