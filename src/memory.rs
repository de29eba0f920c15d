// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Addresses, sizes and the structures translations are cached and stored
//! in.

mod address;
mod page_table;
mod size;
mod tlb;

pub use address::*;
pub use page_table::*;
pub use size::*;
pub use tlb::*;
