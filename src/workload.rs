// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Memory access traces.
//!
//! One access per line: `<core> <R|W> <address> [size]`. Addresses and sizes
//! are decimal or `0x` hexadecimal, the size defaults to 8 bytes. Everything
//! after a `#` is ignored.

use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::{memory::Address, request::CoreId};

const DEFAULT_ACCESS_SIZE: u64 = 8;

/// Core ids a trace may name are below this.
pub const MAX_CORES: CoreId = 1 << 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub core: CoreId,
    pub is_write: bool,
    pub address: Address,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadError {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for WorkloadError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "Invalid workload at line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for WorkloadError {}

fn parse_number(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// Accesses of each core, in program order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Workload {
    per_core: IndexMap<CoreId, VecDeque<Access>>,
}

impl Workload {
    pub fn parse(input: &str) -> Result<Self, WorkloadError> {
        let mut workload = Self::default();
        for (i, line) in input.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let err = |reason: String| WorkloadError {
                line: i + 1,
                reason,
            };
            let fields = line.split_whitespace().collect::<Vec<_>>();
            let [core, kind, address, ref rest @ ..] = fields[..] else {
                return Err(err(format!(
                    "expected `<core> <R|W> <address> [size]`, got `{line}`"
                )));
            };
            let core = core
                .parse::<CoreId>()
                .map_err(|_| err(format!("invalid core `{core}`")))?;
            if core >= MAX_CORES {
                return Err(err(format!(
                    "core {core} out of range, at most {MAX_CORES} cores are supported"
                )));
            }
            let is_write = match kind {
                "R" | "r" => false,
                "W" | "w" => true,
                other => return Err(err(format!("access kind must be R or W, got `{other}`"))),
            };
            let address = parse_number(address)
                .map(Address)
                .ok_or_else(|| err(format!("invalid address `{address}`")))?;
            let size = match rest {
                [] => DEFAULT_ACCESS_SIZE,
                [size] => parse_number(size)
                    .filter(|size| *size > 0)
                    .ok_or_else(|| err(format!("invalid size `{size}`")))?,
                _ => return Err(err(format!("trailing fields in `{line}`"))),
            };
            workload.push(Access {
                core,
                is_write,
                address,
                size,
            });
        }
        Ok(workload)
    }

    pub fn push(&mut self, access: Access) {
        self.per_core
            .entry(access.core)
            .or_default()
            .push_back(access);
    }

    /// Highest core id with accesses.
    pub fn max_core(&self) -> Option<CoreId> {
        self.per_core.keys().max().copied()
    }

    pub fn len(&self) -> usize {
        self.per_core.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next access of `core`, if any.
    pub fn next(&mut self, core: CoreId) -> Option<Access> {
        self.per_core.get_mut(&core)?.pop_front()
    }
}
