// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Error types.
//!
//! Backpressure is not an error: a request that cannot be accepted simply
//! stays queued. Everything here is fatal for the simulation.

use crate::{
    memory::{Address, MemorySize, TableLevel},
    request::CoreId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A parameter is present but has the wrong type or cannot be represented.
    InvalidType { key: String, expected: &'static str },
    /// A parameter has a value outside of its valid range.
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::InvalidType { key, expected } => {
                write!(fmt, "Invalid parameter `{key}`: expected {expected}")
            }
            Self::InvalidValue { key, reason } => {
                write!(fmt, "Invalid parameter `{key}`: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    Config(ConfigError),
    /// A fault response tried to fill a table entry that already exists.
    DuplicateTableEntry {
        core: CoreId,
        level: TableLevel,
        index: u64,
        address: Address,
    },
    /// A fault response arrived for a core with no fault in flight.
    UnexpectedFaultResponse { core: CoreId, address: Address },
    /// A memory response arrived for a walk step that was never issued.
    UnexpectedMemoryResponse { core: CoreId, id: u64 },
    /// The page fault handler has no frames left.
    MemoryDrained {
        core: CoreId,
        level: TableLevel,
        index: u64,
    },
    /// Only single frame allocations are modeled.
    MultiPageAllocation {
        core: CoreId,
        size: MemorySize,
        frame_size: MemorySize,
    },
    /// A response was routed to a core that does not exist.
    UnknownCore(CoreId),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Config(err) => err.fmt(fmt),
            Self::DuplicateTableEntry {
                core,
                level,
                index,
                address,
            } => write!(
                fmt,
                "Core {core}: {level} entry {index:#x} is already mapped while resolving a fault \
                 for {address}"
            ),
            Self::UnexpectedFaultResponse { core, address } => write!(
                fmt,
                "Core {core}: received fault response for {address} but no fault is in flight"
            ),
            Self::UnexpectedMemoryResponse { core, id } => write!(
                fmt,
                "Core {core}: received memory response with unknown id {id}"
            ),
            Self::MemoryDrained { core, level, index } => write!(
                fmt,
                "Core {core}: memory is drained out while allocating {level} entry {index:#x}"
            ),
            Self::MultiPageAllocation {
                core,
                size,
                frame_size,
            } => write!(
                fmt,
                "Core {core}: requested {size} but only single {frame_size} frames can be \
                 allocated"
            ),
            Self::UnknownCore(core) => write!(fmt, "No such core: {core}"),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}
