// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

//! Simulation parameters.
//!
//! Parameters are given as a flat set of keys such as `assoc1_L2` or
//! `size3_PTWC`, the way component parameters are written in simulator
//! configuration scripts. [`Params`] holds the raw values and the typed
//! configuration structs are built from it once at start-up; anything invalid
//! is rejected there.

use serde_derive::Deserialize;
use serde_json::{Map, Value};

use crate::{
    error::ConfigError,
    memory::{MemorySize, PAGE_1GB, PAGE_2MB, PAGE_4KB, PAGE_512GB},
};

/// Raw key/value parameters.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Set `key`, replacing any previous value.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Look up an unsigned integer. Numbers, booleans and numeric strings
    /// (decimal or `0x` hexadecimal) are accepted.
    pub fn find_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        let invalid = || ConfigError::InvalidType {
            key: key.to_string(),
            expected: "a non-negative integer",
        };
        match self.0.get(key) {
            None => Ok(default),
            Some(Value::Bool(value)) => Ok(u64::from(*value)),
            Some(Value::Number(number)) => number
                .as_u64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                        .map(|f| f as u64)
                })
                .ok_or_else(invalid),
            Some(Value::String(s)) => {
                let s = s.trim();
                let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse::<u64>(),
                };
                parsed.map_err(|_| invalid())
            }
            Some(_) => Err(invalid()),
        }
    }

    pub fn find_usize(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.find_u64(key, default as u64)?;
        usize::try_from(value).map_err(|_| ConfigError::InvalidType {
            key: key.to_string(),
            expected: "an integer that fits in usize",
        })
    }

    pub fn find_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.0.get(key) {
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Ok(self.find_u64(key, u64::from(default))? != 0),
        }
    }

    /// Look up a size given in KiB.
    pub fn find_kib(&self, key: &str, default_kib: u64) -> Result<MemorySize, ConfigError> {
        let kib = self.find_u64(key, default_kib)?;
        MemorySize::from_kib(kib)
            .ok_or_else(|| ConfigError::invalid_value(key, "size must be non-zero"))
    }

    /// Like [`Self::find_usize`] but rejects zero.
    fn find_nonzero(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.find_usize(key, default)? {
            0 => Err(ConfigError::invalid_value(key, "must be greater than zero")),
            value => Ok(value),
        }
    }
}

/// Geometry of one page size class of a translation cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SizeClassConfig {
    pub page_size: MemorySize,
    /// Total number of entries.
    pub entries: usize,
    pub assoc: usize,
}

impl SizeClassConfig {
    /// Check the geometry of the `index`-th (0-based) class.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let n = index + 1;
        if self.assoc == 0 {
            return Err(ConfigError::invalid_value(
                format!("assoc{n}"),
                "associativity must be greater than zero",
            ));
        }
        if self.entries == 0 || self.entries % self.assoc != 0 {
            return Err(ConfigError::invalid_value(
                format!("size{n}"),
                format!(
                    "entry count {} must be a non-zero multiple of the associativity {}",
                    self.entries, self.assoc
                ),
            ));
        }
        if !self.page_size.get().is_power_of_two() {
            return Err(ConfigError::invalid_value(
                format!("page_size{n}"),
                format!("page size {} is not a power of two", self.page_size),
            ));
        }
        Ok(())
    }
}

/// Configuration of TLB level `L{n}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlbLevelConfig {
    pub classes: Vec<SizeClassConfig>,
    pub latency: u64,
    pub max_outstanding: usize,
    pub max_width: usize,
    /// Lookups overlap with the cache access, hits cost no extra latency.
    pub parallel_mode: bool,
    /// Every lookup hits.
    pub perfect: bool,
}

impl TlbLevelConfig {
    pub fn from_params(params: &Params, level: usize) -> Result<Self, ConfigError> {
        let suffix = format!("L{level}");
        let sizes = params.find_nonzero(&format!("sizes_{suffix}"), 1)?;
        let classes = (1..=sizes)
            .map(|i| {
                let default_page_size = match i {
                    1 => 4,
                    2 => 2048,
                    _ => 1024 * 1024,
                };
                let class = SizeClassConfig {
                    page_size: params
                        .find_kib(&format!("page_size{i}_{suffix}"), default_page_size)?,
                    entries: params.find_usize(&format!("size{i}_{suffix}"), 32)?,
                    assoc: params.find_usize(&format!("assoc{i}_{suffix}"), 4)?,
                };
                class
                    .validate(i - 1)
                    .map_err(|err| with_suffix(err, &suffix))?;
                Ok(class)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let unordered = classes
            .windows(2)
            .find(|w| w[0].page_size >= w[1].page_size);
        if let Some(pair) = unordered {
            return Err(ConfigError::invalid_value(
                format!("page_size_{suffix}"),
                format!(
                    "page sizes must be ascending, got {} before {}",
                    pair[0].page_size, pair[1].page_size
                ),
            ));
        }
        Ok(Self {
            classes,
            latency: params.find_u64(&format!("latency_{suffix}"), 1)?,
            max_outstanding: params.find_nonzero(&format!("max_outstanding_{suffix}"), 4)?,
            max_width: params.find_nonzero(&format!("max_width_{suffix}"), 4)?,
            parallel_mode: params.find_bool(&format!("parallel_mode_{suffix}"), false)?,
            perfect: params.find_bool("perfect", false)?,
        })
    }
}

fn with_suffix(err: ConfigError, suffix: &str) -> ConfigError {
    match err {
        ConfigError::InvalidValue { key, reason } => ConfigError::InvalidValue {
            key: format!("{key}_{suffix}"),
            reason,
        },
        other => other,
    }
}

/// Page sizes covered by the walk cache classes: PTE, PMD, PUD and PGD
/// entries.
pub const WALK_CACHE_PAGE_SIZES: [u64; 4] = [PAGE_4KB, PAGE_2MB, PAGE_1GB, PAGE_512GB];

/// Configuration of the page table walker of each core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkerConfig {
    pub classes: Vec<SizeClassConfig>,
    /// Latency of a walk cache lookup.
    pub latency: u64,
    pub max_outstanding: usize,
    pub max_width: usize,
    /// Latency of one table access when walks are not sent to memory.
    pub page_walk_latency: u64,
    /// Use `page_walk_latency` instead of sending table reads to the memory
    /// backend.
    pub self_connected: bool,
    pub emulate_faults: bool,
    /// Wrap table indices to bound the size of the simulated page table.
    pub confined: bool,
    /// Size of the frames requested from the page fault handler.
    pub frame_size: MemorySize,
}

impl WalkerConfig {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let classes = WALK_CACHE_PAGE_SIZES
            .iter()
            .enumerate()
            .map(|(i, page_size)| {
                let n = i + 1;
                let class = SizeClassConfig {
                    page_size: MemorySize::new(*page_size)
                        .ok_or_else(|| ConfigError::invalid_value("page_size", "zero"))?,
                    entries: params.find_usize(&format!("size{n}_PTWC"), 32)?,
                    assoc: params.find_usize(&format!("assoc{n}_PTWC"), 4)?,
                };
                class.validate(i).map_err(|err| with_suffix(err, "PTWC"))?;
                Ok(class)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        let frame_size = params.find_kib("os_page_size", 4)?;
        if !frame_size.get().is_power_of_two() {
            return Err(ConfigError::invalid_value(
                "os_page_size",
                format!("{frame_size} is not a power of two"),
            ));
        }
        Ok(Self {
            classes,
            latency: params.find_u64("latency_PTWC", 10)?,
            max_outstanding: params.find_nonzero("max_outstanding_PTWC", 4)?,
            max_width: params.find_nonzero("max_width_PTWC", 4)?,
            page_walk_latency: params.find_u64("page_walk_latency", 30)?,
            self_connected: params.find_bool("self_connected", true)?,
            emulate_faults: params.find_bool("emulate_faults", false)?,
            confined: params.find_bool("ptw_confined", false)?,
            frame_size,
        })
    }
}

/// Configuration of the translation hierarchy of each core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HierarchyConfig {
    pub levels: Vec<TlbLevelConfig>,
    pub walker: WalkerConfig,
    pub max_shootdown_width: usize,
}

impl HierarchyConfig {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let levels = params.find_nonzero("levels", 1)?;
        Ok(Self {
            levels: (1..=levels)
                .map(|level| TlbLevelConfig::from_params(params, level))
                .collect::<Result<_, _>>()?,
            walker: WalkerConfig::from_params(params)?,
            max_shootdown_width: params.find_nonzero("max_shootdown_width", 4)?,
        })
    }
}

/// Configuration of a whole simulated machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemConfig {
    pub cores: usize,
    /// Cores sharing one address space; core `c` belongs to address space
    /// `c / cores_per_process`.
    pub cores_per_process: usize,
    pub hierarchy: HierarchyConfig,
    pub memory_latency: u64,
    pub allocator_latency: u64,
    /// Physical memory handed out by the frame allocator.
    pub memory_size: MemorySize,
}

// SAFETY: Value is non-zero.
pub const DEFAULT_MEMORY_SIZE: MemorySize =
    MemorySize(std::num::NonZero::new(4 * MemorySize::GiB.get()).unwrap());

impl SystemConfig {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let cores = params.find_nonzero("corecount", 1)?;
        Ok(Self {
            cores,
            cores_per_process: params.find_nonzero("cores_per_process", cores)?,
            hierarchy: HierarchyConfig::from_params(params)?,
            memory_latency: params.find_u64("memory_latency", 100)?,
            allocator_latency: params.find_u64("allocator_latency", 100)?,
            memory_size: DEFAULT_MEMORY_SIZE,
        })
    }

    /// Number of distinct address spaces.
    pub fn address_spaces(&self) -> usize {
        self.cores.div_ceil(self.cores_per_process)
    }
}
