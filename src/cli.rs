// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

use std::{borrow::Cow, path::PathBuf};

use clap::Parser;
use tlbsim::{config::DEFAULT_MEMORY_SIZE, memory::MemorySize};

fn maybe_hex(s: &str) -> Result<u64, Cow<'static, str>> {
    const HEX_PREFIX: &str = "0x";
    const HEX_PREFIX_UPPER: &str = "0X";
    const HEX_PREFIX_LEN: usize = HEX_PREFIX.len();

    let result = if s.starts_with(HEX_PREFIX) || s.starts_with(HEX_PREFIX_UPPER) {
        u64::from_str_radix(&s[HEX_PREFIX_LEN..], 16)
    } else {
        s.parse::<u64>()
    };

    result.map_err(|err| Cow::Owned(err.to_string()))
}

fn memory_size(s: &str) -> Result<MemorySize, Cow<'static, str>> {
    fn err<A>(_: A) -> Cow<'static, str> {
        Cow::Borrowed(
            "Expected decimal or hexadecimal value, with optional suffixes: B (bytes), K/KiB \
             (Kibibytes), M/MiB (Mibibytes) or G/GiB. (A kibibyte is 1024 bytes)",
        )
    }
    fn scaled(s: &str, unit: u64, suffix: &str) -> Result<MemorySize, Cow<'static, str>> {
        let value = maybe_hex(s).map_err(err)?;
        let bytes = value.checked_mul(unit).ok_or_else(|| {
            Cow::Owned(format!(
                "{value}{suffix} is too large be represented in 64 bits"
            ))
        })?;
        MemorySize::new(bytes).ok_or(Cow::Borrowed("Memory size must be non-zero"))
    }

    if maybe_hex(s).is_ok() {
        return scaled(s, 1, "B");
    }
    for (suffixes, unit) in [
        (["KiB", "K"], MemorySize::KiB.get()),
        (["MiB", "M"], MemorySize::MiB.get()),
        (["GiB", "G"], MemorySize::GiB.get()),
        (["B", "B"], 1),
    ] {
        if let Some(value) = suffixes.iter().find_map(|suffix| s.strip_suffix(suffix)) {
            return scaled(value, unit, suffixes[0]);
        }
    }
    Err(err(()))
}

fn param(s: &str) -> Result<(String, String), Cow<'static, str>> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(Cow::Owned(format!("Expected KEY=VALUE, got `{s}`"))),
    }
}

/// TLB hierarchy and page table walk simulator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// JSON object with the simulation parameters, e.g. `{"levels": 2,
    /// "emulate_faults": 1}`. Missing parameters take their default values.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Override a parameter of the configuration file.
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE", value_parser = param)]
    pub params: Vec<(String, String)>,
    /// Non-zero hexadecimal or decimal value of the size of physical memory
    /// available to the frame allocator.
    #[arg(long, default_value_t = DEFAULT_MEMORY_SIZE, value_parser = memory_size)]
    pub memory: MemorySize,
    /// Stop after this many cycles even if accesses are left.
    #[arg(long, default_value_t = 100_000_000, value_parser = maybe_hex)]
    pub max_cycles: u64,
    /// Accesses each core may have in flight.
    #[arg(long, default_value_t = 16)]
    pub window: usize,

    /// Trace with one `<core> <R|W> <address> [size]` access per line.
    #[arg(value_name = "WORKLOAD")]
    pub workload: PathBuf,
}

impl Args {
    /// Parse command-line arguments from the process environment.
    pub fn parse() -> Result<Self, String> {
        let retval = <Self as clap::Parser>::parse();
        if retval.window == 0 {
            return Err("Invalid arguments: --window must be greater than zero.".to_string());
        }
        Ok(retval)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}
