// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later
// Copyright Contributors to the tlbsim project.

use tlbsim::{
    config::{Params, SystemConfig},
    machine::System,
    workload::Workload,
};

mod cli;

fn read(path: &std::path::Path) -> Result<String, String> {
    std::fs::read_to_string(path)
        .map_err(|err| format!("Could not read `{}`: {err}", path.display()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::Args::parse()?;
    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    let params = match &args.config {
        Some(path) => Params::from_json(&read(path)?)
            .map_err(|err| format!("Invalid configuration `{}`: {err}", path.display()))?,
        None => Params::default(),
    };
    let params = args
        .params
        .iter()
        .fold(params, |params, (key, value)| params.with(key, value.as_str()));
    let mut config = SystemConfig::from_params(&params)?;
    config.memory_size = args.memory;
    let workload = Workload::parse(&read(&args.workload)?)?;
    log::info!(
        "{} access(es) from {}",
        workload.len(),
        args.workload.display()
    );

    let mut system = System::new(config)?;
    let summary = system.run(workload, args.window, args.max_cycles).map_err(|err| {
        log::error!("Simulation aborted at cycle {}: {err}", system.cycle());
        err
    })?;
    println!(
        "cycles: {}\ntranslated: {}\nunfinished: {}",
        summary.cycles, summary.translated, summary.unfinished
    );
    Ok(())
}
