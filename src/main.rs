// Copyright 2024 by the timetabler authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use timetabler::config::Config;
use timetabler::error::SchedulerError;
use timetabler::solver::{self, ControllerKind, SolveOptions};

fn main() {
    // Setup logging & parse command line arguments
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!(
        "This is the university timetabler, version {}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );
    let args = parse_cli_args();

    let config_path: &String = args.get_one("config").unwrap();
    let config = Config::load(Path::new(config_path)).unwrap_or_else(|e| {
        error!("Could not load configuration: {}", e);
        std::process::exit(exitcode::CONFIG)
    });

    let data_dir: &String = args.get_one("DATA").unwrap();
    debug!("Reading input tables from {} ...", data_dir);
    let mut dataset = timetabler::io::ingest::load_dataset(Path::new(data_dir), &config)
        .unwrap_or_else(|e| {
            error!("Could not read input data: {}", e);
            std::process::exit(exitcode::DATAERR)
        });

    // In debug build: Check consistency of imported data
    if cfg!(debug_assertions) {
        timetabler::assert_data_consistency(&dataset);
    }

    let removed = if config.filter_infeasible_subjects {
        timetabler::prefilter::filter_infeasible_subjects(&mut dataset)
    } else {
        info!("Infeasible subject filtering is disabled (FILTER_INFEASIBLE_SUBJECTS).");
        Vec::new()
    };

    if dataset.subjects.is_empty() {
        error!("No schedulable subjects left; nothing to do.");
        std::process::exit(exitcode::DATAERR);
    }

    let seed: i64 = *args.get_one("seed").unwrap();
    let deterministic = args.get_flag("deterministic");
    let controller = match args.get_one::<String>("controller").unwrap().as_str() {
        "slot-oracle" => ControllerKind::SlotOracle,
        _ => ControllerKind::GhostInterval,
    };

    let output_root: &String = args.get_one("output").unwrap();
    let output_folder = create_output_folder(Path::new(output_root), seed, deterministic, &dataset)
        .unwrap_or_else(|e| {
            error!("Could not create output folder: {}", e);
            std::process::exit(exitcode::CANTCREAT)
        });
    info!("Output folder: {}", output_folder.display());

    let opts = SolveOptions {
        seed,
        pass1_time_seconds: *args.get_one::<f64>("pass1_time").unwrap(),
        pass2_time_seconds: *args.get_one::<f64>("pass2_time").unwrap(),
        num_workers: *args
            .get_one::<u32>("num_workers")
            .unwrap_or(&(num_cpus::get() as u32)) as i32,
        deterministic,
        controller,
        lock_mode: config.pass2_lock_mode,
        run_pass2: !args.get_flag("structural_only"),
        output_folder: Some(output_folder.clone()),
    };

    let solution = match solver::solve(&dataset, &config, &opts) {
        Ok(solution) => solution,
        Err(SchedulerError::SolverInfeasible { status }) => {
            warn!("No feasible schedule found ({}).", status);
            std::process::exit(1);
        }
        Err(e) => {
            error!("Scheduling failed: {}", e);
            std::process::exit(exitcode::DATAERR);
        }
    };

    info!(
        "Finished solving ({}): structural = {}, preference = {}",
        solution.status,
        solution.structural_objective,
        solution
            .preference_objective
            .map(|p| p.to_string())
            .unwrap_or_else(|| "n/a".to_owned())
    );

    // Exports: failures are logged, the in-memory result stays valid
    let report_path = output_folder.join("violation_report.txt");
    match std::fs::File::create(&report_path) {
        Err(e) => error!("Could not open {}: {}.", report_path.display(), e),
        Ok(file) => {
            match timetabler::io::report::write_report(file, &solution, &dataset, &config, &removed)
            {
                Ok((_, grand_total)) => {
                    info!(
                        "Violation report written to {} (grand total {}).",
                        report_path.display(),
                        grand_total
                    )
                }
                Err(e) => error!("Could not write violation report: {}.", e),
            }
        }
    }

    let db_path = output_folder.join("schedule.db");
    match timetabler::io::db::save_schedule(&db_path, &solution, &dataset, &config) {
        Ok(()) => info!("Schedule database written to {}.", db_path.display()),
        Err(e) => error!("Could not export schedule database: {}.", e),
    }

    if args.get_flag("print") {
        print!(
            "The timetable is:\n{}",
            timetabler::io::format_schedule(&solution, &dataset, &config)
        );
    }
}

/// Create the per-run output folder: seed, timestamp, mode and dataset sizes in the name
fn create_output_folder(
    root: &Path,
    seed: i64,
    deterministic: bool,
    dataset: &timetabler::Dataset,
) -> std::io::Result<PathBuf> {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mode = if deterministic {
        "deterministic"
    } else {
        "nondeterministic"
    };
    let folder = root.join(format!(
        "{}_{}_{}_F{}_S{}_SB{}_R{}",
        seed,
        timestamp,
        mode,
        dataset.faculty.len(),
        dataset.subjects.len(),
        dataset.batches.len(),
        dataset.rooms.len()
    ));
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Helper function to construct and execute parser for command line options
fn parse_cli_args() -> clap::ArgMatches {
    clap::command!()
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the JSON configuration file")
                .value_name("CONFIG")
                .default_value("config.json"),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("Directory under which the per-run output folder is created")
                .value_name("DIR")
                .default_value("outputs"),
        )
        .arg(
            clap::Arg::new("seed")
                .short('s')
                .long("seed")
                .help("Random seed handed to the solver")
                .value_name("SEED")
                .value_parser(clap::value_parser!(i64))
                .default_value("894646"),
        )
        .arg(
            clap::Arg::new("pass1_time")
                .long("pass1-time")
                .help("Wall-clock time budget of the structural pass in seconds")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(f64))
                .default_value("300"),
        )
        .arg(
            clap::Arg::new("pass2_time")
                .long("pass2-time")
                .help("Wall-clock time budget of the preference pass in seconds")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(f64))
                .default_value("600"),
        )
        .arg(
            clap::Arg::new("deterministic")
                .short('d')
                .long("deterministic")
                .help(
                    "Single solver worker with a fixed seed. Two runs with identical inputs \
                     produce identical schedules.",
                )
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("num_workers")
                .long("num-workers")
                .help("Number of solver worker threads. Defaults to number of detected CPU cores.")
                .value_name("THREADS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            clap::Arg::new("controller")
                .long("controller")
                .help("Time-slot controller to use")
                .value_name("CONTROLLER")
                .value_parser(["ghost", "slot-oracle"])
                .default_value("ghost"),
        )
        .arg(
            clap::Arg::new("structural_only")
                .long("structural-only")
                .help(
                    "Stop after the structural pass; the preference penalty is reported as null.",
                )
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("print")
                .short('p')
                .long("print")
                .help("Print the calculated timetable to stdout in a human readable format")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            clap::Arg::new("DATA")
                .help("Directory containing the input CSV tables")
                .required(true)
                .index(1),
        )
        .get_matches()
}
