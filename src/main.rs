mod cli;

use crate::cli::{expect_arg, expect_path};
use anyhow::{bail, Context, Result};
use clap::{error::ErrorKind, ArgMatches};
use log::{error, info, LevelFilter};
use rvequiv::model::equivalence::{build_query, decide, Verdict};
use rvequiv::model::executor::{ModelOptions, Policy};
use rvequiv::model::solver::{none_impl::NoneSolver, Solver};
#[cfg(feature = "z3")]
use rvequiv::model::z3solver_impl::Z3SolverWrapper;
use rvequiv::model::write_query;
use rvequiv::parser::parse_file;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::time::Duration;

fn main() {
    let matches = match cli::args().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    init_logger(expect_arg(&matches, "verbose"));

    match run(&matches) {
        Ok(verdict) => process::exit(report(&verdict)),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            process::exit(1);
        }
    }
}

fn init_logger(level: &str) {
    let filter = LevelFilter::from_str(level).unwrap_or(LevelFilter::Warn);
    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .init();
}

fn run(matches: &ArgMatches) -> Result<Verdict> {
    let original = parse_file(expect_path(matches, "original"))?;
    let optimized = parse_file(expect_path(matches, "optimized"))?;

    let options = ModelOptions {
        policy: if matches.get_flag("strict") {
            Policy::Strict
        } else {
            Policy::Lenient
        },
    };
    let timeout = matches
        .get_one::<u64>("timeout")
        .map(|secs| Duration::from_secs(*secs));

    let equivalence = build_query(
        &original.resolve_labels(),
        &optimized.resolve_labels(),
        &options,
    )
    .context("could not model programs")?;
    info!(
        "modeled {} and {} instructions",
        original.instructions.len(),
        optimized.instructions.len()
    );

    if let Some(path) = matches.get_one::<PathBuf>("dump-smt") {
        let file = File::create(path)
            .with_context(|| format!("could not create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        write_query(&equivalence.query, &mut writer)?;
        writer.flush()?;
        info!("wrote equivalence query to {}", path.display());
    }

    let verdict = match expect_arg(matches, "solver") {
        #[cfg(feature = "z3")]
        "z3" => decide(&equivalence, &mut Z3SolverWrapper::new(timeout)),
        "none" => decide(&equivalence, &mut NoneSolver::new(timeout)),
        other => bail!("solver \"{}\" is not available in this build", other),
    };

    Ok(verdict)
}

fn report(verdict: &Verdict) -> i32 {
    match verdict {
        Verdict::Equivalent => {
            println!("Programs are equivalent.");
            0
        }
        Verdict::NotEquivalent(counterexample) => {
            println!("Programs are not equivalent.");
            println!();
            println!("Counterexample:");
            println!("{}", counterexample);
            0
        }
        Verdict::Unknown(reason) => {
            println!("Equivalence could not be decided: {}", reason);
            2
        }
    }
}
