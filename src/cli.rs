use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

pub const LOGGING_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
pub const SOLVERS: [&str; 2] = ["z3", "none"];

pub fn expect_arg<'a>(m: &'a ArgMatches, arg: &str) -> &'a str {
    m.get_one::<String>(arg)
        .unwrap_or_else(|| panic!("argument \"{}\" has to be set in CLI at all times", arg))
}

pub fn expect_path<'a>(m: &'a ArgMatches, arg: &str) -> &'a PathBuf {
    m.get_one::<PathBuf>(arg)
        .unwrap_or_else(|| panic!("argument \"{}\" has to be set in CLI at all times", arg))
}

fn default_solver() -> &'static str {
    if cfg!(feature = "z3") {
        SOLVERS[0]
    } else {
        SOLVERS[1]
    }
}

pub fn args() -> Command {
    command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("configure logging level to use")
                .value_name("LEVEL")
                .value_parser(LOGGING_LEVELS)
                .default_value(LOGGING_LEVELS[3]),
        )
        .arg(
            Arg::new("solver")
                .short('s')
                .long("solver")
                .help("SMT solver used to decide the equivalence query")
                .value_name("SOLVER")
                .value_parser(SOLVERS)
                .default_value(default_solver()),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .help("Timeout for the solver in seconds")
                .value_name("SECS")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Fail on unsupported instructions and unresolved targets")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dump-smt")
                .long("dump-smt")
                .help("Write the equivalence query as SMT-LIB2 to a file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("original")
                .help("Original program")
                .value_name("ORIGINAL")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(
            Arg::new("optimized")
                .help("Optimized program that should behave like the original")
                .value_name("OPTIMIZED")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_two_programs_with_options() {
        let m = args()
            .try_get_matches_from([
                "rvequiv", "-v", "debug", "--strict", "-s", "none", "a.s", "b.s",
            ])
            .unwrap();
        assert_eq!(expect_arg(&m, "verbose"), "debug");
        assert_eq!(expect_arg(&m, "solver"), "none");
        assert!(m.get_flag("strict"));
        assert_eq!(expect_path(&m, "optimized"), &PathBuf::from("b.s"));
        assert_eq!(m.get_one::<u64>("timeout"), None);
    }

    #[test]
    fn defaults_to_skipping_unmodeled_instructions() {
        let m = args().try_get_matches_from(["rvequiv", "a.s", "b.s"]).unwrap();
        assert!(!m.get_flag("strict"));
        assert_eq!(expect_arg(&m, "solver"), default_solver());
        assert_eq!(expect_arg(&m, "verbose"), "warn");
    }

    #[test]
    fn rejects_wrong_number_of_programs() {
        assert!(args().try_get_matches_from(["rvequiv", "a.s"]).is_err());
        assert!(args()
            .try_get_matches_from(["rvequiv", "a.s", "b.s", "c.s"])
            .is_err());
    }
}
