use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use gru_cli::{CaseConfig, CaseReport, load_sweep, print_report, run_case};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gru",
    about = "Fused multi-head GRU: kernel validation against the reference engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare forward values and gradients of the fused kernel and the reference engine
    Validate {
        #[command(flatten)]
        case: CaseConfig,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate every case of a TOML sweep file
    Sweep {
        /// Sweep file with a `[defaults]` table and `[[cases]]` entries
        file: PathBuf,
        /// Print the reports as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            true
        }
        Err(e) => {
            eprintln!("Error serializing report: {e}");
            false
        }
    }
}

fn validate(case: &CaseConfig, json: bool) -> ExitCode {
    let report = match run_case(case) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error in case {}: {e}", case.label());
            return ExitCode::FAILURE;
        }
    };

    let printed = if json {
        print_json(&report)
    } else {
        print_report(&report);
        true
    };

    if printed && report.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn sweep(file: &Path, json: bool) -> ExitCode {
    let cases = match load_sweep(file) {
        Ok(cases) => cases,
        Err(e) => {
            eprintln!("Error loading sweep {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    let total = cases.len();
    let mut reports: Vec<CaseReport> = Vec::with_capacity(total);
    let mut errors = 0;

    for case in &cases {
        match run_case(case) {
            Ok(report) => {
                if !json {
                    print_report(&report);
                }
                reports.push(report);
            }
            Err(e) => {
                eprintln!("Error in case {}: {e}", case.label());
                errors += 1;
            }
        }
    }

    let passed = reports.iter().filter(|r| r.passed).count();
    let printed = if json {
        print_json(&reports)
    } else {
        println!();
        println!("Summary: {passed}/{total} passed, {errors} errored");
        for report in reports.iter().filter(|r| !r.passed) {
            let names: Vec<_> = report.failures().map(|c| c.name).collect();
            println!("  FAIL {}: {}", report.label, names.join(", "));
        }
        true
    };

    if printed && passed == total {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { case, json } => validate(&case, json),
        Commands::Sweep { file, json } => sweep(&file, json),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "gru", &mut std::io::stdout());
            ExitCode::SUCCESS
        }
    }
}
