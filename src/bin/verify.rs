//! aitrail-verify — offline integrity check for the audit journal.
//!
//! Replays the hash chain and recomputes every entry hash. Exit codes:
//! 0 success, 1 file error, 2 chain broken, 3 data tampered, 4 parse
//! error, 5 scan error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use aitrail::audit::verify::verify_file;

#[derive(Parser)]
#[command(name = "aitrail-verify", version, about)]
struct Cli {
    /// Path to the audit journal
    #[arg(long, default_value = "logs/audit.jsonl")]
    file: PathBuf,

    /// Print a confirmation for every verified line
    #[arg(long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let report = match verify_file(&args.file, |line, hash| {
        if args.verbose && !args.quiet {
            println!("line {line} verified (hash: {}...)", &hash[..16]);
        }
    }) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    for (line, detail) in &report.parse_errors {
        eprintln!("parse error on line {line}: {detail}");
    }

    if report.lines == 0 {
        eprintln!("warning: journal is empty");
    }

    if !args.quiet {
        println!("verification successful");
        println!("  entries verified: {}", report.lines as usize - report.parse_errors.len());
        println!("  chain integrity:  INTACT");
        println!("  data integrity:   VERIFIED");
    }

    ExitCode::SUCCESS
}
