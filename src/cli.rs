// Command-line interface.
//
// Two subcommands: `optimize` rewrites an installer for diff-friendly
// compression, `compare` reports what a differential update between two
// installers would download and why. Human-readable output by default,
// machine-readable with --json.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::compare::{CompareReport, compare_files};
use crate::optimize::optimize;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Diff-friendly installer re-compression and comparison.
#[derive(Parser, Debug)]
#[command(
    name = "rezip",
    version,
    about = "Re-compress nested installer archives for small differential updates",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output results as JSON.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Rewrite an installer with flush points at embedded file boundaries.
    Optimize(OptimizeArgs),
    /// Compute the differential download between two installers.
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    /// Input installer.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output installer (must differ from the input).
    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write a gzip-compressed JSON block manifest.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    blockmap: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// Previous installer version.
    #[arg(value_hint = ValueHint::FilePath)]
    old: PathBuf,

    /// New installer version.
    #[arg(value_hint = ValueHint::FilePath)]
    new: PathBuf,
}

// ---------------------------------------------------------------------------
// Size formatting
// ---------------------------------------------------------------------------

fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes}b")
    } else if b < MB {
        format!("{:.2}kb", b / KB)
    } else {
        format!("{:.2}mb", b / MB)
    }
}

// ---------------------------------------------------------------------------
// Optimize command
// ---------------------------------------------------------------------------

fn cmd_optimize(args: &OptimizeArgs, json: bool, quiet: bool) -> i32 {
    let summary = match optimize(&args.input, &args.output, args.blockmap.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("rezip: optimize: {e}");
            return 1;
        }
    };

    if json {
        let out = serde_json::json!({
            "command": "optimize",
            "input": args.input.display().to_string(),
            "output": args.output.display().to_string(),
            "input_size": summary.input_size,
            "output_size": summary.output_size,
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    } else if !quiet {
        println!(
            "rezip: {} ({}) -> {} ({})",
            args.input.display(),
            format_size(summary.input_size),
            args.output.display(),
            format_size(summary.output_size),
        );
    }
    0
}

// ---------------------------------------------------------------------------
// Compare command
// ---------------------------------------------------------------------------

fn print_report(report: &CompareReport, json: bool, quiet: bool) {
    if json {
        let files: Vec<serde_json::Value> = report
            .modified_files
            .iter()
            .map(|f| serde_json::json!({ "path": f.path, "bytes": f.bytes }))
            .collect();
        let errors: Vec<String> = report.entry_errors.iter().map(|e| e.to_string()).collect();
        let out = serde_json::json!({
            "command": "compare",
            "old_size": report.old_size,
            "new_size": report.new_size,
            "download_size": report.download_size,
            "files": files,
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
        return;
    }

    if quiet {
        return;
    }
    for file in &report.modified_files {
        println!("{:>12}  {}", format_size(file.bytes), file.path);
    }
    for err in &report.entry_errors {
        eprintln!("rezip: warning: {err}");
    }
    println!(
        "must download {} of {}",
        format_size(report.download_size),
        format_size(report.new_size),
    );
}

fn cmd_compare(args: &CompareArgs, json: bool, quiet: bool) -> i32 {
    match compare_files(&args.old, &args.new) {
        Ok(report) => {
            print_report(&report, json, quiet);
            0
        }
        Err(e) => {
            eprintln!("rezip: compare: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    let default_filter = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match &cli.command {
        Cmd::Optimize(args) => cmd_optimize(args, cli.json_output, cli.quiet),
        Cmd::Compare(args) => cmd_compare(args, cli.json_output, cli.quiet),
    };

    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
