use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use username_avail::check::{
    BulkRequest, CheckRecord, MAX_BULK_CHECKS, check_bulk, check_identifier,
};
use username_avail::config::Config;
use username_avail::generate::{IdentifierKind, MAX_IDENTIFIER_LENGTH};
use username_avail::pacing::{Interrupt, InterruptibleSleep};
use username_avail::progress::{FileProgressStore, ProgressKey};
use username_avail::scan::{Scanner, StartPoint, StopReason};

static INTERRUPT: LazyLock<Interrupt> = LazyLock::new(Interrupt::new);

#[derive(Parser)]
#[command(
    name = "username-avail",
    version,
    about = "Find usernames that are genuinely available",
    after_help = "Each username is sampled repeatedly across request variations and \
                  only reported once the responses agree. The registry rate limits \
                  aggressively, so expect a few seconds per username.\n\n\
                  Logging goes to stderr; set RUST_LOG to override the level."
)]
struct Cli {
    /// JSON file overriding engine settings
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log every sample
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress output and informational logs, exit code only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check specific usernames (also reads from stdin)
    Check {
        /// Usernames to check
        #[arg(allow_hyphen_values = true)]
        names: Vec<String>,

        /// Maximum passes over the variation set per username
        #[arg(long)]
        cycles: Option<u32>,

        /// Only print available usernames
        #[arg(short, long)]
        available_only: bool,
    },
    /// Walk the username space of a length and kind, resuming saved progress
    Scan {
        /// Username length (1-20)
        #[arg(short, long)]
        length: usize,

        /// numbers, letters or mixed
        #[arg(short, long, default_value_t = IdentifierKind::Numbers)]
        kind: IdentifierKind,

        /// Start at this counter without reading or writing saved progress
        #[arg(long, conflicts_with = "fresh")]
        start: Option<u64>,

        /// Ignore saved progress and start from zero
        #[arg(long)]
        fresh: bool,

        /// Stop after this many finds (0 for no limit)
        #[arg(long)]
        target: Option<usize>,

        /// Stop after this many checks
        #[arg(long)]
        max_checks: Option<u64>,

        /// Directory for progress files
        #[arg(long, default_value = ".", value_name = "DIR")]
        state_dir: PathBuf,
    },
    /// Check the first few usernames of a length and kind, printing JSON
    Bulk {
        /// Username length (1-20)
        #[arg(short, long)]
        length: usize,

        /// numbers, letters or mixed
        #[arg(short, long, default_value_t = IdentifierKind::Numbers)]
        kind: IdentifierKind,

        /// Checks to perform (at most 20)
        #[arg(long, default_value_t = MAX_BULK_CHECKS)]
        max_checks: u64,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("username_avail={level}")));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(unix)]
extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPT.trigger();
}

/// Route Ctrl-C into the shared interrupt so scans stop at the next check
/// boundary and save their position.
#[cfg(unix)]
fn install_interrupt_handler() {
    // Initialize before the handler can observe it.
    LazyLock::force(&INTERRUPT);
    let handler = on_sigint as extern "C" fn(libc::c_int);
    // SAFETY: the handler only performs an atomic store.
    let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        warn!("could not install interrupt handler, Ctrl-C will not save progress");
    }
}

#[cfg(not(unix))]
fn install_interrupt_handler() {}

fn load_config(path: Option<&PathBuf>) -> Result<Config, ExitCode> {
    match path {
        Some(path) => Config::from_file(path).map_err(|e| {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }),
        None => Ok(Config::default()),
    }
}

fn print_record(record: &CheckRecord) {
    if record.available {
        println!(
            "{}\t{}\t{}\t{}",
            record.identifier, record.verdict, record.verify_url, record.signup_url
        );
    } else {
        println!("{}\t{}", record.identifier, record.verdict);
    }
}

fn read_names(mut names: Vec<String>) -> Result<Vec<String>, ExitCode> {
    if !io::stdin().is_terminal() {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) => {
                    let trimmed = l.trim();
                    if !trimmed.is_empty() {
                        names.push(trimmed.to_owned());
                    }
                }
                Err(e) => {
                    eprintln!("error: reading stdin: {e}");
                    return Err(ExitCode::from(2));
                }
            }
        }
    }
    if names.is_empty() {
        eprintln!("error: no usernames provided");
        eprintln!("usage: username-avail check [OPTIONS] [NAMES...]");
        return Err(ExitCode::from(2));
    }
    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.trim().to_owned()));
    Ok(names)
}

fn run_check(
    mut config: Config,
    names: Vec<String>,
    cycles: Option<u32>,
    available_only: bool,
    quiet: bool,
) -> ExitCode {
    let names = match read_names(names) {
        Ok(names) => names,
        Err(code) => return code,
    };
    if let Some(cycles) = cycles {
        config.consensus.max_cycles = cycles;
    }
    let mut engine = config.engine(&INTERRUPT);
    let sleep = InterruptibleSleep::new(INTERRUPT.clone());

    let mut all_available = true;
    for name in &names {
        if INTERRUPT.is_triggered() {
            all_available = false;
            break;
        }
        let record = match check_identifier(&mut engine, &sleep, name, &config.check, &config.links) {
            Ok(record) => record,
            Err(e) => {
                all_available = false;
                if !quiet && !available_only {
                    println!("{}\tinvalid: {e}", name.trim());
                }
                continue;
            }
        };
        if !record.available {
            all_available = false;
        }
        if quiet || (available_only && !record.available) {
            continue;
        }
        print_record(&record);
    }

    if all_available {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn valid_length(length: usize) -> bool {
    (1..=MAX_IDENTIFIER_LENGTH).contains(&length)
}

struct ScanArgs {
    length: usize,
    kind: IdentifierKind,
    start: Option<u64>,
    fresh: bool,
    target: Option<usize>,
    max_checks: Option<u64>,
    state_dir: PathBuf,
}

fn run_scan(config: Config, args: ScanArgs, quiet: bool) -> ExitCode {
    if !valid_length(args.length) {
        eprintln!(
            "error: length must be between 1 and {MAX_IDENTIFIER_LENGTH}, got {}",
            args.length
        );
        return ExitCode::from(2);
    }
    let mut settings = config.scan.clone();
    if let Some(target) = args.target {
        settings.target_found = (target > 0).then_some(target);
    }
    if args.max_checks.is_some() {
        settings.max_checks = args.max_checks;
    }
    let start = match (args.start, args.fresh) {
        (Some(n), _) => StartPoint::Manual(n),
        (None, true) => StartPoint::Fresh,
        (None, false) => StartPoint::Stored,
    };

    let key = ProgressKey::new(args.length, args.kind);
    let store = FileProgressStore::new(args.state_dir);
    let engine = config.engine(&INTERRUPT);
    let sleep = InterruptibleSleep::new(INTERRUPT.clone());
    let outcome = Scanner::new(key, settings, engine, store, sleep)
        .with_interrupt(INTERRUPT.clone())
        .run(start);

    if !quiet {
        for finding in &outcome.findings {
            print_record(&CheckRecord::from_result(finding, &config.links));
        }
    }
    info!(
        stop = %outcome.stop,
        checked = outcome.checked,
        found = outcome.findings.len(),
        next = outcome.state.position,
        "scan finished"
    );
    if outcome.stop == StopReason::Interrupted {
        info!(next = outcome.state.position, "interrupted, rerun the same scan to resume");
    }

    if outcome.findings.is_empty() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_bulk(config: &Config, request: BulkRequest) -> ExitCode {
    let engine = config.engine(&INTERRUPT);
    let sleep = InterruptibleSleep::new(INTERRUPT.clone());
    let report = match check_bulk(
        engine,
        sleep,
        &request,
        &config.scan,
        &config.links,
        INTERRUPT.clone(),
    ) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("error: encoding report: {e}");
            return ExitCode::from(2);
        }
    }
    if report.results.is_empty() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    install_interrupt_handler();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(code) => return code,
    };

    match cli.command {
        Command::Check {
            names,
            cycles,
            available_only,
        } => run_check(config, names, cycles, available_only, cli.quiet),
        Command::Scan {
            length,
            kind,
            start,
            fresh,
            target,
            max_checks,
            state_dir,
        } => run_scan(
            config,
            ScanArgs {
                length,
                kind,
                start,
                fresh,
                target,
                max_checks,
                state_dir,
            },
            cli.quiet,
        ),
        Command::Bulk {
            length,
            kind,
            max_checks,
        } => run_bulk(
            &config,
            BulkRequest {
                length,
                kind,
                max_checks,
            },
        ),
    }
}
