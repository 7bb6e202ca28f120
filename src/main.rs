mod batch;
mod config;
mod dispatch;
mod engine;
mod error_tracker;
mod lifecycle;
mod reader;
mod retry;
mod watcher;

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};

use config::EngineConfig;
use dispatch::CommandSpec;
use lifecycle::ProcessRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "fsbatch",
    version,
    about = "Batch filesystem change events into serialized command invocations",
    after_help = "The command receives each batch newline-joined in the FSBATCH_EVENTS \
                  environment variable. A failing command is retried forever on a fixed \
                  interval with the same batch."
)]
struct Cli {
    /// Directory to watch (recursively)
    watch_dir: PathBuf,

    /// Command to run per batch, with its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,

    /// Event type to react to, repeatable (default: all)
    #[arg(short = 'e', long = "event", value_name = "TYPE")]
    events: Vec<String>,

    /// Event type to ignore, repeatable
    #[arg(short = 'x', long = "exclude-event", value_name = "TYPE")]
    exclude_events: Vec<String>,

    /// Debug-level diagnostics
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(short, long)]
    quiet: bool,

    /// Seconds to wait for stragglers before finalizing a batch
    #[arg(long, value_name = "SECS")]
    settle_secs: Option<u64>,

    /// Seconds between retries of a failed command
    #[arg(long, value_name = "SECS")]
    retry_secs: Option<u64>,

    /// Watcher executable override (default: fswatch)
    #[arg(long, value_name = "PROGRAM")]
    watcher: Option<OsString>,
}

/// Log-level directive for the three verbosity tiers.
fn log_directive(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "fsbatch=error"
    } else if verbose {
        "fsbatch=debug"
    } else {
        "fsbatch=info"
    }
}

fn init_tracing(cli: &Cli) -> Result<()> {
    // Diagnostics go to stderr only; stdout belongs to the command's own
    // output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_directive(cli.quiet, cli.verbose).parse()?),
        )
        .init();
    Ok(())
}

fn usage_error(message: &str) -> ! {
    eprintln!("fsbatch: {}", message);
    eprintln!("{}", Cli::command().render_usage());
    std::process::exit(1);
}

fn run(cli: Cli) -> Result<()> {
    init_tracing(&cli)?;

    let command = match CommandSpec::from_argv(cli.command) {
        Some(command) => command,
        None => usage_error("missing command"),
    };

    let config = EngineConfig::from_env(cli.watch_dir, command)?.with_overrides(
        cli.settle_secs,
        cli.retry_secs,
        cli.watcher,
        cli.events,
        cli.exclude_events,
    );
    if let Err(err) = config.validate() {
        usage_error(&err.to_string());
    }

    let registry = ProcessRegistry::new();
    lifecycle::install_signal_handlers(registry.clone())?;

    engine::run(&config, &registry)
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // -h/--help and --version exit 0; anything else is a usage
            // error and exits 1 (clap's default would be 2).
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    match run(cli) {
        Ok(()) => {
            // The watcher stream closed. The engine wound down cleanly, but
            // exit 0 is reserved for the help path.
            std::process::exit(1);
        }
        Err(err) => {
            // Not routed through tracing: this must reach stderr even when
            // the subscriber failed to initialize.
            eprintln!("fsbatch: {:#}", err);
            std::process::exit(1);
        }
    }
}
