use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

mod commands;

/// Top-level CLI argument parser for the `vk` command
#[derive(Parser)]
#[command(
    name = "vk",
    about = "veckern: run vector kernels against a golden reference",
    version
)]
struct Cli {
    /// Log every harness step (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `vk` CLI
#[derive(Subcommand)]
enum Commands {
    /// Run a scenario through every requested variant and report accuracy
    Run {
        /// Path to the scenario YAML file
        scenario: PathBuf,
        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,
        /// Write the reference and every variant output as binaries here
        #[arg(long)]
        dump: Option<PathBuf>,
    },
    /// Compare variant output files on disk with a reference file
    Compare {
        /// Reference binary (headerless f32)
        reference: PathBuf,
        /// Directory holding `<name>_<variant>.bin` files
        #[arg(long)]
        dir: PathBuf,
        /// Output name prefix of the variant files
        #[arg(long)]
        name: String,
        /// Comma-separated variant tags (default: every untiled variant)
        #[arg(long, value_delimiter = ',')]
        variants: Vec<String>,
        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Validate a scenario YAML file
    Validate {
        /// Path to the scenario YAML file
        scenario: PathBuf,
    },
    /// List operators and the variant tags each supports
    Variants {
        /// Restrict the listing to one operator
        op: Option<String>,
    },
}

/// Dispatch a parsed CLI subcommand to its handler
fn run_command(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Run {
            scenario,
            format,
            dump,
        } => commands::run::run(&scenario, format.parse()?, dump.as_deref()),
        Commands::Compare {
            reference,
            dir,
            name,
            variants,
            format,
        } => commands::compare::run(&reference, &dir, &name, &variants, format.parse()?),
        Commands::Validate { scenario } => commands::validate::run(&scenario),
        Commands::Variants { op } => commands::variants::run(op.as_deref()),
    }
}

/// Route `tracing` output to stderr; `warn` unless `RUST_LOG` or `-v` says otherwise.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

/// Entry point: parse CLI arguments and run the selected subcommand
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run_command(cli.command) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
