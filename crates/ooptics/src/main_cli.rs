//! ooptics CLI: query and acquire from Ocean Optics USB spectrometers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

mod cli;

/// Shared shutdown flag, cleared by the Ctrl+C handler.
pub static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser)]
#[command(
    name = "ooptics-cli",
    version,
    about = "Query and acquire spectra from Ocean Optics USB spectrometers"
)]
struct Args {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Resource string, e.g. USB0::0x2457::0x1022::RAW (overrides config)
    #[arg(long, global = true)]
    resource: Option<String>,

    /// Expected model, as a code (4130, 0x1022) or a name (USB4000) (overrides config)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: cli::Command,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    ctrlc::set_handler(move || {
        RUNNING.store(false, Ordering::SeqCst);
    })
    .ok();

    let ctx = match cli::Context::new(
        args.json,
        args.config,
        args.resource,
        args.model.as_deref(),
    ) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run(args.command, &ctx) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
