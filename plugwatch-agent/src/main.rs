//! Plugwatch Agent - Smart plug metric bridge
//!
//! Polls a TP-Link style smart plug through an external device CLI and pushes
//! every reading to a Zabbix-compatible server through an external sender:
//! - Fixed catalog of 27 metrics plus model-specific extras
//! - Two device queries per run, cached; everything else is derived from them
//! - One sender invocation per metric, failures aggregated into the exit code

mod catalog;
mod config;
mod device;
mod engine;
mod extract;
mod sender;

use chrono::Local;
use clap::Parser;
use engine::Session;
use tracing::{error, info, warn};

/// Exit code when no device address was given.
const EXIT_NO_DEVICE: i32 = 3;
/// Exit code when no ingest target was given.
const EXIT_NO_TARGET: i32 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "plugwatch-agent",
    version,
    about = "Forward smart plug metrics to a monitoring server"
)]
struct Cli {
    /// Address of the plug to poll
    #[arg(short, long, env = "PLUGWATCH_DEVICE")]
    device: Option<String>,

    /// Monitoring server receiving the values
    #[arg(short = 'z', long, env = "PLUGWATCH_SERVER")]
    server: Option<String>,

    /// Host label on the server (defaults to the device address)
    #[arg(short = 's', long, env = "PLUGWATCH_HOST")]
    host: Option<String>,

    /// Relay sender output and pass -vv through to it
    #[arg(short, long)]
    verbose: bool,
}

fn verbose_from_env() -> bool {
    std::env::var("PLUGWATCH_VERBOSE").map(|v| !v.is_empty()).unwrap_or(false)
}

fn run(cli: Cli) -> i32 {
    let device = match cli.device.filter(|d| !d.is_empty()) {
        Some(d) => d,
        None => {
            error!("no device address; pass --device or set PLUGWATCH_DEVICE");
            return EXIT_NO_DEVICE;
        }
    };
    let server = match cli.server.filter(|s| !s.is_empty()) {
        Some(s) => s,
        None => {
            error!("no ingest target; pass --server or set PLUGWATCH_SERVER");
            return EXIT_NO_TARGET;
        }
    };
    let host_label = cli.host.filter(|h| !h.is_empty()).unwrap_or_else(|| device.clone());
    let verbose = cli.verbose || verbose_from_env();

    let config = config::load_config();
    info!("collecting from {} into {} as {}", device, server, host_label);

    let mut session =
        match Session::open(&config, &device, &server, &host_label, verbose, Local::now()) {
            Ok(session) => session,
            Err(e) => {
                error!("initialization failed: {}", e);
                return e.exit_code();
            }
        };
    info!("model {}, {} extension items", session.model(), session.extensions().len());

    let report = session.run();
    for failure in &report.failures {
        error!("{}: {}", failure.item, failure.error);
    }
    if report.is_clean() {
        info!("all {} metrics delivered", report.attempted);
    } else {
        warn!("{} of {} metrics failed", report.failures.len(), report.attempted);
    }
    report.exit_code()
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    info!("plugwatch-agent v{} starting", env!("CARGO_PKG_VERSION"));
    std::process::exit(run(cli));
}
