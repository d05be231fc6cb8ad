//! ringtrace: collect ring-buffer trace entries from target cores.
//!
//! # Usage
//!
//! ```text
//! ringtrace
//! ringtrace -a 0xD0000000 -p 5000 -o run1_
//! ringtrace --config trace.yaml --singlecore -v
//! ringtrace --sim-cores 4 --sim-drop-every 50
//! ```
//!
//! Every traced core `i` writes `<prefix>core<i>.txt`, one `"<id> <timestamp>"`
//! line per entry. The binary drives a simulated target; any probe backend
//! plugs in through `ringtrace_core::transport::DebugTransport`.

use std::error::Error as _;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ringtrace_core::config::{self, TraceConfig};
use ringtrace_core::scheduler::{Interruptor, PollScheduler};
use ringtrace_core::setup;
use ringtrace_core::transport::sim::{SimConfig, SimTarget};
use ringtrace_core::TraceError;

/// Setup or configuration failed before polling started.
const EXIT_SETUP: i32 = 1;
/// A fatal error stopped the polling loop.
const EXIT_RUNTIME: i32 = 3;
/// Second Ctrl-C: 128 + SIGINT.
const EXIT_INTERRUPTED: i32 = 130;


/// Poll trace ring buffers in target memory and write one file per core.
#[derive(Parser, Debug, Clone)]
#[command(name = "ringtrace", version)]
struct Opts {
    /// Ring buffer base address (decimal or 0x-prefixed hex).
    #[arg(short = 'a', long, value_parser = parse_address)]
    buffer_address: Option<u64>,

    /// Polling period in microseconds.
    #[arg(short = 'p', long)]
    polling_period: Option<u64>,

    /// Debug server host.
    #[arg(short = 's', long)]
    server_address: Option<String>,

    /// Output file prefix; core i writes <PREFIX>core<i>.txt.
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Trace only the first core.
    #[arg(short = 'c', long)]
    singlecore: bool,

    /// Device index within the first system on the server.
    #[arg(long)]
    device: Option<u32>,

    /// YAML configuration file. Command-line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of simulated cores.
    #[arg(long, default_value_t = 2)]
    sim_cores: u32,

    /// Entries each simulated core produces per polling round.
    #[arg(long, default_value_t = 3)]
    sim_burst: u32,

    /// Simulate a link loss every N rounds per core (0 = never).
    #[arg(long, default_value_t = 0)]
    sim_drop_every: u64,

    /// Enable debug logging.
    #[arg(short = 'v', long)]
    verbose: bool,
}


/// A fatal error together with the process exit status it maps to.
struct Failure {
    code: i32,
    error: TraceError,
}

impl Failure {
    fn setup(error: TraceError) -> Self {
        Failure { code: EXIT_SETUP, error }
    }

    fn runtime(error: TraceError) -> Self {
        let code = if error.is_setup() { EXIT_SETUP } else { EXIT_RUNTIME };
        Failure { code, error }
    }
}


fn main() {
    let opts = Opts::parse();
    init_tracing(opts.verbose);

    if let Err(failure) = run(opts) {
        eprintln!("ringtrace: {}", failure.error);
        let mut cause = failure.error.source();
        while let Some(err) = cause {
            eprintln!("Caused by: {}", err);
            cause = err.source();
        }
        process::exit(failure.code);
    }
}


fn run(opts: Opts) -> Result<(), Failure> {
    let config = resolve_config(&opts).map_err(Failure::setup)?;
    debug!(?config, "resolved configuration");

    let interruptor = Interruptor::new();
    install_ctrlc(interruptor.clone()).map_err(Failure::setup)?;

    let mut target = SimTarget::new(sim_config(&opts, &config));
    let links = setup::attach(&mut target, &config).map_err(Failure::setup)?;
    let slots = setup::open_outputs(links, &config).map_err(Failure::setup)?;

    let mut scheduler = PollScheduler::new(
        &mut target,
        config.ring_descriptor(),
        slots,
        config.poll_period(),
    )
    .with_interruptor(interruptor);

    let result = scheduler.run();
    let summary = scheduler.shutdown();
    let entries: u64 = summary.iter().map(|(_, stats)| stats.entries).sum();

    let rounds = result.map_err(Failure::runtime)?;
    info!(rounds, entries, "trace session finished");
    Ok(())
}


/// Defaults, then the config file, then command-line flags.
fn resolve_config(opts: &Opts) -> Result<TraceConfig, TraceError> {
    let mut config = match &opts.config {
        Some(path) => config::load(path)?,
        None => TraceConfig::default(),
    };
    if let Some(address) = opts.buffer_address {
        config.buffer_address = address;
    }
    if let Some(period) = opts.polling_period {
        config.polling_period_us = period;
    }
    if let Some(host) = &opts.server_address {
        config.host = host.clone();
    }
    if let Some(prefix) = &opts.output {
        config.output_prefix = prefix.clone();
    }
    if opts.singlecore {
        config.single_core = true;
    }
    if let Some(device) = opts.device {
        config.device_index = device;
    }
    config.validate()?;
    Ok(config)
}


fn sim_config(opts: &Opts, config: &TraceConfig) -> SimConfig {
    SimConfig {
        cores: opts.sim_cores,
        burst: opts.sim_burst,
        drop_every: opts.sim_drop_every,
        base: config.buffer_address,
        layout: config.ring,
        host: config.host.clone(),
        ..SimConfig::default()
    }
}


fn install_ctrlc(interruptor: Interruptor) -> Result<(), TraceError> {
    ctrlc::set_handler(move || {
        if interruptor.is_set() {
            process::exit(EXIT_INTERRUPTED);
        }
        info!("shutdown requested, finishing current round");
        interruptor.set();
    })
    .map_err(|e| TraceError::Setup(format!("cannot install Ctrl-C handler: {}", e)))
}


fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}


fn parse_address(text: &str) -> Result<u64, String> {
    config::parse_address(text).map_err(|e| e.to_string())
}
