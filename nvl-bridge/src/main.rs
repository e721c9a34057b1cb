//! NVL Bridge CLI Application
//!
//! Listens for CODESYS NVL telegrams on UDP and republishes the decoded process
//! values on an MQTT broker. It uses the nvl-decoder library and adds:
//! - TOML configuration with hot reload
//! - UDP receive loop with an optional worker pool
//! - MQTT (or stdout) publishing

use anyhow::{Context, Result};
use clap::Parser;
use nvl_decoder::{DispatchOutcome, Dispatcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod config;
mod listener;
mod publisher;

use publisher::{MqttPublisher, Publisher, StdoutPublisher};

/// NVL Bridge - Forward CODESYS network variables to MQTT
#[derive(Parser, Debug)]
#[command(name = "nvl-bridge")]
#[command(about = "Decode CODESYS NVL telegrams and publish them to MQTT", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override the UDP bind address from the config file
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Number of packet worker threads (1 = handle in the receive loop)
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    workers: usize,

    /// Print records to stdout instead of publishing to MQTT
    #[arg(long)]
    dry_run: bool,

    /// Watch the config file and apply changes every N seconds (0 = off)
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    reload_secs: u64,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Decode one hex-encoded telegram and exit
    #[arg(long, value_name = "HEX")]
    decode_hex: Option<String>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("NVL Bridge v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", nvl_decoder::VERSION);

    // Invalid configuration is fatal at startup
    let (app_config, registry) = config::load_config(&args.config)?;

    if args.check {
        return check_mode(&args, &registry);
    }

    let dispatcher = Arc::new(Dispatcher::new(registry));

    let publisher: Arc<dyn Publisher> = if args.dry_run || args.decode_hex.is_some() {
        Arc::new(StdoutPublisher::new(&app_config.mqtt))
    } else {
        Arc::new(MqttPublisher::connect(&app_config.mqtt)?)
    };

    if let Some(hex) = &args.decode_hex {
        return decode_mode(hex, &dispatcher, publisher.as_ref());
    }

    let options = listener::ListenerOptions {
        bind: args.bind.clone().unwrap_or(app_config.listen.bind),
        max_datagram: app_config.listen.max_datagram,
        queue_depth: app_config.listen.queue_depth,
        workers: args.workers.max(1),
        reload_every: (args.reload_secs > 0).then(|| Duration::from_secs(args.reload_secs)),
        config_path: args.config.clone(),
    };
    listener::run(options, dispatcher, publisher)
}

/// Print registry contents and exit
fn check_mode(args: &Args, registry: &nvl_decoder::Registry) -> Result<()> {
    let stats = registry.stats();
    println!("✓ Configuration valid: {:?}", args.config);
    println!("  Lists:     {}", stats.num_lists);
    println!("  Variables: {}", stats.num_variables);
    if let Some(name) = registry.validator().checksum_name() {
        println!("  Checksum:  {}", name);
    }

    for cob_id in registry.cob_ids() {
        if let Some(def) = registry.lookup(cob_id) {
            println!(
                "\n  [{}] {} - {} bytes, header {}, {} endian",
                def.label(),
                def.topic_prefix,
                def.required_length(),
                def.header_bytes,
                def.byte_order
            );
            for var in &def.variables {
                println!(
                    "    {:<24} {:<6} -> {}",
                    var.name,
                    var.kind,
                    def.topic_for(var)
                );
            }
        }
    }
    Ok(())
}

/// Run one hex-encoded telegram through the dispatcher
fn decode_mode(hex: &str, dispatcher: &Dispatcher, publisher: &dyn Publisher) -> Result<()> {
    let packet = parse_hex(hex).context("Invalid --decode-hex input")?;
    let outcome = dispatcher.handle_packet(&packet);
    if let DispatchOutcome::Dropped(reason) = &outcome {
        println!("✗ Packet dropped: {}", reason);
    }
    listener::publish_outcome(&outcome, publisher);
    Ok(())
}

/// Parse hex, ignoring whitespace, ':' and '-' separators
fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    hex::decode(&digits).with_context(|| format!("not a hex byte string: '{}'", digits))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
