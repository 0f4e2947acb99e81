//! Run a powder station against an R200 on a serial port.
//!
//! ```text
//! powder-station --port /dev/ttyUSB0 --duration 30 --csv reads.csv --location "Hall B"
//! powder-station --config station.toml --register "Ti64 lot 12"
//! ```

use std::fs::File;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};

use powder_rfid::{
    JsonFileNameStore, MemoryNameStore, NameStore, RegistryEvent, SerialTransport, Station,
    StationConfig, TrackerError,
};

/// Interval between ingestion ticks
const TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Parser)]
#[command(version, about = "Track powder bottles with an R200 UHF RFID reader")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device (overrides the configuration)
    #[arg(short, long)]
    port: Option<String>,

    /// Transmit power in hundredths of a dBm (overrides the configuration)
    #[arg(long, value_parser = clap::value_parser!(i16).range(0..))]
    power: Option<i16>,

    /// Stop after this many seconds; runs until killed when omitted
    #[arg(short, long)]
    duration: Option<u64>,

    /// Register the next bottle held steady in front of the reader under this name
    #[arg(long, value_name = "NAME")]
    register: Option<String>,

    /// Write the read history as CSV when done
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,

    /// Test location written into every CSV row
    #[arg(long, default_value = "Station")]
    location: String,

    /// Print the final status as JSON
    #[arg(long)]
    status: bool,
}

fn main() {
    let args = Args::parse();

    let mut config = match args.config.as_deref() {
        Some(path) => match StationConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(2);
            }
        },
        None => StationConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = port.clone();
    }
    if let Some(power) = args.power {
        config.power = power;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Err(e) = run(&args, &config) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &StationConfig) -> Result<(), TrackerError> {
    let names: Box<dyn NameStore> = match &config.names_path {
        Some(path) => Box::new(JsonFileNameStore::open(path)?),
        None => {
            warn!("No names_path configured, registered names will not survive a restart");
            Box::new(MemoryNameStore::new())
        }
    };

    let transport = SerialTransport::new(&config.port, config.baud_rate)
        .map_err(|e| TrackerError::Transport(format!("{}: {}", config.port, e)))?;
    info!("Opened {} at {} baud", config.port, config.baud_rate);

    let mut station = Station::with_config(transport, names, config);
    station.initialize()?;

    if args.register.is_some() {
        station.register_start()?;
        info!("Hold the bottle in front of the reader");
    } else {
        station.start()?;
    }

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        for read in station.poll()? {
            if let RegistryEvent::NewTag(index) = read.registry {
                let name = station
                    .registry()
                    .record(index)
                    .map(|r| r.friendly_name.clone())
                    .unwrap_or_default();
                info!("Bottle #{}: {} {} ({} dBm)", index + 1, read.report.epc, name, read.report.rssi);
            }
        }

        if let Some(name) = &args.register {
            if station.registration().is_ready() {
                let epc = station.register_confirm(name, "")?;
                println!("Registered {} as '{}'", epc, name);
                break;
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            if args.register.is_some() {
                warn!("No bottle confirmed before the deadline");
                station.register_cancel();
            }
            break;
        }
        std::thread::sleep(TICK);
    }

    station.stop()?;

    if let Some(path) = &args.csv {
        let file = File::create(path)
            .map_err(|e| TrackerError::Export(format!("{}: {}", path.display(), e)))?;
        station.write_history_csv(file, &args.location)?;
        info!("Wrote {} reads to {}", station.history_log().len(), path.display());
    }
    if args.status {
        println!("{}", station.status_json()?);
    }
    Ok(())
}
