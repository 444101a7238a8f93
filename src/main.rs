//! Binary entrypoint for the Volley CLI.
//!
//! Commands:
//! - `start [--tcp HOST:PORT] [--channel N] [--via-repeater KEY]` - run the ping responder
//! - `init` - write a starter `config.toml`
//! - `import-geo --csv <file> [--db <dir>]` - build the postal code database
//! - `lookup <zipcode|prefix> [--db <dir>]` - query the postal code database
//!
//! See the library crate docs for module-level details: `volley::`.
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::Path;

use volley::bot::Dispatcher;
use volley::config::Config;
use volley::geo::store::{load_table_or_empty, GeoStore};
use volley::geo::{GeoLookup, GeoTable};
use volley::mesh::bridge::BridgeClient;
use volley::mesh::{DeviceIdentity, MeshClient};

#[derive(Parser)]
#[command(name = "volley")]
#[command(about = "A compact ping responder for MeshCore mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the bridge and answer pings
    Start {
        /// Bridge address (HOST:PORT), overrides [mesh] tcp
        #[arg(long)]
        tcp: Option<String>,

        /// Channel index to monitor, overrides [bot] channel
        #[arg(long)]
        channel: Option<u8>,

        /// Public key prefix of a preferred relay, overrides [bot] preferred_relay
        #[arg(short = 'r', long = "via-repeater")]
        via_repeater: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Import a postal code CSV into the geo database
    ImportGeo {
        /// Semicolon separated source file
        #[arg(long)]
        csv: String,

        /// Database directory, defaults to [geo] db_path
        #[arg(long)]
        db: Option<String>,
    },
    /// Look up a postal code or dialling prefix
    Lookup {
        /// Five digit postal code or dialling prefix starting with 0
        query: String,

        /// Database directory, defaults to [geo] db_path
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = if Path::new(&cli.config).exists() {
        Some(Config::load(&cli.config).await?)
    } else {
        None
    };
    init_logging(&loaded, cli.verbose);

    match cli.command {
        Commands::Start {
            tcp,
            channel,
            via_repeater,
        } => {
            if loaded.is_none() {
                warn!("Config file {} not found, using defaults", cli.config);
            }
            let mut config = loaded.unwrap_or_default();
            if let Some(tcp) = tcp {
                config.mesh.tcp = tcp;
            }
            if let Some(channel) = channel {
                config.bot.channel = channel;
            }
            if let Some(relay) = via_repeater {
                config.bot.preferred_relay = Some(relay);
            }
            config.validate()?;
            run_bot(config).await?;
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            println!("Created default configuration at {}", cli.config);
            println!("Next: volley import-geo --csv <zipcodes.csv>");
        }
        Commands::ImportGeo { csv, db } => {
            let db = db.unwrap_or_else(|| loaded.unwrap_or_default().geo.db_path);
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("Failed to open CSV file {}", csv))?;
            let store = GeoStore::open(&db)
                .with_context(|| format!("Failed to open geo database {}", db))?;
            let summary = store.import_csv(std::io::BufReader::new(file))?;
            println!(
                "Imported {} rows into {} ({} with coordinates, {} skipped)",
                summary.imported, db, summary.with_coordinates, summary.skipped
            );
        }
        Commands::Lookup { query, db } => {
            let db = db.unwrap_or_else(|| loaded.unwrap_or_default().geo.db_path);
            let table = load_table_or_empty(&db)
                .with_context(|| format!("Failed to open geo database {}", db))?;
            print_lookup(&table, query.trim());
        }
    }

    Ok(())
}

async fn run_bot(config: Config) -> Result<()> {
    let geo = load_table_or_empty(&config.geo.db_path)?;

    info!("Connecting to bridge at {}...", config.mesh.tcp);
    let mut client = BridgeClient::connect_with_backoff(
        &config.mesh.tcp,
        config.mesh.reply_timeout(),
        config.mesh.reconnect_max_backoff(),
    )
    .await
    .map_err(|e| anyhow!("Failed to connect to {}: {}", config.mesh.tcp, e))?;

    let identity = match client.device_identity().await {
        Ok(identity) => {
            info!("Device: {}", identity.name);
            identity
        }
        Err(e) => {
            warn!("Could not query device identity: {}", e);
            DeviceIdentity::default()
        }
    };

    if let Some(relay) = &config.bot.preferred_relay {
        info!("Preferred relay: {}", relay);
    }
    if let Err(e) = client.start_message_fetching().await {
        warn!("Could not start message fetching: {}", e);
    }

    let mut bot = Dispatcher::new(client, geo, &config, identity);
    bot.run_until(shutdown_signal()).await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_lookup(table: &GeoTable, query: &str) {
    if volley::bot::classify::is_zipcode(query) {
        match table.coordinates_for_zipcode(query) {
            Some(c) => println!("✅ {} -> {:.4}, {:.4}", query, c.lat, c.lon),
            None => println!("❌ No coordinates for zipcode {}", query),
        }
    } else if volley::bot::classify::is_prefix(query) {
        match table.zipcode_for_prefix(query) {
            Some(hit) => {
                let coords = table
                    .coordinates_for_zipcode(&hit.zipcode)
                    .map(|c| format!("{:.4}, {:.4}", c.lat, c.lon))
                    .unwrap_or_else(|| "no coordinates".to_string());
                println!("✅ {} -> {} {} ({})", query, hit.zipcode, hit.place, coords);
            }
            None => println!("❌ No place for prefix {}", query),
        }
    } else {
        println!("❌ '{}' is neither a zipcode nor a dialling prefix", query);
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if verbosity == 0 {
        builder.filter_module("volley::mesh::bridge", log::LevelFilter::Warn);
    }

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.clone())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| eprintln!("Cannot open log file {}: {}", path, e))
                .ok()
        });

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // Mirror to the console only when someone is watching.
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
