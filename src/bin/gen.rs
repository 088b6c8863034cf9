//! geoshard-gen: CLI tool for building the IPv4 geolocation index.

use clap::{Parser, Subcommand};
use geoshard::{BuildConfig, DatasetDownloader, GeoIpIndexBuilder, GeoIpReader, RowPolicy};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "geoshard-gen")]
#[command(author = "Kaitu.io")]
#[command(version = "0.1.0")]
#[command(
    about = "Build a sharded IPv4 geolocation index from GeoLite2 CSV tables",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index directory from the raw CSV tables
    Build {
        /// YAML build configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory containing the CSV tables
        #[arg(long)]
        raw_dir: Option<PathBuf>,

        /// Output directory (replaced on success)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Maximum shard file size in bytes
        #[arg(long)]
        shard_size: Option<usize>,

        /// Skip malformed rows instead of aborting
        #[arg(long)]
        skip_malformed: bool,

        /// Verbose output (debug logging)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Download the CSV tables (license key from MAXMIND_LICENSE_KEY)
    Download {
        /// YAML build configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory receiving the CSV tables
        #[arg(long)]
        raw_dir: Option<PathBuf>,

        /// Download even if the tables are up to date
        #[arg(short, long)]
        force: bool,

        /// Build the index after downloading
        #[arg(short, long)]
        build: bool,

        /// Verbose output (debug logging)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Look up an IPv4 address in a built index
    Lookup {
        /// Address to look up
        ip: String,

        /// Index directory
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Commands::Build { verbose, .. } | Commands::Download { verbose, .. } => *verbose,
            Commands::Lookup { .. } => false,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // -v shows per-shard and per-page progress unless RUST_LOG says otherwise
    let default_filter = if cli.command.verbose() { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Commands::Build {
            config,
            raw_dir,
            data_dir,
            shard_size,
            skip_malformed,
            verbose,
        } => load_config(config, raw_dir, data_dir).and_then(|mut config| {
            if let Some(limit) = shard_size {
                config.shard_size_limit = limit;
            }
            if skip_malformed {
                config.malformed_rows = RowPolicy::Skip;
            }
            build(config, verbose)
        }),
        Commands::Download {
            config,
            raw_dir,
            force,
            build: then_build,
            verbose,
        } => load_config(config, raw_dir, None)
            .and_then(|config| download(config, force, then_build, verbose)),
        Commands::Lookup { ip, data_dir } => lookup(&ip, &data_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(
    path: Option<PathBuf>,
    raw_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<BuildConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => BuildConfig::load(&path)?,
        None => BuildConfig::default(),
    };
    if let Some(raw_dir) = raw_dir {
        config.raw_dir = raw_dir;
    }
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    Ok(config)
}

fn build(config: BuildConfig, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    if verbose {
        println!("Building {:?} -> {:?}", config.raw_dir, config.data_dir);
    }

    let data_dir = config.data_dir.clone();
    let summary = GeoIpIndexBuilder::new(config).build()?;

    if verbose {
        println!(
            "Parsed: {} locations, {} blocks, {} skipped rows",
            summary.locations, summary.blocks, summary.skipped_rows
        );
        println!(
            "Params: location record size {}, {} entries per mid index",
            summary.params.location_record_size, summary.params.nodes_per_mid_index
        );
    }

    println!("Generated {:?} ({} shards)", data_dir, summary.shards);
    Ok(())
}

fn download(
    config: BuildConfig,
    force: bool,
    then_build: bool,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let downloader = DatasetDownloader::new(&config);
    if downloader.ensure_fresh(force)? {
        println!("Downloaded dataset into {:?}", config.raw_dir);
    } else if verbose {
        println!("Dataset in {:?} is up to date", config.raw_dir);
    }

    if then_build {
        build(config, verbose)?;
    }
    Ok(())
}

fn lookup(ip: &str, data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let reader = GeoIpReader::open(data_dir)?;
    match reader.lookup_str(ip)? {
        Some(info) => {
            println!(
                "range:    {} - {}",
                Ipv4Addr::from(info.range.0),
                Ipv4Addr::from(info.range.1)
            );
            println!("country:  {}", info.country);
            println!("region:   {}", info.region);
            println!("city:     {}", info.city);
            println!("timezone: {}", info.timezone);
            println!("eu:       {}", info.eu);
            println!("ll:       {}, {}", info.ll.0, info.ll.1);
            println!("metro:    {}", info.metro);
            println!("area:     {}", info.area);
        }
        None => println!("{}: not found", ip),
    }
    Ok(())
}
