use std::process::ExitCode;

use clap::Parser;

mod options;
mod profile;
mod run;

#[derive(Parser)]
#[command(name = "tileforge")]
#[command(about = "Convert OpenStreetMap .osm.pbf files into vector tiles")]
#[command(version)]
struct Cli {
    /// Source .osm.pbf file
    input: String,

    /// Target directory or .mbtiles/.pmtiles file
    output: String,

    /// Bounding box to use if the input file has no bbox header,
    /// example: minlon,minlat,maxlon,maxlat
    #[arg(long)]
    bbox: Option<String>,

    /// Merge with existing .mbtiles (overwrites otherwise)
    #[arg(long)]
    merge: bool,

    /// Config JSON file
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Tag-processing script file
    #[arg(long, default_value = "process.lua")]
    process: String,

    /// Verbose error output
    #[arg(long)]
    verbose: bool,

    /// Don't enforce way/node integrity
    #[arg(long)]
    skip_integrity: bool,

    /// Log how long each tile takes
    #[arg(long)]
    log_tile_timings: bool,

    /// Temporary storage for node/way/relation data
    #[arg(long)]
    store: Option<String>,

    /// Prefer speed at the expense of memory
    #[arg(long)]
    fast: bool,

    /// Use a faster data structure for node lookups
    /// NOTE: this requires the input to be renumbered (osmium renumber)
    #[arg(long)]
    compact: bool,

    /// Store nodes uncompressed
    #[arg(long)]
    no_compress_nodes: bool,

    /// Store ways uncompressed
    #[arg(long)]
    no_compress_ways: bool,

    /// Generate geometries from the OSM stores; uses less memory
    #[arg(long)]
    lazy_geometries: bool,

    /// Materialize geometries; uses more memory
    #[arg(long)]
    materialize_geometries: bool,

    /// Use an alternate reading/writing strategy for low-memory machines
    #[arg(long)]
    shard_stores: bool,

    /// Number of threads (automatically detected if 0)
    #[arg(long, default_value_t = 0)]
    threads: u32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let options = match options::resolve(&cli) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    match run::run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
