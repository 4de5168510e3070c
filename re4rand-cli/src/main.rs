use clap::Parser;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

use re4rand_core::{run, RunSettings};

#[derive(Debug, Parser)]
#[command(name = "re4rand", version, about = "Seeded enemy, item and shop randomiser")]
struct Args {
    /// JSON run configuration. Defaults apply to every missing key.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of catalog JSON files.
    #[arg(long)]
    catalog: PathBuf,

    /// Entity dump to randomise.
    #[arg(long)]
    entities: PathBuf,

    #[arg(long)]
    output: PathBuf,

    /// Overrides the seed from the configuration file.
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = false)]
    compress_trace: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn main() {
    let args = Args::parse();
    init_tracing(args.debug);

    let settings = RunSettings {
        config_path: args.config,
        catalog_path: args.catalog,
        entities_path: args.entities,
        output_path: args.output,
        seed: args.seed,
        compress_trace: args.compress_trace,
    };

    match run(settings) {
        Ok(out_dir) => println!("Wrote {}", out_dir.display()),
        Err(err) => {
            error!(error = %err, "run failed");
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}
