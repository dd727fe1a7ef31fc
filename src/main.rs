use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;
use sketchtree::config::{Config, DistanceMode, Method};
use sketchtree::mash::MashTool;
use sketchtree::startup::SketchTree;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

/// Build a midpoint-rooted phylogenetic tree from Mash sketches
#[derive(Parser, Debug)]
#[command(name = "sketchtree")]
#[command(
    about = "Merge Mash sketches, compute pairwise distances and build a rooted tree",
    long_about = None
)]
struct Args {
    /// Sketch files (.msh), merged in the given order
    #[arg(required = true)]
    sketches: Vec<PathBuf>,

    /// Mash executable
    #[arg(long = "mash")]
    mash: Option<PathBuf>,

    /// Worker threads for pairwise distances (default: all cores)
    #[arg(short = 't', long = "threads")]
    threads: Option<usize>,

    /// Clustering method
    #[arg(short = 'm', long = "method", value_enum)]
    method: Option<MethodArg>,

    /// Where distances come from
    #[arg(short = 'd', long = "distance-mode", value_enum)]
    distance_mode: Option<DistanceModeArg>,

    /// Smallest branch length allowed next to the root
    #[arg(long = "min-root-branch")]
    min_root_branch: Option<f64>,

    /// JSON configuration file; flags override its values
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Write the distance matrix as TSV
    #[arg(long = "matrix")]
    matrix: Option<PathBuf>,

    /// Newick output file (default: stdout)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodArg {
    Nj,
    Upgma,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DistanceModeArg {
    Delegated,
    Sketch,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = config_from_args(&args)?;
    let tool = MashTool::from_config(&config);

    let sketch_tree = SketchTree::from_sources(tool, args.sketches.as_slice(), config)?;
    info!(
        "Loaded {} genomes ({} hashes shared by all)",
        sketch_tree.dataset().len(),
        sketch_tree.dataset().core_hashes()
    );

    if let Some(path) = &args.matrix {
        fs::write(path, sketch_tree.distances()?.to_tsv())?;
        info!("Distance matrix written to {}", path.display());
    }

    let newick = sketch_tree.tree()?.to_newick();
    match &args.output {
        Some(path) => {
            fs::write(path, format!("{}\n", newick))?;
            info!("Tree written to {}", path.display());
        }
        None => writeln!(io::stdout().lock(), "{}", newick)?,
    }

    Ok(())
}

/// Config file (or defaults) with the command line flags applied on top
fn config_from_args(args: &Args) -> sketchtree::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    if let Some(mash) = &args.mash {
        config.mash_exe = mash.clone();
    }
    if let Some(threads) = args.threads {
        config.threads = Some(threads);
    }
    if let Some(method) = args.method {
        config.method = match method {
            MethodArg::Nj => Method::Nj,
            MethodArg::Upgma => Method::Upgma,
        };
    }
    if let Some(mode) = args.distance_mode {
        config.distance_mode = Some(match mode {
            DistanceModeArg::Delegated => DistanceMode::Delegated,
            DistanceModeArg::Sketch => DistanceMode::Sketch,
        });
    }
    if let Some(length) = args.min_root_branch {
        config.min_root_branch_length = length;
    }
    config.validate()?;

    Ok(config)
}
