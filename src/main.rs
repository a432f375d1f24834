use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use faceharvest::config::{self, Config, Disposition, Naming};
use faceharvest::{filter, scan};
use log::info;

#[derive(Parser)]
#[command(name = "faceharvest")]
#[command(
    version,
    about = "Batch face harvester - crop detected faces into fixed-size PNG tiles"
)]
struct Cli {
    /// Config file (defaults to faceharvest.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in every color image and write the crops
    Run(RunArgs),
    /// List the images that would be processed, without detecting
    Scan {
        /// Directory to scan
        #[arg(short, long)]
        source: Option<PathBuf>,
        /// Keep images whose channel layout is not recognized
        #[arg(long)]
        keep_unrecognized: bool,
    },
    /// Write the effective configuration as TOML
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory holding the source images
    #[arg(short, long)]
    source: Option<PathBuf>,
    /// Cascade classifier definition (OpenCV XML)
    #[arg(long)]
    cascade: Option<PathBuf>,
    /// Existing directory receiving the crops
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Edge of the square output tiles in pixels
    #[arg(long)]
    size: Option<u32>,
    /// Pyramid step between detection scales
    #[arg(long)]
    scale_factor: Option<f64>,
    /// Overlapping hits required to report a face
    #[arg(long)]
    min_neighbors: Option<u32>,
    /// Smallest face edge in pixels
    #[arg(long)]
    min_size: Option<u32>,
    /// Keep images whose channel layout is not recognized
    #[arg(long)]
    keep_unrecognized: bool,
    /// Output file naming
    #[arg(long, value_enum)]
    naming: Option<Naming>,
}

impl RunArgs {
    fn apply(self, cfg: &mut Config) {
        if let Some(source) = self.source {
            cfg.source_dir = source;
        }
        if let Some(cascade) = self.cascade {
            cfg.cascade_path = cascade;
        }
        if let Some(output) = self.output {
            cfg.output_dir = output;
        }
        if let Some(size) = self.size {
            cfg.output_size = size;
        }
        if let Some(scale_factor) = self.scale_factor {
            cfg.scale_factor = scale_factor;
        }
        if let Some(min_neighbors) = self.min_neighbors {
            cfg.min_neighbors = min_neighbors;
        }
        if let Some(min_size) = self.min_size {
            cfg.min_size = min_size;
        }
        if self.keep_unrecognized {
            cfg.unrecognized = Disposition::Keep;
        }
        if let Some(naming) = self.naming {
            cfg.naming = naming;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .parse_default_env()
        .init();

    let mut cfg = match cli.command {
        Commands::InitConfig { .. } => Config::default(),
        _ => config::load_config(cli.config.as_deref())?,
    };

    let result = match cli.command {
        Commands::Run(args) => {
            args.apply(&mut cfg);
            run(&cfg)
        }
        Commands::Scan {
            source,
            keep_unrecognized,
        } => {
            if let Some(source) = source {
                cfg.source_dir = source;
            }
            if keep_unrecognized {
                cfg.unrecognized = Disposition::Keep;
            }
            scan(&cfg)
        }
        Commands::InitConfig { force } => init_config(&cfg, cli.config.as_deref(), force),
    };

    log::logger().flush();
    result
}

fn run(cfg: &Config) -> Result<()> {
    info!(
        "Harvesting faces from {} into {}",
        cfg.source_dir.display(),
        cfg.output_dir.display()
    );
    let summary = faceharvest::run(cfg).context("Harvest aborted")?;
    if summary.write_failures > 0 {
        log::warn!(
            "{} crops could not be written to {}",
            summary.write_failures,
            cfg.output_dir.display()
        );
    }
    Ok(())
}

fn scan(cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let images = scan::scan_directory(&cfg.source_dir).context("Failed to scan source directory")?;
    let outcome = filter::filter_images(&images, cfg.unrecognized);

    for image in &outcome.kept {
        println!("{}", image.path.display());
    }
    info!(
        "{} of {} images would be processed ({} grayscale, {} unrecognized, {} unreadable)",
        outcome.kept.len(),
        images.len(),
        outcome.grayscale,
        outcome.unrecognized,
        outcome.failed
    );
    Ok(())
}

fn init_config(cfg: &Config, path: Option<&std::path::Path>, force: bool) -> Result<()> {
    let target = path.unwrap_or(&config::CONFIG_PATH);
    if target.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite",
            target.display()
        );
    }
    config::save_config(cfg, Some(target))?;
    info!("Wrote config to {}", target.display());
    Ok(())
}
