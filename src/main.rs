mod archive;
mod cache;
mod config;
mod content;
mod dataset;
mod executor;
mod fetch;
mod logging;
mod pipeline;
mod resolver;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use content::ResumePolicy;
use fetch::HttpFetcher;
use pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "wayback-harvest")]
#[command(about = "Build a dataset of historical webpage snapshots from the Wayback Machine")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./wayback-harvest.yaml or $XDG_CONFIG_HOME/wayback-harvest/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory holding the domain list and both caches
  #[arg(short, long)]
  data_dir: Option<PathBuf>,

  /// Number of domains to take from the top of the list
  #[arg(short = 'n', long)]
  num_domains: Option<usize>,

  /// Seed for target date assignment
  #[arg(long)]
  seed: Option<u64>,

  /// Items fetched concurrently per batch
  #[arg(long)]
  batch_size: Option<usize>,

  /// Minimum seconds between batch starts
  #[arg(long)]
  interval_secs: Option<u64>,

  /// Which missing content to go back for: last_populated or scan_all
  #[arg(long)]
  resume: Option<ResumePolicy>,

  /// Print what would be fetched and exit
  #[arg(long)]
  dry_run: bool,
}

impl Args {
  fn apply(self, mut config: config::Config) -> config::Config {
    if let Some(dir) = self.data_dir {
      config.data_dir = dir;
    }
    if let Some(n) = self.num_domains {
      config.num_domains = n;
    }
    if let Some(seed) = self.seed {
      config.seed = seed;
    }
    if let Some(size) = self.batch_size {
      config.batch.size = size;
    }
    if let Some(secs) = self.interval_secs {
      config.batch.interval_secs = secs;
    }
    if let Some(resume) = self.resume {
      config.content.resume = resume;
    }
    config
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let dry_run = args.dry_run;

  // Command line flags win over the config file
  let config = config::Config::load(args.config.as_deref())?;
  let config = args.apply(config);
  config.validate()?;

  let _log_guard = logging::init(&config.logging)?;

  let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
  let pipeline = Pipeline::new(config, fetcher);

  if dry_run {
    let requests = pipeline.requests()?;
    println!("{}", pipeline.plan(&requests));
    return Ok(());
  }

  let (_rows, summary) = pipeline.run().await?;
  println!(
    "{} domains: {} resolved, {} unresolved, {} with content, {} still missing content",
    summary.domains,
    summary.resolved,
    summary.unresolved,
    summary.with_content,
    summary.missing_content
  );

  Ok(())
}
