use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_config::{CacheDef, PipelineDef};
use kiln_pipeline::Pipeline;
use kiln_resolver::{Resolver, StandardResolver};
use kiln_tasks::builtin_registry;

/// Kiln - runs pipelines of tasks that produce and reuse cached artifacts
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.kiln)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Log at debug level unless KILN_LOG is set
  #[arg(long, short, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline and print its report
  Run {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,

    /// Use a local artifact cache in this directory instead of the one the
    /// pipeline declares
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Run every task even when its output artifact is cached
    #[arg(long)]
    force: bool,
  },

  /// Validate a pipeline and print the order its tasks would run in
  Check {
    /// Path to the pipeline file (JSON)
    pipeline_file: PathBuf,
  },

  /// List the available task kinds
  Tasks,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".kiln"),
  };

  match cli.command {
    Some(Commands::Run {
      pipeline_file,
      cache_dir,
      force,
    }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(pipeline_file, cache_dir, force, data_dir))?;
    }
    Some(Commands::Check { pipeline_file }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(check(pipeline_file, data_dir))?;
    }
    Some(Commands::Tasks) => {
      for factory in builtin_registry().factories() {
        println!("{:<16} {}", factory.kind().to_string(), factory.description());
      }
    }
    None => {
      println!("kiln - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing(verbose: bool) {
  let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| {
    EnvFilter::new(if verbose { "debug" } else { "info" })
  });
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

async fn run(
  pipeline_file: PathBuf,
  cache_dir: Option<PathBuf>,
  force: bool,
  data_dir: PathBuf,
) -> Result<()> {
  let mut def = load(&pipeline_file).await?;
  if let Some(path) = cache_dir {
    let path = std::path::absolute(&path)
      .with_context(|| format!("invalid cache directory: {}", path.display()))?;
    def.cache = Some(CacheDef::Local { path });
  }

  let pipeline = resolve(&pipeline_file, def, force, &data_dir).await?;
  let report = pipeline
    .execute()
    .await
    .context("pipeline execution failed")?;

  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}

async fn check(pipeline_file: PathBuf, data_dir: PathBuf) -> Result<()> {
  let def = load(&pipeline_file).await?;
  let pipeline = resolve(&pipeline_file, def, false, &data_dir).await?;

  for (position, registration) in pipeline.registrations().iter().enumerate() {
    println!(
      "{:>3}. {} ({})",
      position + 1,
      registration.name(),
      registration.task().kind()
    );
  }
  Ok(())
}

async fn load(pipeline_file: &Path) -> Result<PipelineDef> {
  let content = tokio::fs::read_to_string(pipeline_file)
    .await
    .with_context(|| format!("failed to read pipeline file: {}", pipeline_file.display()))?;

  PipelineDef::from_json(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", pipeline_file.display()))
}

async fn resolve(
  pipeline_file: &Path,
  def: PipelineDef,
  force: bool,
  data_dir: &Path,
) -> Result<Pipeline> {
  let scratch = data_dir.join("scratch");
  tokio::fs::create_dir_all(&scratch)
    .await
    .with_context(|| format!("failed to create {}", scratch.display()))?;

  let base_dir = pipeline_file
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .unwrap_or(Path::new("."));

  let resolver = StandardResolver::new(builtin_registry())
    .with_base_dir(base_dir)
    .with_scratch_dir(scratch)
    .with_force(force);

  resolver
    .resolve(def)
    .await
    .context("failed to resolve pipeline")
}
