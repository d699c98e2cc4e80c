use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use toml_edit::ser::to_string_pretty;
use tracing::{Level, event};

use synapse::cli::{exit_on_error, init_logging, load_bdd};
use synapse::config::SynapseConfig;
use synapse::expr::SolverToolbox;

#[derive(Debug, Clone, Subcommand)]
pub enum SynapseCommands {
    /// Writes a default config file
    New { config: Option<PathBuf> },
    /// Searches for an execution plan of a network function
    Synth {
        #[arg(long)]
        config: Option<PathBuf>,
        /// A serialized BDD; call paths are ignored when given
        #[arg(long)]
        bdd: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
        call_paths: Vec<PathBuf>,
    },
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct SynapseParams {
    #[command(subcommand)]
    command: SynapseCommands,
}

fn main() {
    let params = SynapseParams::parse();
    exit_on_error(match params.command {
        SynapseCommands::New { config } => new(config.unwrap_or(PathBuf::from("./synapse.toml"))),
        SynapseCommands::Synth {
            config,
            bdd,
            out,
            call_paths,
        } => synthesize(config, bdd, out, call_paths),
    })
}

fn new(path: PathBuf) -> anyhow::Result<()> {
    let config = SynapseConfig::default();
    fs::write(path, to_string_pretty(&config)?)?;
    Ok(())
}

fn synthesize(
    config: Option<PathBuf>,
    bdd: Option<PathBuf>,
    out: Option<PathBuf>,
    call_paths: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let p: SynapseConfig = match config {
        Some(path) => SynapseConfig::from_path(path)?,
        None => SynapseConfig::default(),
    };
    init_logging(Level::from(p.meta.log_level))?;
    let solver = SolverToolbox::new();
    let bdd = load_bdd(bdd.as_ref(), &call_paths, &solver)?;
    let params = p.resolve()?;
    event!(
        Level::INFO,
        "Searching {} with {:?} over {:?}",
        bdd.name,
        params.heuristic,
        params.targets
    );
    let report = params.build(bdd, &solver)?.search()?;
    println!("{report}");
    if let Some(out) = out {
        colored::control::set_override(false);
        fs::write(&out, report.winner.to_string())?;
        colored::control::unset_override();
        event!(Level::INFO, "Wrote plan to {}", out.display());
    }
    Ok(())
}
