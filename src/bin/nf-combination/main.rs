use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, event};

use synapse::bdd::Bdd;
use synapse::bdd::dot::{DotConfig, NodeStyle};
use synapse::cli::{exit_on_error, init_logging, output_path};
use synapse::config::merge::MergeConfig;
use synapse::config::meta::LogLevel;
use synapse::expr::SolverToolbox;
use synapse::merge::{Origin, merge};

/// Combines two network functions into one that runs both
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CombinationParams {
    #[arg(long)]
    bdd1: PathBuf,
    #[arg(long)]
    bdd2: PathBuf,
    /// Output prefix: writes <out>.bdd and, when enabled, <out>.gv
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    config: PathBuf,
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn main() {
    exit_on_error(run(CombinationParams::parse()))
}

fn run(params: CombinationParams) -> anyhow::Result<()> {
    let level: LogLevel = params.log_level.parse()?;
    init_logging(Level::from(level))?;
    let config = MergeConfig::from_path(&params.config)?;
    let policy = config.policy()?;
    let first = Bdd::read(&params.bdd1)?;
    let second = Bdd::read(&params.bdd2)?;
    let solver = SolverToolbox::new();
    let merged = merge(&first, &second, &policy, &solver)?;
    println!("{}", merged.report);

    let bdd_path = output_path(&params.out, "bdd");
    merged.bdd.write(&bdd_path)?;
    event!(Level::INFO, "Wrote {}", bdd_path.display());
    if config.enable_gviz {
        let gv_path = output_path(&params.out, "gv");
        let dot = merged.bdd.to_dot_with(&DotConfig::default(), |node| {
            let fill = match merged.report.origins.get(&node.id) {
                Some(Origin::First) => Some(config.bdd1_color.clone()),
                Some(Origin::Second) => Some(config.bdd2_color.clone()),
                _ => None,
            };
            NodeStyle { fill, note: None }
        })?;
        fs::write(&gv_path, dot)?;
        event!(Level::INFO, "Wrote {}", gv_path.display());
    }
    Ok(())
}
