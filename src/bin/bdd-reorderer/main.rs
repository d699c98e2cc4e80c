use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use tracing::{Level, event};

use synapse::cli::{exit_on_error, init_logging, load_bdd};
use synapse::config::SynapseConfig;
use synapse::config::meta::LogLevel;
use synapse::config::search::ReorderConfig;
use synapse::expr::SolverToolbox;
use synapse::reorder::reorder_all;

/// Counts the distinct diagrams reachable by reordering a network function
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct ReordererParams {
    /// A serialized BDD; call paths are ignored when given
    #[arg(long = "in")]
    input: Option<PathBuf>,
    /// Hoists allowed along one lineage, -1 for no bound
    #[arg(long, allow_negative_numbers = true)]
    max: Option<i64>,
    /// A synapse config whose [reorder] section supplies the bound
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "INFO")]
    log_level: String,
    call_paths: Vec<PathBuf>,
}

fn main() {
    exit_on_error(run(ReordererParams::parse()))
}

fn run(params: ReordererParams) -> anyhow::Result<()> {
    let level: LogLevel = params.log_level.parse()?;
    init_logging(Level::from(level))?;
    let mut reorder = match &params.config {
        Some(path) => SynapseConfig::from_path(path)?.reorder,
        None => ReorderConfig::default(),
    };
    if let Some(max) = params.max {
        reorder.max_reordering = max;
    }
    let solver = SolverToolbox::new();
    let bdd = load_bdd(params.input.as_ref(), &params.call_paths, &solver)?;
    let summary = reorder_all(&bdd, reorder.bound()?, &solver)?;
    event!(
        Level::INFO,
        "Explored {} states, deepest lineage applied {} hoists",
        summary.explored,
        summary.deepest
    );
    println!("{} {}", "Total:".bold(), summary.distinct.to_string().green());
    Ok(())
}
