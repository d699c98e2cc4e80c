use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing::{Level, event};

use synapse::bdd::Bdd;
use synapse::bdd::dot::DotConfig;
use synapse::bdd::hit_rate::HitReport;
use synapse::cli::{exit_on_error, init_logging};
use synapse::config::meta::LogLevel;

/// Draws a BDD colored by how much traffic flows through each node
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct HitRateParams {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    /// Lines of `<call-path filename> <hits>`
    #[arg(long)]
    report: PathBuf,
    #[arg(long, default_value = "INFO")]
    log_level: String,
}

fn main() {
    exit_on_error(run(HitRateParams::parse()))
}

fn run(params: HitRateParams) -> anyhow::Result<()> {
    let level: LogLevel = params.log_level.parse()?;
    init_logging(Level::from(level))?;
    let bdd = Bdd::read(&params.input)?;
    let report = HitReport::parse(&fs::read_to_string(&params.report)?)?;
    event!(
        Level::INFO,
        "{} hits over {} call paths",
        report.total(),
        bdd.total_call_paths
    );
    let config = DotConfig {
        include_init: false,
        ..DotConfig::default()
    };
    let dot = bdd.to_dot_with(&config, |node| report.style(node))?;
    fs::write(&params.out, dot)?;
    event!(Level::INFO, "Wrote {}", params.out.display());
    Ok(())
}
