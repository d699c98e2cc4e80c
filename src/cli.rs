//! Plumbing shared by the command-line tools.

use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::bdd::{Bdd, BddBuilder};
use crate::expr::SolverToolbox;

/// Errors by default; `level` for this crate. `RUST_LOG` still applies.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .from_env()?
        .add_directive(format!("synapse={level}").parse()?);
    let indicatif_layer = IndicatifLayer::new();
    let writer = indicatif_layer.get_stderr_writer();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(indicatif_layer)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();
    Ok(())
}

/// A diagram from a `.bdd` file, or built from raw call paths.
pub fn load_bdd(
    bdd: Option<&PathBuf>,
    call_paths: &[PathBuf],
    solver: &SolverToolbox,
) -> anyhow::Result<Bdd> {
    match bdd {
        Some(path) => Ok(Bdd::read(path)?),
        None => Ok(BddBuilder::from_files("nf", call_paths, solver)?),
    }
}

/// `prefix` with `.ext` appended, keeping any dots already in the name.
pub fn output_path(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Prints the one-line diagnostic the tools exit with.
pub fn exit_on_error(result: anyhow::Result<()>) {
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::cli::output_path;

    #[test]
    fn test_output_path_keeps_dots() {
        assert_eq!(output_path(Path::new("out/nat.v2"), "bdd"), PathBuf::from("out/nat.v2.bdd"));
        assert_eq!(output_path(Path::new("merged"), "gv"), PathBuf::from("merged.gv"));
    }
}
