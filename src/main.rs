use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use log::{info, LevelFilter};

use vr_panorama::{RuntimeKind, ViewerConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RuntimeArg {
    None,
    Simulated,
}

impl From<RuntimeArg> for RuntimeKind {
    fn from(arg: RuntimeArg) -> Self {
        match arg {
            RuntimeArg::None => RuntimeKind::None,
            RuntimeArg::Simulated => RuntimeKind::Simulated,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "vr-panorama", version, about = "Stereo 360° panorama viewer")]
struct Args {
    /// Panorama to open (overrides the config file)
    #[arg(value_name = "IMAGE")]
    image: Option<PathBuf>,
    /// Path to YAML config
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Headset runtime to use
    #[arg(long, value_enum)]
    runtime: Option<RuntimeArg>,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .filter_module("vr_panorama", level)
        .parse_default_env()
        .init();

    let mut config = match &args.config {
        Some(path) => ViewerConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    if let Some(image) = args.image {
        config.panorama = Some(image);
    }
    if let Some(runtime) = args.runtime {
        config.runtime = runtime.into();
    }
    config.validate().context("invalid configuration values")?;

    info!("Panorama viewer starting ({:?} runtime)", config.runtime);
    vr_panorama::run(config).context("viewer failed")?;
    info!("Bye");
    Ok(())
}
