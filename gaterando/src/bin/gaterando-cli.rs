use anyhow::{Context, Result};
use clap::Parser;
use gaterando::randomize::{RandomizeError, Randomizer};
use gaterando::settings::RandomizerSettings;
use gaterando_game::{Graph, WorldData};
use log::info;
use rand::{RngCore, SeedableRng};
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// Area/door/warp catalog (JSON).
    #[arg(long)]
    catalog: PathBuf,

    /// Randomizer settings (JSON); defaults require only --start-area.
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    start_area: Option<String>,

    #[arg(long)]
    random_seed: Option<usize>,

    /// Where to write the resolved link summary (JSON).
    #[arg(long)]
    output_links: Option<PathBuf>,
}

fn get_settings(args: &Args) -> Result<RandomizerSettings> {
    if let Some(path) = &args.settings {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        return Ok(serde_json::from_str(&text)?);
    }
    let start_area = args
        .start_area
        .as_deref()
        .context("either --settings or --start-area is required")?;
    Ok(RandomizerSettings::new(start_area))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    let catalog_text = std::fs::read_to_string(&args.catalog)
        .with_context(|| format!("unable to read {}", args.catalog.display()))?;
    let world: WorldData = serde_json::from_str(&catalog_text)
        .with_context(|| format!("unable to parse {}", args.catalog.display()))?;
    let settings = get_settings(&args)?;
    let graph = Graph::build(&world)?;

    let seed = match args.random_seed {
        Some(s) => s,
        None => (rand::rngs::StdRng::from_entropy().next_u64() & 0xFFFFFFFF) as usize,
    };
    info!("seed: {seed}");

    let randomizer = Randomizer {
        base_graph: &graph,
        settings: &settings,
    };
    let randomization = match randomizer.connect(seed) {
        Ok(r) => r,
        Err(e @ RandomizeError::Unsolvable { .. }) => {
            anyhow::bail!("{e}");
        }
        Err(RandomizeError::Config(e)) => return Err(e),
    };

    for link in &randomization.links {
        info!("{}: {} -> {}", link.name, link.from, link.to);
    }
    if let Some(path) = &args.output_links {
        let out = serde_json::to_string_pretty(&randomization.links)?;
        std::fs::write(path, out).with_context(|| format!("unable to write {}", path.display()))?;
    }
    Ok(())
}
