use anyhow::{Context, Result, bail};
use checkrando::randomize::Session;
use checkrando::settings::{RandomizerSettings, try_upgrade_settings};
use checkrando_game::Topology;
use checkrando_logic::{LogicCompiler, LogicEvaluator, MacroTable};
use clap::Parser;
use log::info;
use rand::RngCore;
use std::path::{Path, PathBuf};

#[derive(Parser)]
struct Args {
    #[arg(long)]
    topology: PathBuf,

    #[arg(long)]
    logic: PathBuf,

    /// Extra logic layer, compiled only when the skip setting NAME is enabled
    #[arg(long = "skip-layer", value_name = "NAME=PATH")]
    skip_layers: Vec<String>,

    #[arg(long)]
    macros: Option<PathBuf>,

    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    seed: Option<String>,

    #[arg(long)]
    max_attempts: Option<usize>,

    #[arg(long)]
    output_mapping: Option<PathBuf>,

    #[arg(long)]
    output_spoiler_log: Option<PathBuf>,
}

fn load_settings(path: Option<&Path>) -> Result<RandomizerSettings> {
    let Some(path) = path else {
        return Ok(RandomizerSettings::default());
    };
    let settings_str = std::fs::read_to_string(path)
        .with_context(|| format!("Unable to read settings at {}", path.display()))?;
    let (_, settings) = try_upgrade_settings(&settings_str)
        .with_context(|| format!("Unable to parse settings at {}", path.display()))?;
    Ok(settings)
}

fn parse_skip_layer(arg: &str) -> Result<(String, PathBuf)> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => bail!("invalid --skip-layer '{arg}', expected NAME=PATH"),
    }
}

fn get_evaluator(
    args: &Args,
    topology: &Topology,
    settings: &RandomizerSettings,
) -> Result<LogicEvaluator> {
    let mut macros = MacroTable::new();
    if let Some(path) = &args.macros {
        let macros_str = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read macros at {}", path.display()))?;
        let n = macros
            .parse(&macros_str)
            .with_context(|| format!("Unable to parse macros at {}", path.display()))?;
        info!("Loaded {n} macros");
    }
    settings.bind_macros(&mut macros);
    let skips = settings.skip_predicate();
    let compiler = LogicCompiler::new(topology, &macros, &skips);

    let (base, _) = compiler.compile_file("base", &args.logic)?;
    let mut layers = vec![base];
    for arg in &args.skip_layers {
        let (name, path) = parse_skip_layer(arg)?;
        if settings.skip_enabled(&name) {
            let (layer, _) = compiler.compile_file(&name, &path)?;
            layers.push(layer);
        } else {
            info!("Logic layer {name} is disabled");
        }
    }
    Ok(LogicEvaluator::new(layers))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    let topology = Topology::load(&args.topology)?;
    let mut settings = load_settings(args.settings.as_deref())?;
    if let Some(max_attempts) = args.max_attempts {
        settings.max_attempts = max_attempts;
    }
    let evaluator = get_evaluator(&args, &topology, &settings)?;

    let seed = match &args.seed {
        Some(s) => s.clone(),
        None => format!("{:08x}", rand::thread_rng().next_u32()),
    };
    info!("Seed: {seed}, settings flags: {:016x}", settings.to_flags()?);

    let session = Session::new(&settings, &topology, &evaluator);
    let outcome = session.randomize(&seed)?;
    info!(
        "Randomized on attempt {} (seed {}): {} checks mapped, {} transition swaps",
        outcome.attempt,
        outcome.seed,
        outcome.mapping.len(),
        outcome.swaps.len()
    );

    // Save the outputs:
    if let Some(output_mapping_path) = &args.output_mapping {
        println!("Writing mapping to {}", output_mapping_path.display());
        let mapping_str = serde_json::to_string_pretty(&outcome.spoiler_log.mapping)?;
        std::fs::write(output_mapping_path, mapping_str)?;
    }

    if let Some(output_spoiler_log_path) = &args.output_spoiler_log {
        println!(
            "Writing spoiler log to {}",
            output_spoiler_log_path.display()
        );
        let spoiler_str = serde_json::to_string_pretty(&outcome.spoiler_log)?;
        std::fs::write(output_spoiler_log_path, spoiler_str)?;
    }

    Ok(())
}
