use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use checkrando::settings::{RandomizerSettings, SkipSetting, StartingItem};
use checkrando::traverse::{Explorer, acquire_transition_states, starting_states};
use checkrando_game::{SceneId, Topology};
use checkrando_logic::{LogicCompiler, LogicEvaluator, MacroTable};
use serde::Deserialize;

const SKIP_LAYERS: [(&str, &str); 1] = [("LedgeClip", "demo_skips.txt")];

#[derive(Debug, Deserialize)]
struct ScenariosList {
    scenarios: Vec<Scenario>,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    name: String,
    #[serde(default)]
    skips: Vec<String>,
    #[serde(default)]
    starting_states: Vec<StartingItem>,
    end_scene: SceneId,
    end_alias: String,
    #[serde(default)]
    fail: bool,
}

fn data_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("data")
}

fn get_settings(scenario: &Scenario) -> RandomizerSettings {
    // Only the skip and starting-state settings matter for reachability.
    RandomizerSettings {
        skip_settings: SKIP_LAYERS
            .iter()
            .map(|(name, _)| SkipSetting {
                name: name.to_string(),
                enabled: scenario.skips.iter().any(|s| s == name),
            })
            .collect(),
        starting_items: scenario.starting_states.clone(),
        ..Default::default()
    }
}

fn get_evaluator(topology: &Topology, settings: &RandomizerSettings) -> Result<LogicEvaluator> {
    let base_path = data_path();
    let mut macros = MacroTable::new();
    macros.parse(&std::fs::read_to_string(base_path.join("demo_macros.txt"))?)?;
    settings.bind_macros(&mut macros);
    let skips = settings.skip_predicate();
    let compiler = LogicCompiler::new(topology, &macros, &skips);
    let (base, report) = compiler.compile_file("base", &base_path.join("demo_logic.txt"))?;
    if report.skipped > 0 {
        bail!("{} statements skipped in the demo logic", report.skipped);
    }
    let mut layers = vec![base];
    for (name, file) in SKIP_LAYERS {
        if settings.skip_enabled(name) {
            let (layer, _) = compiler.compile_file(name, &base_path.join(file))?;
            layers.push(layer);
        }
    }
    Ok(LogicEvaluator::new(layers))
}

fn test_scenario(topology: &Topology, scenario: &Scenario) -> Result<()> {
    let settings = get_settings(scenario);
    let evaluator = get_evaluator(topology, &settings)?;
    let end = topology
        .node_by_alias(scenario.end_scene, &scenario.end_alias)
        .with_context(|| {
            format!(
                "Unknown node {} in scene {}",
                scenario.end_alias, scenario.end_scene
            )
        })?;

    // Checks grant nothing here: only the starting states count.
    let mut states = starting_states(&settings.starting_items);
    let mut explorer = Explorer::new(topology);
    explorer.add_root(topology.start);
    explorer.explore(topology, &evaluator, &mut states, &mut |node, states| {
        acquire_transition_states(topology, node, states)
    });

    let reached = explorer.visited[end];
    if reached == scenario.fail {
        bail!(
            "Scenario '{}': expected {} to be {}",
            scenario.name,
            topology.node_label(end),
            if scenario.fail { "unreachable" } else { "reachable" }
        );
    }
    Ok(())
}

#[test]
fn test_logic_scenarios() -> Result<()> {
    let topology = Topology::load(&data_path().join("demo_topology.json"))?;
    let scenarios_str = std::fs::read_to_string("tests/scenarios.json")?;
    let scenarios: ScenariosList = serde_json::from_str(&scenarios_str)?;
    let mut failures = vec![];
    for scenario in &scenarios.scenarios {
        println!("Checking scenario: {}", scenario.name);
        if let Err(e) = test_scenario(&topology, scenario) {
            failures.push(format!("{e:#}"));
        }
    }
    if !failures.is_empty() {
        bail!("{} scenarios failed:\n{}", failures.len(), failures.join("\n"));
    }
    Ok(())
}
