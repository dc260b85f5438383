use std::{path::PathBuf, process::Command};

use anyhow::{Context, Result};
use checkrando::randomize::Session;
use checkrando::settings::try_upgrade_settings;
use checkrando::spoiler_log::SpoilerLog;
use checkrando_game::Topology;
use checkrando_logic::{LogicCompiler, LogicEvaluator, MacroTable};

fn data_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data").join(name)
}

fn run_cli(seed: &str, output: &str) -> Result<SpoilerLog> {
    let cli_path = env!("CARGO_BIN_EXE_checkrando-cli");
    // Concurrent test runs must not share spoiler files.
    let out_path = std::env::temp_dir().join(format!("{}_{output}", std::process::id()));
    let status = Command::new(cli_path)
        .arg("--topology")
        .arg(data_path("demo_topology.json"))
        .arg("--logic")
        .arg(data_path("demo_logic.txt"))
        .arg("--macros")
        .arg(data_path("demo_macros.txt"))
        .arg("--settings")
        .arg(data_path("demo_settings.json"))
        .arg("--skip-layer")
        .arg(format!("LedgeClip={}", data_path("demo_skips.txt").display()))
        .args(["--seed", seed])
        .arg("--output-spoiler-log")
        .arg(&out_path)
        .status()?;
    assert!(status.success());
    let spoiler_str = std::fs::read_to_string(&out_path)
        .with_context(|| format!("Unable to read spoiler log at {}", out_path.display()))?;
    std::fs::remove_file(&out_path)?;
    Ok(serde_json::from_str(&spoiler_str)?)
}

/// Consistency test to ensure that given the same settings and seed values, the same
/// placement is produced. This helps catch any unintended non-deterministic behavior
/// in the randomization process, e.g. iteration over unordered maps.
#[test]
fn consistency_test() -> Result<()> {
    let log1 = run_cli("12345", "checkrando_consistency_test1.json")?;
    let log2 = run_cli("12345", "checkrando_consistency_test2.json")?;
    assert_eq!(log1.seed, format!("12345{}", suffix(log1.attempt)));
    assert!(!log1.mapping.is_empty());
    if log1 != log2 {
        panic!(
            "Inconsistent placement: {} vs {} mapping entries, attempts {} and {}",
            log1.mapping.len(),
            log2.mapping.len(),
            log1.attempt,
            log2.attempt
        );
    }
    Ok(())
}

fn suffix(attempt: usize) -> String {
    if attempt <= 1 {
        String::new()
    } else {
        format!("/{attempt}")
    }
}

/// Same check in-process, across several seeds and both transition modes.
#[test]
fn session_consistency_test() -> Result<()> {
    let topology = Topology::load(&data_path("demo_topology.json"))?;
    let settings_str = std::fs::read_to_string(data_path("demo_settings.json"))?;
    let (_, settings) = try_upgrade_settings(&settings_str)?;
    let mut macros = MacroTable::new();
    macros.parse(&std::fs::read_to_string(data_path("demo_macros.txt"))?)?;
    let skips = settings.skip_predicate();
    let compiler = LogicCompiler::new(&topology, &macros, &skips);
    let (base, _) = compiler.compile_file("base", &data_path("demo_logic.txt"))?;
    let evaluator = LogicEvaluator::new(vec![base]);

    for seed in ["a", "b", "c", "d", "e"] {
        let session = Session::new(&settings, &topology, &evaluator);
        let outcome1 = session.randomize(seed)?;
        let outcome2 = session.randomize(seed)?;
        assert_eq!(outcome1.mapping, outcome2.mapping);
        assert_eq!(outcome1.swaps, outcome2.swaps);
        assert_eq!(outcome1.spoiler_log, outcome2.spoiler_log);
        assert_eq!(outcome1.topology.edges, outcome2.topology.edges);
    }
    Ok(())
}
