use std::path::{Path, PathBuf};

use anyhow::{Result, bail, ensure};
use checkrando::randomize::{CheckMapping, Replacement, Session, randomize};
use checkrando::settings::{RandomizerSettings, TransitionMode, try_upgrade_settings};
use checkrando::traverse::{starting_states, verify_mapping};
use checkrando_game::{Check, CheckType, SaveFlags, Topology, TopologyBuilder};
use checkrando_logic::{LogicCompiler, LogicEvaluator, MacroTable, NoSkips};
use hashbrown::HashSet;

fn data_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("data")
}

fn load_demo() -> Result<(Topology, RandomizerSettings, LogicEvaluator)> {
    let base_path = data_path();
    let topology = Topology::load(&base_path.join("demo_topology.json"))?;
    let settings_str = std::fs::read_to_string(base_path.join("demo_settings.json"))?;
    let (_, settings) = try_upgrade_settings(&settings_str)?;
    let mut macros = MacroTable::new();
    macros.parse(&std::fs::read_to_string(base_path.join("demo_macros.txt"))?)?;
    let skips = settings.skip_predicate();
    let compiler = LogicCompiler::new(&topology, &macros, &skips);
    let (base, _) = compiler.compile_file("base", &base_path.join("demo_logic.txt"))?;
    let (clip, _) = compiler.compile_file("LedgeClip", &base_path.join("demo_skips.txt"))?;
    Ok((topology, settings, LogicEvaluator::new(vec![base, clip])))
}

/// Every pool location is mapped once, and no original check is handed out twice.
fn check_mapping_shape(
    topology: &Topology,
    settings: &RandomizerSettings,
    mapping: &CheckMapping,
) -> Result<()> {
    let pool: Vec<usize> = topology
        .check_nodes()
        .filter(|&n| {
            topology
                .check(n)
                .is_some_and(|c| settings.pool_settings.includes(c.check_type))
        })
        .collect();
    ensure!(
        mapping.len() == pool.len(),
        "mapping has {} entries for {} pool checks",
        mapping.len(),
        pool.len()
    );
    let mut items = HashSet::new();
    for (location, replacement) in mapping.iter() {
        ensure!(
            pool.contains(&location),
            "{} is not a pool location",
            topology.node_label(location)
        );
        if let Replacement::Check(item) = replacement {
            ensure!(
                pool.contains(&item),
                "{} is not a pool check",
                topology.node_label(item)
            );
            if !items.insert(item) {
                bail!("{} placed twice", topology.node_label(item));
            }
        }
    }
    Ok(())
}

#[test]
fn test_demo_vanilla_transitions() -> Result<()> {
    let (topology, mut settings, evaluator) = load_demo()?;
    settings.transition_settings.mode = TransitionMode::Vanilla;
    for seed in 0..10 {
        let outcome = randomize(&settings, &seed.to_string(), &topology, &evaluator)?;
        assert!(outcome.randomized);
        assert!(outcome.swaps.is_empty());
        assert_eq!(outcome.topology.edges, topology.edges);
        check_mapping_shape(&topology, &settings, &outcome.mapping)?;

        // The whole demo world is reachable, so everything gets a real item.
        assert!(outcome.spoiler_log.leftover_items.is_empty());
        assert_eq!(outcome.mapping.placed_items().len(), outcome.mapping.len());

        let report = verify_mapping(
            &topology,
            &evaluator,
            &outcome.mapping,
            starting_states(&settings.starting_items),
        );
        assert!(report.is_complete());
        assert_eq!(report.reached.len(), outcome.mapping.len());
    }
    Ok(())
}

#[test]
fn test_demo_randomized_transitions() -> Result<()> {
    let (topology, settings, evaluator) = load_demo()?;
    assert_eq!(settings.transition_settings.mode, TransitionMode::Randomized);
    for seed in ["red", "green", "blue", "cyan", "magenta"] {
        let outcome = Session::new(&settings, &topology, &evaluator).randomize(seed)?;
        check_mapping_shape(&outcome.topology, &settings, &outcome.mapping)?;
        assert!(outcome.swaps.len() <= settings.transition_settings.swap_attempts);
        assert_eq!(outcome.spoiler_log.swaps.len(), outcome.swaps.len());

        // Links stay symmetric and name their far sides.
        let swapped = &outcome.topology;
        for n in swapped.transition_nodes() {
            let Some(far) = swapped.far_node(n) else {
                continue;
            };
            assert_eq!(swapped.far_node(far), Some(n));
            let t = swapped.nodes[n].transition().unwrap();
            assert_eq!(swapped.nodes[far].scene, t.far_scene);
            assert_eq!(swapped.nodes[far].alias, t.far_alias);
            assert_ne!(swapped.nodes[far].scene, swapped.nodes[n].scene);
        }

        let report = verify_mapping(
            swapped,
            &evaluator,
            &outcome.mapping,
            starting_states(&settings.starting_items),
        );
        assert!(report.is_complete());
    }
    Ok(())
}

#[test]
fn test_fallback_to_vanilla() -> Result<()> {
    let (topology, mut settings, evaluator) = load_demo()?;
    settings.max_attempts = 0;
    let session = Session::new(&settings, &topology, &evaluator);
    assert!(session.randomize("any").is_err());

    let outcome = session.randomize_or_vanilla("any");
    assert!(!outcome.randomized);
    assert!(outcome.swaps.is_empty());
    for (location, replacement) in outcome.mapping.iter() {
        assert_eq!(replacement, Replacement::Check(location));
    }
    check_mapping_shape(&topology, &settings, &outcome.mapping)?;
    Ok(())
}

#[test]
fn test_respect_obtained() -> Result<()> {
    let (topology, mut settings, evaluator) = load_demo()?;
    settings.respect_obtained = true;
    let well = topology.node_by_alias(1, "Well").unwrap();
    let house = topology.node_by_alias(1, "House").unwrap();
    let mut save = SaveFlags::default();
    topology.check(well).unwrap().give(&mut save);

    let outcome = Session::new(&settings, &topology, &evaluator)
        .with_game_state(&save)
        .randomize("obtained")?;
    assert!(!outcome.mapping.contains(well));
    assert!(outcome.mapping.contains(house));
    assert!(!outcome.mapping.placed_items().contains(&well));
    Ok(())
}

// A location behind a `false` edge is never discovered, so it ends up as filler.
#[test]
fn test_false_edge_location_gets_filler() -> Result<()> {
    let mut b = TopologyBuilder::new();
    let start = b.add_check(1, "Start", Check::new(CheckType::Toggle, 0, "start"));
    let open = b.add_check(1, "Open", Check::new(CheckType::Item, 1, "open").with_state("Boots"));
    let gated = b.add_check(1, "Gated", Check::new(CheckType::Item, 2, "gated").with_state("Gloves"));
    let sealed = b.add_check(1, "Sealed", Check::new(CheckType::Item, 3, "sealed").with_state("Map"));
    b.add_two_way(start, open);
    b.add_two_way(start, gated);
    b.add_two_way(start, sealed);
    b.set_start(start);
    let topology = b.build()?;
    let macros = MacroTable::new();
    let compiler = LogicCompiler::new(&topology, &macros, &NoSkips);
    let (layer, report) = compiler.compile(
        "base",
        "Scene 1\nStart -> Gated: Boots\nStart -> Sealed: false\n",
    );
    assert_eq!(report.skipped, 0);
    let evaluator = LogicEvaluator::new(vec![layer]);
    let settings = RandomizerSettings::default();

    for seed in ["1", "2", "3"] {
        let outcome = randomize(&settings, seed, &topology, &evaluator)?;
        assert!(matches!(
            outcome.mapping.get(sealed),
            Some(Replacement::Filler(0))
        ));
        assert_eq!(outcome.spoiler_log.leftover_items.len(), 1);
        // Boots unlock the gate, so they sit at the open location.
        assert_eq!(outcome.mapping.get(open), Some(Replacement::Check(open)));
    }
    Ok(())
}
