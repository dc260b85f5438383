pub mod transitions;

use anyhow::{Result, bail};
use checkrando_game::{FillerSlot, GameState, MAX_FILLER_SLOTS, NodeIdx, NodeKind, Topology};
use checkrando_logic::{LogicCondition, LogicEvaluator, StateSet};
use hashbrown::HashMap;
use log::{debug, info, warn};

use crate::prng::SeedRng;
use crate::settings::{RandomizerSettings, TransitionMode};
use crate::spoiler_log::{
    SpoilerLog, SpoilerPlacement, SpoilerRound, edge_label, get_spoiler_mapping,
    get_spoiler_swaps, item_label, placement,
};
use crate::traverse::{Explorer, acquire_transition_states, starting_states, verify_mapping};
use crate::weighted::WeightedSet;
use transitions::{SwapTable, TransitionRandomizer};

// Unplaceable items tolerated at the end of an attempt; their locations become filler.
pub const MAX_LEFTOVER_ITEMS: usize = 10;
// Keeps every unlockable edge selectable when its score works out to zero.
pub const MIN_EDGE_WEIGHT: f64 = 0.01;
const PROXIMITY_HOPS: u32 = 3;
const SHOP_PENALTY_SCALE: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replacement {
    Check(NodeIdx), // The contents of this original check
    Filler(FillerSlot),
    Obtained, // No filler slot left; the location reads as already collected
}

/// Original check location -> replacement, in insertion order. Entries are added
/// exactly once.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CheckMapping {
    entries: Vec<(NodeIdx, Replacement)>,
    index: HashMap<NodeIdx, usize>,
}

impl CheckMapping {
    pub fn insert(&mut self, location: NodeIdx, replacement: Replacement) {
        assert!(
            !self.index.contains_key(&location),
            "check {location} mapped twice"
        );
        self.index.insert(location, self.entries.len());
        self.entries.push((location, replacement));
    }

    pub fn get(&self, location: NodeIdx) -> Option<Replacement> {
        self.index.get(&location).map(|&i| self.entries[i].1)
    }

    pub fn contains(&self, location: NodeIdx) -> bool {
        self.index.contains_key(&location)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, Replacement)> + '_ {
        self.entries.iter().copied()
    }

    pub fn placed_items(&self) -> Vec<NodeIdx> {
        self.entries
            .iter()
            .filter_map(|(_, r)| match r {
                Replacement::Check(item) => Some(*item),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LocationState {
    Unplaced,
    Discovered { depth: usize },
    Reserved,
    Placed,
}

#[derive(Clone, Debug)]
pub struct FrontierEdge {
    pub edge: usize,
    pub round: usize, // Round in which the edge first entered the frontier
    pub missing: Vec<LogicCondition>,
    pub can_unlock: bool,
    pub uniqueness: f64,
    pub backtrack: usize,
}

impl FrontierEdge {
    pub fn weight(&self) -> f64 {
        let u = self.uniqueness;
        let d = self.backtrack as f64;
        let c = self.missing.len() as f64;
        ((100.0 * u * u * u + d * d) / (c + 1.0)).max(MIN_EDGE_WEIGHT)
    }
}

pub struct CheckRandomizer<'a> {
    pub topology: &'a Topology,
    pub evaluator: &'a LogicEvaluator,
    pub settings: &'a RandomizerSettings,
    pub pool: Vec<NodeIdx>, // Check nodes whose contents are shuffled, in topology order
}

// State that changes over the course of one placement attempt
struct RandomizationState {
    round: usize,
    states: StateSet,
    explorer: Explorer,
    locations: Vec<LocationState>, // Corresponds to Topology.nodes
    penalty: Vec<f64>,             // Proximity penalty, corresponds to Topology.nodes
    discovered: Vec<NodeIdx>,      // Discovered but unplaced, in discovery order
    pool: Vec<NodeIdx>,            // Items not yet placed
    in_starting_pool: Vec<bool>,   // Corresponds to Topology.nodes
    frontier_round: Vec<Option<usize>>, // Corresponds to Topology.edges
    mapping: CheckMapping,
    spoiler_rounds: Vec<SpoilerRound>,
    fill_at_will: Vec<SpoilerPlacement>,
}

pub struct CheckPlacement {
    pub mapping: CheckMapping,
    pub rounds: Vec<SpoilerRound>,
    pub fill_at_will: Vec<SpoilerPlacement>,
    pub leftover_items: Vec<NodeIdx>,
}

impl<'a> CheckRandomizer<'a> {
    pub fn new(
        topology: &'a Topology,
        evaluator: &'a LogicEvaluator,
        settings: &'a RandomizerSettings,
        game_state: Option<&dyn GameState>,
    ) -> Self {
        let mut pool = vec![];
        for node in topology.check_nodes() {
            let Some(check) = topology.check(node) else {
                continue;
            };
            if !settings.pool_settings.includes(check.check_type) {
                continue;
            }
            if settings.respect_obtained
                && game_state.is_some_and(|gs| check.already_obtained(gs))
            {
                continue;
            }
            pool.push(node);
        }
        CheckRandomizer {
            topology,
            evaluator,
            settings,
            pool,
        }
    }

    // Every pool check keeps its own contents.
    pub fn vanilla_mapping(&self) -> CheckMapping {
        let mut mapping = CheckMapping::default();
        for &node in &self.pool {
            mapping.insert(node, Replacement::Check(node));
        }
        mapping
    }

    fn explore(&self, state: &mut RandomizationState) {
        let topology = self.topology;
        let round = state.round;
        let st = state;
        st.explorer.explore(
            topology,
            self.evaluator,
            &mut st.states,
            &mut |node, states| match &topology.nodes[node].kind {
                NodeKind::Transition(_) => acquire_transition_states(topology, node, states),
                NodeKind::Check(_) => {
                    if st.in_starting_pool[node] {
                        if st.locations[node] == LocationState::Unplaced {
                            st.locations[node] = LocationState::Discovered { depth: round };
                            st.discovered.push(node);
                        }
                        false
                    } else {
                        states.acquire(topology.check_state(node));
                        true
                    }
                }
            },
        );
        for &e in &st.explorer.frontier {
            if st.frontier_round[e].is_none() {
                st.frontier_round[e] = Some(round);
            }
        }
    }

    fn count_pool_items(&self, state: &RandomizationState, logic_state: &str) -> u32 {
        state
            .pool
            .iter()
            .filter(|&&i| self.topology.check_state(i) == logic_state)
            .count() as u32
    }

    fn get_frontier(&self, state: &RandomizationState) -> Vec<FrontierEdge> {
        let mut frontier: Vec<FrontierEdge> = vec![];
        for &e in &state.explorer.frontier {
            let Some(missing) = self.evaluator.get_missing_logic(e, &state.states) else {
                continue;
            };
            if missing.is_empty() {
                continue;
            }
            let can_unlock = missing
                .iter()
                .all(|c| self.count_pool_items(state, &c.state) >= c.count);
            let round = state.frontier_round[e].unwrap_or(state.round);
            frontier.push(FrontierEdge {
                edge: e,
                round,
                missing,
                can_unlock,
                uniqueness: 0.0,
                backtrack: state.round - round,
            });
        }

        // Total demand per state name across the whole frontier:
        let uniqueness = {
            let mut demand: HashMap<&str, u32> = HashMap::new();
            for f in &frontier {
                for c in &f.missing {
                    *demand.entry(c.state.as_str()).or_insert(0) += c.count;
                }
            }
            let mut uniqueness = vec![0.0; frontier.len()];
            for (i, f) in frontier.iter().enumerate() {
                let mut product = 1.0;
                for c in &f.missing {
                    product *= c.count as f64 / demand[c.state.as_str()] as f64;
                }
                uniqueness[i] = 1.0 - product;
            }
            uniqueness
        };
        for (f, u) in frontier.iter_mut().zip(uniqueness) {
            f.uniqueness = u;
        }
        frontier
    }

    fn location_weight(&self, state: &RandomizationState, node: NodeIdx, depth: usize) -> f64 {
        let d = depth as f64;
        let shop_penalty = match self.topology.check(node) {
            Some(check) if check.shop => SHOP_PENALTY_SCALE / d,
            _ => 1.0,
        };
        d * d * d / (1.0 + state.penalty[node] + shop_penalty)
    }

    fn discovered_set(&self, state: &RandomizationState) -> WeightedSet<NodeIdx> {
        let mut set = WeightedSet::new();
        for &node in &state.discovered {
            if let LocationState::Discovered { depth } = state.locations[node] {
                set.add(self.location_weight(state, node, depth), node);
            }
        }
        set
    }

    fn place(&self, state: &mut RandomizationState, location: NodeIdx, item: NodeIdx) -> SpoilerPlacement {
        state.mapping.insert(location, Replacement::Check(item));
        state.locations[location] = LocationState::Placed;
        state.discovered.retain(|&n| n != location);
        state.states.acquire(self.topology.check_state(item));
        debug!(
            "Placed {} at {}",
            item_label(self.topology, item),
            self.topology.node_label(location)
        );
        placement(self.topology, location, item)
    }

    // Spreads out placements: walks up to three hops backward from the location and
    // penalizes discovered checks next to each node on the way.
    fn apply_proximity_penalty(&self, state: &mut RandomizationState, location: NodeIdx) {
        let topology = self.topology;
        let mut seen = vec![location];
        let mut penalized: Vec<NodeIdx> = vec![location];
        let mut layer = vec![location];
        for hop in 0..PROXIMITY_HOPS {
            let value = (PROXIMITY_HOPS - hop) as f64;
            let mut next = vec![];
            for &node in &layer {
                for &e in &topology.nodes[node].incoming {
                    let from = topology.edges[e].from;
                    if !seen.contains(&from) {
                        seen.push(from);
                        next.push(from);
                    }
                }
            }
            for &node in &next {
                for &e in &topology.nodes[node].outgoing {
                    let to = topology.edges[e].to;
                    if penalized.contains(&to) {
                        continue;
                    }
                    if let LocationState::Discovered { .. } = state.locations[to] {
                        state.penalty[to] += value;
                        penalized.push(to);
                    }
                }
            }
            layer = next;
        }
    }

    fn unlock(
        &self,
        attempt_num: usize,
        state: &mut RandomizationState,
        chosen: &FrontierEdge,
        rng: &mut SeedRng,
    ) -> Result<Vec<SpoilerPlacement>> {
        let mut placements = vec![];
        for cond in &chosen.missing {
            let mut location_set = self.discovered_set(state);
            if (location_set.len() as u32) < cond.count {
                bail!(
                    "[attempt {attempt_num}] Attempt failed: {} locations available for {cond}",
                    location_set.len()
                );
            }
            let mut reserved = vec![];
            for _ in 0..cond.count {
                let Some(idx) = location_set.pick_index(rng.next_f64()) else {
                    bail!("[attempt {attempt_num}] Attempt failed: no location left for {cond}");
                };
                let location = location_set.remove_at(idx);
                state.locations[location] = LocationState::Reserved;
                reserved.push(location);
            }
            for location in reserved {
                let Some(pos) = state
                    .pool
                    .iter()
                    .position(|&i| self.topology.check_state(i) == cond.state)
                else {
                    bail!(
                        "[attempt {attempt_num}] Attempt failed: no remaining item grants {}",
                        cond.state
                    );
                };
                let item = state.pool.remove(pos);
                placements.push(self.place(state, location, item));
                self.apply_proximity_penalty(state, location);
            }
        }
        Ok(placements)
    }

    // Terminal phase: nothing left to unlock, so remaining items go anywhere reachable.
    fn fill_at_will(&self, state: &mut RandomizationState, rng: &mut SeedRng) {
        let mut location_set = self.discovered_set(state);
        while !state.pool.is_empty() {
            let Some(idx) = location_set.pick_index(rng.next_f64()) else {
                break;
            };
            let location = location_set.remove_at(idx);
            let item = state.pool.remove(rng.gen_index(0..state.pool.len()));
            let p = self.place(state, location, item);
            state.fill_at_will.push(p);
        }
    }

    fn new_state(&self) -> RandomizationState {
        let num_nodes = self.topology.nodes.len();
        let mut in_starting_pool = vec![false; num_nodes];
        for &node in &self.pool {
            in_starting_pool[node] = true;
        }
        let mut state = RandomizationState {
            round: 0,
            states: starting_states(&self.settings.starting_items),
            explorer: Explorer::new(self.topology),
            locations: vec![LocationState::Unplaced; num_nodes],
            penalty: vec![0.0; num_nodes],
            discovered: vec![],
            pool: self.pool.clone(),
            in_starting_pool,
            frontier_round: vec![None; self.topology.edges.len()],
            mapping: CheckMapping::default(),
            spoiler_rounds: vec![],
            fill_at_will: vec![],
        };
        state.explorer.add_root(self.topology.start);
        state
    }

    pub fn randomize(&self, attempt_num: usize, rng: &mut SeedRng) -> Result<CheckPlacement> {
        let mut state = self.new_state();
        info!(
            "[attempt {attempt_num}] Placing {} checks, seed={}",
            state.pool.len(),
            rng.seed()
        );

        while !state.pool.is_empty() {
            state.round += 1;
            self.explore(&mut state);
            let frontier = self.get_frontier(&state);
            let mut edge_set: WeightedSet<usize> = WeightedSet::new();
            for (i, f) in frontier.iter().enumerate() {
                if f.can_unlock {
                    edge_set.add(f.weight(), i);
                }
            }
            if edge_set.is_empty() {
                info!(
                    "[attempt {attempt_num}] round={}: nothing left to unlock (frontier={}), filling {} discovered locations",
                    state.round,
                    frontier.len(),
                    state.discovered.len()
                );
                self.fill_at_will(&mut state, rng);
                break;
            }
            let Some(&chosen_idx) = edge_set.pick(rng.next_f64()) else {
                break;
            };
            let chosen = &frontier[chosen_idx];
            let placements = self.unlock(attempt_num, &mut state, chosen, rng)?;
            info!(
                "[attempt {attempt_num}] round={}, frontier={}, unlockable={}, unlocked {}, placed={}, pool={}",
                state.round,
                frontier.len(),
                edge_set.len(),
                edge_label(self.topology, chosen.edge),
                placements.len(),
                state.pool.len()
            );
            state.spoiler_rounds.push(SpoilerRound {
                round: state.round,
                discovered: state.discovered.len() + placements.len(),
                frontier: frontier.len(),
                unlocked_edge: Some(edge_label(self.topology, chosen.edge)),
                missing: chosen.missing.iter().map(|c| c.to_string()).collect(),
                placements,
            });
        }
        self.finish(attempt_num, state)
    }

    fn finish(&self, attempt_num: usize, mut state: RandomizationState) -> Result<CheckPlacement> {
        if state.pool.len() > MAX_LEFTOVER_ITEMS {
            bail!(
                "[attempt {attempt_num}] Attempt failed: {} items could not be placed",
                state.pool.len()
            );
        }
        if !state.pool.is_empty() {
            warn!(
                "[attempt {attempt_num}] {} items left unplaced, using filler",
                state.pool.len()
            );
        }
        let mut filler_slots = 0;
        for node in 0..self.topology.nodes.len() {
            if !state.in_starting_pool[node] || state.mapping.contains(node) {
                continue;
            }
            let replacement = if filler_slots < MAX_FILLER_SLOTS {
                filler_slots += 1;
                Replacement::Filler((filler_slots - 1) as FillerSlot)
            } else {
                Replacement::Obtained
            };
            state.mapping.insert(node, replacement);
        }
        Ok(CheckPlacement {
            mapping: state.mapping,
            rounds: state.spoiler_rounds,
            fill_at_will: state.fill_at_will,
            leftover_items: state.pool,
        })
    }
}

pub struct PlacementOutcome {
    pub mapping: CheckMapping,
    pub swaps: SwapTable,
    pub topology: Topology, // With swaps applied
    pub spoiler_log: SpoilerLog,
    pub seed: String,
    pub attempt: usize,
    pub randomized: bool,
}

/// One randomization request. Each attempt works on its own copy of the topology.
pub struct Session<'a> {
    pub settings: &'a RandomizerSettings,
    pub topology: &'a Topology,
    pub evaluator: &'a LogicEvaluator,
    pub game_state: Option<&'a dyn GameState>,
}

impl<'a> Session<'a> {
    pub fn new(
        settings: &'a RandomizerSettings,
        topology: &'a Topology,
        evaluator: &'a LogicEvaluator,
    ) -> Self {
        Session {
            settings,
            topology,
            evaluator,
            game_state: None,
        }
    }

    pub fn with_game_state(mut self, game_state: &'a dyn GameState) -> Self {
        self.game_state = Some(game_state);
        self
    }

    fn attempt_seed(seed: &str, attempt_num: usize) -> String {
        if attempt_num == 1 {
            seed.to_string()
        } else {
            format!("{seed}/{attempt_num}")
        }
    }

    pub fn randomize(&self, seed: &str) -> Result<PlacementOutcome> {
        let max_attempts = self.settings.max_attempts;
        for attempt_num in 1..=max_attempts {
            let attempt_seed = Self::attempt_seed(seed, attempt_num);
            info!("Attempt {attempt_num}/{max_attempts}: seed={attempt_seed}");
            match self.randomize_attempt(attempt_num, &attempt_seed) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    info!("Attempt {attempt_num}/{max_attempts}: Randomization failed: {e}");
                }
            }
        }
        bail!("Exhausted randomization attempts");
    }

    pub fn randomize_or_vanilla(&self, seed: &str) -> PlacementOutcome {
        match self.randomize(seed) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{e}; falling back to the unrandomized layout");
                self.vanilla_outcome(seed)
            }
        }
    }

    pub fn vanilla_outcome(&self, seed: &str) -> PlacementOutcome {
        let randomizer =
            CheckRandomizer::new(self.topology, self.evaluator, self.settings, self.game_state);
        let mapping = randomizer.vanilla_mapping();
        let spoiler_log = SpoilerLog {
            seed: seed.to_string(),
            mapping: get_spoiler_mapping(self.topology, &mapping),
            ..Default::default()
        };
        PlacementOutcome {
            mapping,
            swaps: SwapTable::default(),
            topology: self.topology.clone(),
            spoiler_log,
            seed: seed.to_string(),
            attempt: 0,
            randomized: false,
        }
    }

    fn randomize_attempt(&self, attempt_num: usize, seed: &str) -> Result<PlacementOutcome> {
        let rng = SeedRng::from_seed_str(seed);
        let mut topology = self.topology.clone();
        let swaps = match self.settings.transition_settings.mode {
            TransitionMode::Vanilla => SwapTable::default(),
            TransitionMode::Randomized => {
                let randomizer = TransitionRandomizer::new(
                    self.evaluator,
                    self.settings.transition_settings.swap_attempts,
                );
                randomizer.randomize_all(attempt_num, &mut topology, &mut rng.derive("transitions"))
            }
        };

        let randomizer =
            CheckRandomizer::new(&topology, self.evaluator, self.settings, self.game_state);
        let placement = randomizer.randomize(attempt_num, &mut rng.derive("checks"))?;

        let report = verify_mapping(
            &topology,
            self.evaluator,
            &placement.mapping,
            starting_states(&self.settings.starting_items),
        );
        if !report.is_complete() {
            bail!(
                "[attempt {attempt_num}] Attempt failed: {} placed checks unreachable on replay",
                report.unreached.len()
            );
        }

        let spoiler_log = SpoilerLog {
            seed: seed.to_string(),
            attempt: attempt_num,
            swaps: get_spoiler_swaps(&topology, &swaps),
            rounds: placement.rounds,
            fill_at_will: placement.fill_at_will,
            leftover_items: placement
                .leftover_items
                .iter()
                .map(|&i| item_label(&topology, i))
                .collect(),
            mapping: get_spoiler_mapping(&topology, &placement.mapping),
        };
        Ok(PlacementOutcome {
            mapping: placement.mapping,
            swaps,
            topology,
            spoiler_log,
            seed: seed.to_string(),
            attempt: attempt_num,
            randomized: true,
        })
    }
}

/// Host entry point: a pure function of settings, seed and world.
pub fn randomize(
    settings: &RandomizerSettings,
    seed: &str,
    topology: &Topology,
    evaluator: &LogicEvaluator,
) -> Result<PlacementOutcome> {
    Session::new(settings, topology, evaluator).randomize(seed)
}
