use checkrando_game::{EdgeIdx, NodeIdx, NodeKind, Topology};
use checkrando_logic::{LogicEvaluator, StateSet};
use log::debug;
use serde::Serialize;

use crate::randomize::{CheckMapping, Replacement};
use crate::settings::StartingItem;

/// Depth-first reachability under the currently acquired logic states. The
/// explorer keeps its progress between calls so later rounds resume from the
/// frontier.
#[derive(Clone, Debug)]
pub struct Explorer {
    pub visited: Vec<bool>,
    pub explored: Vec<bool>,
    pub frontier: Vec<EdgeIdx>, // Reached but untraversable, in discovery order
    in_frontier: Vec<bool>,
    roots: Vec<NodeIdx>,
}

impl Explorer {
    pub fn new(topology: &Topology) -> Self {
        Explorer {
            visited: vec![false; topology.nodes.len()],
            explored: vec![false; topology.edges.len()],
            frontier: vec![],
            in_frontier: vec![false; topology.edges.len()],
            roots: vec![],
        }
    }

    pub fn add_root(&mut self, node: NodeIdx) {
        self.roots.push(node);
    }

    fn push_outgoing(topology: &Topology, node: NodeIdx, stack: &mut Vec<EdgeIdx>) {
        // Reversed so that edges are popped in adjacency order.
        for &e in topology.nodes[node].outgoing.iter().rev() {
            stack.push(e);
        }
    }

    /// Explores until a full pass acquires nothing new. `visit` is called once for
    /// each newly reached node and returns whether it changed `states`.
    pub fn explore(
        &mut self,
        topology: &Topology,
        evaluator: &LogicEvaluator,
        states: &mut StateSet,
        visit: &mut dyn FnMut(NodeIdx, &mut StateSet) -> bool,
    ) {
        loop {
            let mut acquired = false;
            let mut stack: Vec<EdgeIdx> = vec![];
            for &e in self.frontier.iter().rev() {
                self.in_frontier[e] = false;
                stack.push(e);
            }
            self.frontier.clear();
            for node in std::mem::take(&mut self.roots).into_iter().rev() {
                if !self.visited[node] {
                    self.visited[node] = true;
                    acquired |= visit(node, states);
                    Self::push_outgoing(topology, node, &mut stack);
                }
            }

            while let Some(e) = stack.pop() {
                if self.explored[e] || evaluator.is_false_edge(e) {
                    continue;
                }
                if evaluator.can_traverse(e, states) {
                    self.explored[e] = true;
                    let to = topology.edges[e].to;
                    if !self.visited[to] {
                        self.visited[to] = true;
                        acquired |= visit(to, states);
                        Self::push_outgoing(topology, to, &mut stack);
                    }
                } else if !self.in_frontier[e] {
                    self.in_frontier[e] = true;
                    self.frontier.push(e);
                }
            }

            if !acquired {
                break;
            }
        }
    }
}

/// Grants the near and far pseudo-states of a transition node.
pub fn acquire_transition_states(topology: &Topology, node: NodeIdx, states: &mut StateSet) -> bool {
    let mut acquired = false;
    if let Some(names) = topology.transition_states(node) {
        for name in &names {
            acquired |= states.ensure(name);
        }
    }
    acquired
}

pub fn starting_states(starting_items: &[StartingItem]) -> StateSet {
    let mut states = StateSet::new();
    for item in starting_items {
        states.acquire_n(&item.state, item.count);
    }
    states
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyReport {
    pub reached: Vec<NodeIdx>,
    pub unreached: Vec<NodeIdx>,
    pub visited_nodes: usize,
}

impl VerifyReport {
    pub fn is_complete(&self) -> bool {
        self.unreached.is_empty()
    }
}

/// Replays exploration as a player would experience the mapping: reaching a
/// mapped check grants the state of its replacement, filler grants nothing, and
/// unmapped checks grant their own state.
pub fn verify_mapping(
    topology: &Topology,
    evaluator: &LogicEvaluator,
    mapping: &CheckMapping,
    mut states: StateSet,
) -> VerifyReport {
    let mut explorer = Explorer::new(topology);
    explorer.add_root(topology.start);
    explorer.explore(topology, evaluator, &mut states, &mut |node, states| {
        match &topology.nodes[node].kind {
            NodeKind::Transition(_) => acquire_transition_states(topology, node, states),
            NodeKind::Check(_) => match mapping.get(node) {
                Some(Replacement::Check(item)) => {
                    states.acquire(topology.check_state(item));
                    true
                }
                Some(Replacement::Filler(_)) | Some(Replacement::Obtained) => false,
                None => {
                    states.acquire(topology.check_state(node));
                    true
                }
            },
        }
    });

    let mut report = VerifyReport {
        visited_nodes: explorer.visited.iter().filter(|&&v| v).count(),
        ..Default::default()
    };
    for (location, replacement) in mapping.iter() {
        if let Replacement::Check(_) = replacement {
            if explorer.visited[location] {
                report.reached.push(location);
            } else {
                report.unreached.push(location);
            }
        }
    }
    debug!(
        "Verification: {} placed checks reached, {} unreached, {} nodes visited, {} states",
        report.reached.len(),
        report.unreached.len(),
        report.visited_nodes,
        states.len()
    );
    report
}

// Counts connected components of the undirected graph over edges that can ever be traversed.
pub fn count_components(topology: &Topology, evaluator: &LogicEvaluator) -> usize {
    let mut seen = vec![false; topology.nodes.len()];
    let mut count = 0;
    for root in 0..topology.nodes.len() {
        if seen[root] {
            continue;
        }
        count += 1;
        for n in undirected_reach(topology, evaluator, root) {
            seen[n] = true;
        }
    }
    count
}

pub fn undirected_reach(
    topology: &Topology,
    evaluator: &LogicEvaluator,
    root: NodeIdx,
) -> Vec<NodeIdx> {
    let mut seen = vec![false; topology.nodes.len()];
    let mut out = vec![root];
    let mut stack = vec![root];
    seen[root] = true;
    while let Some(node) = stack.pop() {
        let n = &topology.nodes[node];
        for &e in n.outgoing.iter().chain(n.incoming.iter()) {
            if evaluator.is_false_edge(e) {
                continue;
            }
            let edge = &topology.edges[e];
            let other = if edge.from == node { edge.to } else { edge.from };
            if !seen[other] {
                seen[other] = true;
                out.push(other);
                stack.push(other);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkrando_game::{Check, CheckType, TopologyBuilder};
    use checkrando_logic::{LogicCompiler, LogicContext, MacroTable, NoSkips};

    #[test]
    fn test_explore_frontier() {
        let mut b = TopologyBuilder::new();
        let start = b.add_check(1, "Start", Check::new(CheckType::Toggle, 0, "start"));
        let key = b.add_check(1, "KeyChest", Check::new(CheckType::Key, 1, "key"));
        let locked = b.add_check(1, "Locked", Check::new(CheckType::Item, 2, "locked"));
        let sealed = b.add_check(1, "Sealed", Check::new(CheckType::Item, 3, "sealed"));
        b.add_edge(start, key);
        b.add_edge(start, locked);
        b.add_edge(start, sealed);
        b.set_start(start);
        let topology = b.build().unwrap();
        let macros = MacroTable::new();
        let compiler = LogicCompiler::new(&topology, &macros, &NoSkips);
        let (layer, _) = compiler.compile(
            "base",
            "Scene 1\nStart -> KeyChest: Gem\nStart -> Locked: KeyChest\nStart -> Sealed: false\n",
        );
        let evaluator = LogicEvaluator::new(vec![layer]);

        let mut explorer = Explorer::new(&topology);
        explorer.add_root(topology.start);
        let mut states = StateSet::new();
        let mut visit = |node: NodeIdx, states: &mut StateSet| {
            states.acquire(topology.check_state(node));
            true
        };
        explorer.explore(&topology, &evaluator, &mut states, &mut visit);
        assert!(explorer.visited[start]);
        assert!(!explorer.visited[key]);
        // The false edge never enters the frontier.
        assert_eq!(explorer.frontier.len(), 2);

        states.acquire("Gem");
        explorer.explore(&topology, &evaluator, &mut states, &mut visit);
        assert!(explorer.visited[key]);
        assert!(explorer.visited[locked]);
        assert!(!explorer.visited[sealed]);
        assert!(explorer.frontier.is_empty());
        assert!(states.has_state("Locked"));
    }
}
