use checkrando_game::{EdgeKind, NodeIdx, Topology};
use checkrando_logic::LogicEvaluator;
use log::{debug, info};

use crate::prng::SeedRng;
use crate::traverse::undirected_reach;

/// Symmetric pairing of transition nodes whose destinations were exchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwapTable {
    pairs: Vec<(NodeIdx, NodeIdx)>,
}

impl SwapTable {
    pub fn insert(&mut self, a: NodeIdx, b: NodeIdx) {
        assert!(
            self.get(a).is_none() && self.get(b).is_none(),
            "transition swapped twice"
        );
        self.pairs.push((a, b));
    }

    pub fn get(&self, node: NodeIdx) -> Option<NodeIdx> {
        self.pairs.iter().find_map(|&(a, b)| {
            if a == node {
                Some(b)
            } else if b == node {
                Some(a)
            } else {
                None
            }
        })
    }

    pub fn pairs(&self) -> &[(NodeIdx, NodeIdx)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

pub struct TransitionRandomizer<'a> {
    pub evaluator: &'a LogicEvaluator,
    pub swap_attempts: usize,
}

impl<'a> TransitionRandomizer<'a> {
    pub fn new(evaluator: &'a LogicEvaluator, swap_attempts: usize) -> Self {
        TransitionRandomizer {
            evaluator,
            swap_attempts,
        }
    }

    fn is_fixed(&self, topology: &Topology, node: NodeIdx) -> bool {
        let n = &topology.nodes[node];
        let Some(t) = n.transition() else {
            return true;
        };
        topology
            .fixed_transitions
            .iter()
            .any(|&(a, b)| (a, b) == (n.scene, t.far_scene) || (b, a) == (n.scene, t.far_scene))
    }

    // A node is sealed when no local edge touching it can ever be traversed.
    fn is_sealed(&self, topology: &Topology, node: NodeIdx) -> bool {
        let n = &topology.nodes[node];
        let mut local_edges = n
            .incoming
            .iter()
            .chain(n.outgoing.iter())
            .copied()
            .filter(|&e| topology.edges[e].kind == EdgeKind::Local)
            .peekable();
        if local_edges.peek().is_none() {
            return true;
        }
        local_edges.all(|e| self.evaluator.is_false_edge(e))
    }

    pub fn eligible_nodes(&self, topology: &Topology) -> Vec<NodeIdx> {
        topology
            .transition_nodes()
            .filter(|&n| {
                topology.far_node(n).is_some()
                    && !self.is_fixed(topology, n)
                    && !self.is_sealed(topology, n)
            })
            .collect()
    }

    /// Exchanges the destinations of `x` and `y`. Each keeps its near identity and
    /// takes over the other's far side; the old far sides are relinked to match.
    pub fn exchange(topology: &mut Topology, x: NodeIdx, y: NodeIdx) {
        let (Some(fx), Some(fy)) = (topology.far_node(x), topology.far_node(y)) else {
            return;
        };
        let identity = |t: &Topology, n: NodeIdx| (t.nodes[n].scene, t.nodes[n].alias.clone());
        let (x_id, y_id) = (identity(topology, x), identity(topology, y));
        let (fx_id, fy_id) = (identity(topology, fx), identity(topology, fy));

        // Links into X and Y from their old far sides, if those lead back:
        let back_x = topology.link_edge(fx).filter(|&e| topology.edges[e].to == x);
        let back_y = topology.link_edge(fy).filter(|&e| topology.edges[e].to == y);

        if let Some(e) = topology.link_edge(x) {
            topology.retarget_edge(e, fy);
        }
        if let Some(e) = topology.link_edge(y) {
            topology.retarget_edge(e, fx);
        }
        topology.set_far_side(x, fy_id.0, &fy_id.1);
        topology.set_far_side(y, fx_id.0, &fx_id.1);
        if let Some(e) = back_x {
            topology.retarget_edge(e, y);
            topology.set_far_side(fx, y_id.0, &y_id.1);
        }
        if let Some(e) = back_y {
            topology.retarget_edge(e, x);
            topology.set_far_side(fy, x_id.0, &x_id.1);
        }
    }

    pub fn randomize_all(
        &self,
        attempt_num: usize,
        topology: &mut Topology,
        rng: &mut SeedRng,
    ) -> SwapTable {
        let mut eligible = self.eligible_nodes(topology);
        let mut swaps = SwapTable::default();
        info!(
            "[attempt {attempt_num}] Randomizing transitions: {} eligible",
            eligible.len()
        );
        for _ in 0..self.swap_attempts {
            if eligible.len() < 2 {
                break;
            }
            let x = eligible[rng.gen_index(0..eligible.len())];
            let Some(fx) = topology.far_node(x) else {
                eligible.retain(|&n| n != x);
                continue;
            };
            let x_scene = topology.nodes[x].scene;
            let reachable = undirected_reach(topology, self.evaluator, x);
            let mut candidates: Vec<NodeIdx> = vec![];
            for &y in &eligible {
                if y == x || y == fx {
                    continue;
                }
                let Some(fy) = topology.far_node(y) else {
                    continue;
                };
                // Neither side may end up leading back into its own scene.
                if fy == fx
                    || topology.nodes[fy].scene == x_scene
                    || topology.nodes[fx].scene == topology.nodes[y].scene
                {
                    continue;
                }
                candidates.push(y);
            }
            if candidates.is_empty() {
                continue;
            }
            let disjoint: Vec<NodeIdx> = candidates
                .iter()
                .copied()
                .filter(|y| !reachable.contains(y))
                .collect();
            let y = if disjoint.is_empty() {
                candidates[rng.gen_index(0..candidates.len())]
            } else {
                disjoint[rng.gen_index(0..disjoint.len())]
            };
            let fy = topology.far_node(y);
            debug!(
                "Swapping {} <-> {}",
                topology.node_label(x),
                topology.node_label(y)
            );
            Self::exchange(topology, x, y);
            swaps.insert(x, y);
            eligible.retain(|&n| n != x && n != y && n != fx && Some(n) != fy);
        }
        info!("[attempt {attempt_num}] {} transition swaps", swaps.len());
        swaps
    }
}
