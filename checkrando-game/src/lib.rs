// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

pub mod check_type;

use anyhow::{Context, Result, bail, ensure};
use hashbrown::HashMap;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::Hash;
use std::path::Path;

pub use crate::check_type::{CheckType, GameState, SaveFlags};

pub type SceneId = i32; // Scene id from the world scan
pub type NodeIdx = usize; // Index into Topology.nodes
pub type EdgeIdx = usize; // Index into Topology.edges
pub type CheckId = i32; // Meaning depends on the CheckType
pub type FillerSlot = u8; // Bit index into the persisted filler bitset

// Width of the persisted filler bitset:
pub const MAX_FILLER_SLOTS: usize = 64;

#[derive(Default, Clone, Debug)]
pub struct IndexedVec<T: Hash + Eq> {
    pub keys: Vec<T>,
    pub index_by_key: HashMap<T, usize>,
}

impl<T: Hash + Eq + Clone> IndexedVec<T> {
    pub fn add(&mut self, key: &T) -> usize {
        if let Some(&idx) = self.index_by_key.get(key) {
            idx
        } else {
            let idx = self.keys.len();
            self.index_by_key.insert(key.clone(), idx);
            self.keys.push(key.clone());
            idx
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub check_type: CheckType,
    pub check_id: CheckId,
    pub save_id: String,
    #[serde(default)]
    pub shop: bool,
    // Logic state granted when the check's contents are obtained (defaults to the node alias):
    #[serde(default)]
    pub state: Option<String>,
}

impl Check {
    pub fn new(check_type: CheckType, check_id: CheckId, save_id: &str) -> Self {
        Check {
            check_type,
            check_id,
            save_id: save_id.to_string(),
            shop: check_type == CheckType::Shop,
            state: None,
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    pub fn describe(&self) -> String {
        self.check_type.describe(self.check_id)
    }

    pub fn already_obtained(&self, game_state: &dyn GameState) -> bool {
        self.check_type
            .already_obtained(&self.save_id, game_state)
    }

    pub fn give(&self, game_state: &mut dyn GameState) {
        self.check_type
            .give(self.check_id, &self.save_id, game_state)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub far_scene: SceneId,
    pub far_alias: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Check(Check),
    Transition(Transition),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    pub alias: String,
    pub scene: SceneId,
    #[serde(default)]
    pub position: (f32, f32),
    pub kind: NodeKind,
    #[serde(skip)]
    pub incoming: Vec<EdgeIdx>,
    #[serde(skip)]
    pub outgoing: Vec<EdgeIdx>,
}

impl Node {
    pub fn check(&self) -> Option<&Check> {
        match &self.kind {
            NodeKind::Check(c) => Some(c),
            NodeKind::Transition(_) => None,
        }
    }

    pub fn transition(&self) -> Option<&Transition> {
        match &self.kind {
            NodeKind::Transition(t) => Some(t),
            NodeKind::Check(_) => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    #[default]
    Local, // Within a scene, from the topology resource
    Link, // From a transition node to its far side, generated on finalize
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub scene: SceneId,
    pub from: NodeIdx,
    pub to: NodeIdx,
    #[serde(default)]
    pub kind: EdgeKind,
}

pub fn state_name(scene: SceneId, alias: &str) -> String {
    format!("Scene{scene}.{alias}")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub start: NodeIdx,
    // Scene-id pairs whose transitions must never be swapped:
    #[serde(default)]
    pub fixed_transitions: Vec<(SceneId, SceneId)>,
    #[serde(skip)]
    pub node_isv: IndexedVec<(SceneId, String)>, // Corresponds to Topology.nodes
    #[serde(skip)]
    pub scene_nodes: BTreeMap<SceneId, Vec<NodeIdx>>,
}

impl Topology {
    pub fn load(path: &Path) -> Result<Topology> {
        let json_str = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read topology at {}", path.display()))?;
        let topology = Topology::from_json_str(&json_str)
            .with_context(|| format!("unable to parse topology at {}", path.display()))?;
        info!(
            "Loaded topology: {} nodes, {} edges, {} scenes",
            topology.nodes.len(),
            topology.edges.len(),
            topology.scene_nodes.len()
        );
        Ok(topology)
    }

    pub fn from_json_str(json_str: &str) -> Result<Topology> {
        let mut des = serde_json::Deserializer::from_str(json_str);
        let mut topology: Topology = serde_path_to_error::deserialize(&mut des)?;
        topology.finalize()?;
        Ok(topology)
    }

    // Rebuilds the derived indexes and the transition link edges.
    pub fn finalize(&mut self) -> Result<()> {
        self.edges.retain(|e| e.kind == EdgeKind::Local);
        self.node_isv = IndexedVec::default();
        self.scene_nodes = BTreeMap::new();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let key = (node.scene, node.alias.clone());
            ensure!(
                !self.node_isv.index_by_key.contains_key(&key),
                "duplicate node {} in scene {}",
                node.alias,
                node.scene
            );
            self.node_isv.add(&key);
            self.scene_nodes.entry(node.scene).or_default().push(i);
            node.incoming.clear();
            node.outgoing.clear();
        }
        ensure!(
            self.start < self.nodes.len(),
            "start node {} out of range",
            self.start
        );

        for (i, edge) in self.edges.iter().enumerate() {
            if edge.from >= self.nodes.len() || edge.to >= self.nodes.len() {
                bail!("edge {i} has an endpoint out of range");
            }
            let from_scene = self.nodes[edge.from].scene;
            let to_scene = self.nodes[edge.to].scene;
            if from_scene != edge.scene || to_scene != edge.scene {
                bail!(
                    "edge {i} ({} -> {}) is not contained in scene {}",
                    self.nodes[edge.from].alias,
                    self.nodes[edge.to].alias,
                    edge.scene
                );
            }
        }

        for idx in 0..self.nodes.len() {
            let node = &self.nodes[idx];
            if let Some(t) = node.transition() {
                let key = (t.far_scene, t.far_alias.clone());
                if let Some(&far_idx) = self.node_isv.index_by_key.get(&key) {
                    self.edges.push(Edge {
                        scene: node.scene,
                        from: idx,
                        to: far_idx,
                        kind: EdgeKind::Link,
                    });
                }
            }
        }

        for (i, edge) in self.edges.iter().enumerate() {
            self.nodes[edge.from].outgoing.push(i);
            self.nodes[edge.to].incoming.push(i);
        }
        Ok(())
    }

    pub fn node_by_alias(&self, scene: SceneId, alias: &str) -> Option<NodeIdx> {
        self.node_isv
            .index_by_key
            .get(&(scene, alias.to_string()))
            .copied()
    }

    pub fn scene_nodes(&self, scene: SceneId) -> &[NodeIdx] {
        match self.scene_nodes.get(&scene) {
            Some(v) => v,
            None => &[],
        }
    }

    pub fn find_edges(&self, from: NodeIdx, to: NodeIdx) -> impl Iterator<Item = EdgeIdx> + '_ {
        self.nodes[from]
            .outgoing
            .iter()
            .copied()
            .filter(move |&e| self.edges[e].to == to && self.edges[e].kind == EdgeKind::Local)
    }

    pub fn link_edge(&self, node: NodeIdx) -> Option<EdgeIdx> {
        self.nodes[node]
            .outgoing
            .iter()
            .copied()
            .find(|&e| self.edges[e].kind == EdgeKind::Link)
    }

    pub fn far_node(&self, node: NodeIdx) -> Option<NodeIdx> {
        self.link_edge(node).map(|e| self.edges[e].to)
    }

    pub fn check(&self, node: NodeIdx) -> Option<&Check> {
        self.nodes[node].check()
    }

    pub fn check_nodes(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].check().is_some())
    }

    pub fn transition_nodes(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        (0..self.nodes.len()).filter(|&i| self.nodes[i].transition().is_some())
    }

    // Logic state granted by obtaining the contents of a check node.
    pub fn check_state(&self, node: NodeIdx) -> &str {
        let n = &self.nodes[node];
        match n.check().and_then(|c| c.state.as_deref()) {
            Some(s) => s,
            None => &n.alias,
        }
    }

    // Near and far pseudo-states of a transition node.
    pub fn transition_states(&self, node: NodeIdx) -> Option<[String; 2]> {
        let n = &self.nodes[node];
        let t = n.transition()?;
        Some([
            state_name(n.scene, &n.alias),
            state_name(t.far_scene, &t.far_alias),
        ])
    }

    pub fn node_label(&self, node: NodeIdx) -> String {
        let n = &self.nodes[node];
        state_name(n.scene, &n.alias)
    }

    pub fn retarget_edge(&mut self, edge_idx: EdgeIdx, new_to: NodeIdx) {
        let old_to = self.edges[edge_idx].to;
        if old_to == new_to {
            return;
        }
        self.nodes[old_to].incoming.retain(|&e| e != edge_idx);
        self.nodes[new_to].incoming.push(edge_idx);
        self.edges[edge_idx].to = new_to;
    }

    pub fn set_far_side(&mut self, node: NodeIdx, far_scene: SceneId, far_alias: &str) {
        if let NodeKind::Transition(t) = &mut self.nodes[node].kind {
            t.far_scene = far_scene;
            t.far_alias = far_alias.to_string();
        }
    }
}

/// Incremental construction of a `Topology`, for tools and tests.
#[derive(Default)]
pub struct TopologyBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    start: NodeIdx,
    fixed_transitions: Vec<(SceneId, SceneId)>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_node(&mut self, scene: SceneId, alias: &str, kind: NodeKind) -> NodeIdx {
        self.nodes.push(Node {
            alias: alias.to_string(),
            scene,
            position: (0.0, 0.0),
            kind,
            incoming: vec![],
            outgoing: vec![],
        });
        self.nodes.len() - 1
    }

    pub fn add_check(&mut self, scene: SceneId, alias: &str, check: Check) -> NodeIdx {
        self.add_node(scene, alias, NodeKind::Check(check))
    }

    pub fn add_transition(
        &mut self,
        scene: SceneId,
        alias: &str,
        far_scene: SceneId,
        far_alias: &str,
    ) -> NodeIdx {
        let t = Transition {
            far_scene,
            far_alias: far_alias.to_string(),
        };
        self.add_node(scene, alias, NodeKind::Transition(t))
    }

    pub fn add_edge(&mut self, from: NodeIdx, to: NodeIdx) -> EdgeIdx {
        self.edges.push(Edge {
            scene: self.nodes[from].scene,
            from,
            to,
            kind: EdgeKind::Local,
        });
        self.edges.len() - 1
    }

    pub fn add_two_way(&mut self, a: NodeIdx, b: NodeIdx) {
        self.add_edge(a, b);
        self.add_edge(b, a);
    }

    pub fn set_start(&mut self, node: NodeIdx) {
        self.start = node;
    }

    pub fn fix_transitions(&mut self, a: SceneId, b: SceneId) {
        self.fixed_transitions.push((a, b));
    }

    pub fn build(self) -> Result<Topology> {
        let mut topology = Topology {
            nodes: self.nodes,
            edges: self.edges,
            start: self.start,
            fixed_transitions: self.fixed_transitions,
            node_isv: IndexedVec::default(),
            scene_nodes: BTreeMap::new(),
        };
        topology.finalize()?;
        Ok(topology)
    }
}
