use checkrando_game::{EdgeIdx, NodeIdx, Topology};
use serde::{Deserialize, Serialize};

use crate::randomize::transitions::SwapTable;
use crate::randomize::{CheckMapping, Replacement};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpoilerPlacement {
    pub location: String,
    pub item: String,
    pub state: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpoilerRound {
    pub round: usize,
    pub discovered: usize,
    pub frontier: usize,
    pub unlocked_edge: Option<String>,
    pub missing: Vec<String>,
    pub placements: Vec<SpoilerPlacement>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpoilerSwap {
    pub from: String,
    pub to: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpoilerMappingEntry {
    pub location: String,
    pub save_id: String,
    pub replacement: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SpoilerLog {
    pub seed: String,
    pub attempt: usize,
    pub swaps: Vec<SpoilerSwap>,
    pub rounds: Vec<SpoilerRound>,
    pub fill_at_will: Vec<SpoilerPlacement>,
    pub leftover_items: Vec<String>,
    pub mapping: Vec<SpoilerMappingEntry>,
}

pub fn edge_label(topology: &Topology, edge: EdgeIdx) -> String {
    let e = &topology.edges[edge];
    format!(
        "{} -> {}",
        topology.node_label(e.from),
        topology.node_label(e.to)
    )
}

pub fn item_label(topology: &Topology, item: NodeIdx) -> String {
    match topology.check(item) {
        Some(check) => format!("{} ({})", check.describe(), topology.check_state(item)),
        None => topology.node_label(item),
    }
}

pub fn placement(topology: &Topology, location: NodeIdx, item: NodeIdx) -> SpoilerPlacement {
    SpoilerPlacement {
        location: topology.node_label(location),
        item: item_label(topology, item),
        state: topology.check_state(item).to_string(),
    }
}

pub fn get_spoiler_swaps(topology: &Topology, swaps: &SwapTable) -> Vec<SpoilerSwap> {
    swaps
        .pairs()
        .iter()
        .map(|&(a, b)| SpoilerSwap {
            from: topology.node_label(a),
            to: topology.node_label(b),
        })
        .collect()
}

pub fn get_spoiler_mapping(topology: &Topology, mapping: &CheckMapping) -> Vec<SpoilerMappingEntry> {
    mapping
        .iter()
        .map(|(location, replacement)| SpoilerMappingEntry {
            location: topology.node_label(location),
            save_id: topology
                .check(location)
                .map(|c| c.save_id.clone())
                .unwrap_or_default(),
            replacement: match replacement {
                Replacement::Check(item) => item_label(topology, item),
                Replacement::Filler(slot) => format!("Filler #{slot}"),
                Replacement::Obtained => "Obtained".to_string(),
            },
        })
        .collect()
}
